//! Statements, values and per-statement outcomes.
//!
//! [`SqlValue`] is the single scalar type of the crate: it is what gets bound to a statement
//! parameter and what comes back out of a result column. Values arriving as JSON go through
//! [`SqlValue::from`], which applies the binding coercion rule:
//!
//! 1. a floating-point number binds as a 64-bit real, even when integral (`2.0`);
//! 2. any other number binds as a 64-bit integer;
//! 3. `null` binds as SQL `NULL`;
//! 4. everything else binds as UTF-8 text.
use std::fmt;

use bincode::{Decode, Encode};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Number(n) if n.is_f64() => SqlValue::Real(n.as_f64().unwrap_or_default()),
            // u64 values past i64::MAX have no integer binding; keep them numeric.
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Text(other.to_string()),
        }
    }
}

impl From<ValueRef<'_>> for SqlValue {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(r) => SqlValue::Real(r),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            SqlValue::Null => ValueRef::Null,
            SqlValue::Integer(i) => ValueRef::Integer(*i),
            SqlValue::Real(r) => ValueRef::Real(*r),
            SqlValue::Text(s) => ValueRef::Text(s.as_bytes()),
        };
        Ok(ToSqlOutput::Borrowed(value))
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Real(r) => write!(f, "{r:?}"),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// One parameterized statement of a batch.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Statement without parameters.
    pub fn plain(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }
}

/// A result row: ordered `(column name, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct Row {
    pub columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }
}

/// What a single statement of a batch produced.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum StatementOutcome {
    /// The statement returned rows.
    Rows(Vec<Row>),
    /// The statement changed at least one row.
    Changes { rows_affected: u64, insert_id: i64 },
    /// Executed, nothing to report.
    Ok,
    /// The statement failed; sibling statements are unaffected.
    Error(String),
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn floating_json_stays_real() {
        assert_eq!(SqlValue::from(json!(2.0)), SqlValue::Real(2.0));
        assert_eq!(SqlValue::from(json!(2.5)), SqlValue::Real(2.5));
    }

    #[test]
    fn integral_json_is_integer() {
        assert_eq!(SqlValue::from(json!(2)), SqlValue::Integer(2));
        assert_eq!(SqlValue::from(json!(-7)), SqlValue::Integer(-7));
    }

    #[test]
    fn oversized_unsigned_falls_back_to_real() {
        assert!(matches!(SqlValue::from(json!(u64::MAX)), SqlValue::Real(_)));
    }

    #[test]
    fn null_and_text() {
        assert_eq!(SqlValue::from(json!(null)), SqlValue::Null);
        assert_eq!(SqlValue::from(json!("x")), SqlValue::Text("x".into()));
    }

    #[test]
    fn other_json_binds_as_text() {
        assert_eq!(SqlValue::from(json!(true)), SqlValue::Text("true".into()));
        assert_eq!(SqlValue::from(json!([1, 2])), SqlValue::Text("[1,2]".into()));
    }

    #[test]
    fn blob_column_reads_as_text() {
        let value: SqlValue = ValueRef::Blob(b"abc").into();
        assert_eq!(value, SqlValue::Text("abc".into()));
    }

    #[test]
    fn row_lookup_by_column() {
        let row = Row {
            columns: vec![("x".into(), SqlValue::Integer(1))],
        };
        assert_eq!(row.get("x"), Some(&SqlValue::Integer(1)));
        assert_eq!(row.get("y"), None);
    }
}
