//! Flat batch wire protocol.
//!
//! The flat protocol exists to move large batches across a process boundary without building a
//! structured object per statement or per row. Both directions are a single JSON array of
//! scalar tokens, read and written strictly front to back.
//!
//! # Request
//!
//! ```text
//! fj:<estimated_length>;[<id>,"<sql 1>",<n1>,<p1>..<pn1>,"<sql 2>",<n2>,...]
//! ```
//!
//! The leading element of the array is the numeric id of the owning database, so a dispatcher
//! can route the frame by reading only the first few bytes. `estimated_length` is a capacity
//! hint for the result buffer and never affects correctness.
//!
//! # Result
//!
//! A flat token array; each statement's outcome begins with a marker:
//!
//! - `"ok"`
//! - `"ch2", <rows affected>, <insert id>`
//! - `"okrows", (<column count>, (<name>, <value>)*)*, "endrows"`
//! - `"errormessage", <message>`
//!
//! # Example
//! ```rust
//! use sqlrunner::{SqlStatement, StatementOutcome, codec};
//!
//! let request = codec::encode_request(7, &[SqlStatement::plain("SELECT 1")]).unwrap();
//! assert!(request.to_wire().starts_with("fj:"));
//!
//! let outcomes = codec::decode_results(r#"["ok","ch2",1,5]"#).unwrap();
//! assert_eq!(outcomes[0], StatementOutcome::Ok);
//! ```
mod request;
mod results;

use std::fmt;

use rusqlite::types::ValueRef;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{self, Visitor},
};
use thiserror::Error;

use crate::statement::SqlValue;

pub use request::{FlatRequest, WireFrame, decode_request, encode_request, parse_wire};
pub use results::{ResultWriter, decode_results};

/// Tag opening every request frame; identifies version 1 of the flat protocol.
pub const WIRE_TAG: &str = "fj";

pub const MARKER_OK: &str = "ok";
pub const MARKER_CHANGES: &str = "ch2";
pub const MARKER_ROWS: &str = "okrows";
pub const MARKER_END_ROWS: &str = "endrows";
pub const MARKER_ERROR: &str = "errormessage";

/// Upper bound on the result buffer pre-allocation taken from a caller's hint.
const MAX_PREALLOCATION: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid flat frame header: {0}")]
    InvalidHeader(String),

    #[error("malformed flat token stream: {0}")]
    Json(#[from] serde_json::Error),

    #[error("flat token stream is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Appends comma-separated JSON scalar tokens into one array.
struct TokenWriter {
    buf: Vec<u8>,
    empty: bool,
    failure: Option<serde_json::Error>,
}

impl TokenWriter {
    fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.clamp(2, MAX_PREALLOCATION));
        buf.push(b'[');
        Self {
            buf,
            empty: true,
            failure: None,
        }
    }

    fn push<T: Serialize + ?Sized>(&mut self, token: &T) {
        if self.failure.is_some() {
            return;
        }
        if !self.empty {
            self.buf.push(b',');
        }
        self.empty = false;
        if let Err(e) = serde_json::to_writer(&mut self.buf, token) {
            self.failure = Some(e);
        }
    }

    fn push_value(&mut self, value: &SqlValue) {
        match value {
            SqlValue::Null => self.push(&()),
            SqlValue::Integer(i) => self.push(i),
            SqlValue::Real(r) => self.push(r),
            SqlValue::Text(s) => self.push(s.as_str()),
        }
    }

    fn push_value_ref(&mut self, value: ValueRef<'_>) {
        match value {
            ValueRef::Null => self.push(&()),
            ValueRef::Integer(i) => self.push(&i),
            ValueRef::Real(r) => self.push(&r),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                self.push(String::from_utf8_lossy(bytes).as_ref())
            }
        }
    }

    fn finish(mut self) -> Result<String, CodecError> {
        if let Some(e) = self.failure {
            return Err(e.into());
        }
        self.buf.push(b']');
        Ok(String::from_utf8(self.buf)?)
    }
}

/// Wire tokens map onto [`SqlValue`] with the same coercion rule used for JSON parameters:
/// floating numbers stay real, other numbers are integers, `null` is NULL, the rest is text.
impl<'de> Deserialize<'de> for SqlValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SqlValueVisitor)
    }
}

struct SqlValueVisitor;

impl<'de> Visitor<'de> for SqlValueVisitor {
    type Value = SqlValue;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a scalar token (string, number or null)")
    }

    fn visit_unit<E: de::Error>(self) -> Result<SqlValue, E> {
        Ok(SqlValue::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<SqlValue, E> {
        Ok(SqlValue::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<SqlValue, E> {
        Ok(SqlValue::Text(v.to_string()))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<SqlValue, E> {
        Ok(SqlValue::Integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<SqlValue, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => SqlValue::Integer(i),
            Err(_) => SqlValue::Real(v as f64),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<SqlValue, E> {
        Ok(SqlValue::Real(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<SqlValue, E> {
        Ok(SqlValue::Text(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<SqlValue, E> {
        Ok(SqlValue::Text(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_produces_json_array() {
        let mut writer = TokenWriter::with_capacity(0);
        writer.push("a\"b");
        writer.push_value(&SqlValue::Real(2.0));
        writer.push_value(&SqlValue::Null);
        writer.push_value_ref(ValueRef::Integer(3));
        assert_eq!(writer.finish().unwrap(), r#"["a\"b",2.0,null,3]"#);
    }

    #[test]
    fn empty_writer() {
        let writer = TokenWriter::with_capacity(usize::MAX);
        assert_eq!(writer.finish().unwrap(), "[]");
    }

    #[test]
    fn wire_values_keep_numeric_kind() {
        let values: Vec<SqlValue> = serde_json::from_str(r#"[2.0, 2, null, "x", false]"#).unwrap();
        assert_eq!(
            values,
            vec![
                SqlValue::Real(2.0),
                SqlValue::Integer(2),
                SqlValue::Null,
                SqlValue::Text("x".into()),
                SqlValue::Text("false".into()),
            ]
        );
    }
}
