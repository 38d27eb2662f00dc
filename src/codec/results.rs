use std::fmt;

use rusqlite::types::ValueRef;
use serde::{
    Deserialize, Deserializer,
    de::{self, SeqAccess, Visitor},
};

use super::{
    CodecError, MARKER_CHANGES, MARKER_END_ROWS, MARKER_ERROR, MARKER_OK, MARKER_ROWS,
    TokenWriter,
};
use crate::{
    engine::OutcomeSink,
    statement::{Row, SqlValue, StatementOutcome},
};

/// Streams statement outcomes straight into a flat token array.
pub struct ResultWriter {
    tokens: TokenWriter,
}

impl ResultWriter {
    /// `capacity` is the caller's length hint; it only sizes the initial buffer.
    pub fn new(capacity: usize) -> Self {
        Self {
            tokens: TokenWriter::with_capacity(capacity),
        }
    }

    pub fn finish(self) -> Result<String, CodecError> {
        self.tokens.finish()
    }
}

impl OutcomeSink for ResultWriter {
    fn begin_rows(&mut self) {
        self.tokens.push(MARKER_ROWS);
    }

    fn begin_row(&mut self, column_count: usize) {
        self.tokens.push(&column_count);
    }

    fn column(&mut self, name: &str, value: ValueRef<'_>) {
        self.tokens.push(name);
        self.tokens.push_value_ref(value);
    }

    fn end_rows(&mut self) {
        self.tokens.push(MARKER_END_ROWS);
    }

    fn changes(&mut self, rows_affected: u64, insert_id: i64) {
        self.tokens.push(MARKER_CHANGES);
        self.tokens.push(&rows_affected);
        self.tokens.push(&insert_id);
    }

    fn ok(&mut self) {
        self.tokens.push(MARKER_OK);
    }

    fn error(&mut self, message: &str) {
        self.tokens.push(MARKER_ERROR);
        self.tokens.push(message);
    }
}

/// Reads a flat result token stream back into per-statement outcomes.
///
/// The reader is strictly one pass: each token is consumed exactly once, in order, and the
/// outcome grammar is decided by the marker alone.
pub fn decode_results(stream: &str) -> Result<Vec<StatementOutcome>, CodecError> {
    let mut de = serde_json::Deserializer::from_str(stream);
    let outcomes = (&mut de).deserialize_seq(ResultsVisitor)?;
    de.end()?;
    Ok(outcomes)
}

struct ResultsVisitor;

impl<'de> Visitor<'de> for ResultsVisitor {
    type Value = Vec<StatementOutcome>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a flat result token array")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut outcomes = Vec::new();

        while let Some(marker) = seq.next_element::<String>()? {
            let outcome = match marker.as_str() {
                MARKER_OK => StatementOutcome::Ok,
                MARKER_CHANGES => StatementOutcome::Changes {
                    rows_affected: required(&mut seq, "rows affected")?,
                    insert_id: required(&mut seq, "insert id")?,
                },
                MARKER_ERROR => StatementOutcome::Error(required(&mut seq, "error message")?),
                MARKER_ROWS => StatementOutcome::Rows(read_rows(&mut seq)?),
                other => {
                    return Err(de::Error::custom(format!(
                        "unknown outcome marker '{other}'"
                    )));
                }
            };
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }
}

fn required<'de, A, T>(seq: &mut A, what: &str) -> Result<T, A::Error>
where
    A: SeqAccess<'de>,
    T: Deserialize<'de>,
{
    seq.next_element()?
        .ok_or_else(|| de::Error::custom(format!("token stream ended before {what}")))
}

fn read_rows<'de, A: SeqAccess<'de>>(seq: &mut A) -> Result<Vec<Row>, A::Error> {
    let mut rows = Vec::new();

    loop {
        let token: RowsToken = required(seq, "'endrows'")?;
        match token {
            RowsToken::End => return Ok(rows),
            RowsToken::Columns(count) => {
                let mut columns = Vec::with_capacity(count);
                for _ in 0..count {
                    let name: String = required(seq, "column name")?;
                    let value: SqlValue = required(seq, "column value")?;
                    columns.push((name, value));
                }
                rows.push(Row { columns });
            }
        }
    }
}

/// Inside an `okrows` block, either a row's column count or the closing marker.
enum RowsToken {
    Columns(usize),
    End,
}

impl<'de> Deserialize<'de> for RowsToken {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RowsTokenVisitor)
    }
}

struct RowsTokenVisitor;

impl<'de> Visitor<'de> for RowsTokenVisitor {
    type Value = RowsToken;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a column count or '{MARKER_END_ROWS}'")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<RowsToken, E> {
        usize::try_from(v)
            .map(RowsToken::Columns)
            .map_err(|_| E::custom(format!("column count {v} out of range")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<RowsToken, E> {
        usize::try_from(v)
            .map(RowsToken::Columns)
            .map_err(|_| E::custom(format!("negative column count {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<RowsToken, E> {
        if v == MARKER_END_ROWS {
            Ok(RowsToken::End)
        } else {
            Err(E::custom(format!("unexpected '{v}' inside row block")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_emits_each_outcome_shape() {
        let mut writer = ResultWriter::new(64);
        writer.begin_rows();
        writer.begin_row(2);
        writer.column("x", ValueRef::Integer(1));
        writer.column("y", ValueRef::Text(b"okrows"));
        writer.end_rows();
        writer.changes(1, 7);
        writer.ok();
        writer.error("no such table: t");

        assert_eq!(
            writer.finish().unwrap(),
            r#"["okrows",2,"x",1,"y","okrows","endrows","ch2",1,7,"ok","errormessage","no such table: t"]"#
        );
    }

    #[test]
    fn decodes_every_outcome_shape() {
        let stream = r#"["okrows",2,"x",1,"y",1.5,1,"x",null,"endrows","ch2",3,9,"ok","errormessage","boom"]"#;
        let outcomes = decode_results(stream).unwrap();

        assert_eq!(outcomes.len(), 4);
        assert_eq!(
            outcomes[0],
            StatementOutcome::Rows(vec![
                Row {
                    columns: vec![
                        ("x".into(), SqlValue::Integer(1)),
                        ("y".into(), SqlValue::Real(1.5)),
                    ]
                },
                Row {
                    columns: vec![("x".into(), SqlValue::Null)]
                },
            ])
        );
        assert_eq!(
            outcomes[1],
            StatementOutcome::Changes {
                rows_affected: 3,
                insert_id: 9
            }
        );
        assert_eq!(outcomes[2], StatementOutcome::Ok);
        assert_eq!(outcomes[3], StatementOutcome::Error("boom".into()));
    }

    #[test]
    fn marker_text_inside_a_row_is_a_value() {
        let outcomes = decode_results(r#"["okrows",1,"endrows","endrows","endrows"]"#).unwrap();
        assert_eq!(
            outcomes,
            vec![StatementOutcome::Rows(vec![Row {
                columns: vec![("endrows".into(), SqlValue::Text("endrows".into()))]
            }])]
        );
    }

    #[test]
    fn empty_row_block() {
        let outcomes = decode_results(r#"["okrows","endrows"]"#).unwrap();
        assert_eq!(outcomes, vec![StatementOutcome::Rows(vec![])]);
    }

    #[test]
    fn rejects_unknown_marker() {
        assert!(decode_results(r#"["ok","nope"]"#).is_err());
    }

    #[test]
    fn rejects_unterminated_rows() {
        assert!(decode_results(r#"["okrows",1,"x",1]"#).is_err());
    }

    #[test]
    fn rejects_truncated_changes() {
        assert!(decode_results(r#"["ch2",1]"#).is_err());
    }
}
