use std::fmt;

use serde::{
    Deserializer,
    de::{self, SeqAccess, Visitor},
};

use super::{CodecError, TokenWriter, WIRE_TAG};
use crate::statement::{SqlStatement, SqlValue};

/// Fixed per-statement allowance in the capacity hint.
pub const STATEMENT_OVERHEAD: usize = 20;
/// Extra slack added once per request.
pub const HEADER_SLACK: usize = 10;

/// An encoded batch, ready to be framed with [`FlatRequest::to_wire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRequest {
    pub id: u64,
    pub estimated_length: usize,
    pub payload: String,
}

impl FlatRequest {
    pub fn to_wire(&self) -> String {
        format!("{WIRE_TAG}:{};{}", self.estimated_length, self.payload)
    }
}

/// Header fields of a wire frame, with the payload left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireFrame<'a> {
    pub estimated_length: usize,
    pub id: u64,
    pub payload: &'a str,
}

/// Encodes a batch for database `id` into the flat request format.
pub fn encode_request(id: u64, statements: &[SqlStatement]) -> Result<FlatRequest, CodecError> {
    let mut estimated_length = HEADER_SLACK;
    let mut writer = TokenWriter::with_capacity(statements.len() * STATEMENT_OVERHEAD);

    writer.push(&id);
    for statement in statements {
        estimated_length += STATEMENT_OVERHEAD + statement.sql.len();
        writer.push(statement.sql.as_str());
        writer.push(&statement.params.len());
        for param in &statement.params {
            estimated_length += param_length(param);
            writer.push_value(param);
        }
    }

    Ok(FlatRequest {
        id,
        estimated_length,
        payload: writer.finish()?,
    })
}

fn param_length(param: &SqlValue) -> usize {
    match param {
        SqlValue::Null => 4,
        SqlValue::Text(s) => s.len(),
        other => other.to_string().len(),
    }
}

/// Splits a wire frame into its header fields. Only the leading id of the payload is read;
/// the remainder is left for [`decode_request`].
pub fn parse_wire(wire: &str) -> Result<WireFrame<'_>, CodecError> {
    let rest = wire
        .strip_prefix(WIRE_TAG)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| CodecError::InvalidHeader(format!("missing '{WIRE_TAG}:' tag")))?;

    let (length, payload) = rest
        .split_once(';')
        .ok_or_else(|| CodecError::InvalidHeader("missing ';' after length".to_string()))?;

    let estimated_length = length
        .trim()
        .parse::<usize>()
        .map_err(|e| CodecError::InvalidHeader(format!("bad length '{length}': {e}")))?;

    Ok(WireFrame {
        estimated_length,
        id: leading_id(payload)?,
        payload,
    })
}

fn leading_id(payload: &str) -> Result<u64, CodecError> {
    let body = payload
        .trim_start()
        .strip_prefix('[')
        .ok_or_else(|| CodecError::InvalidHeader("payload is not an array".to_string()))?;
    let end = body.find([',', ']']).unwrap_or(body.len());
    let id = body[..end].trim();

    id.parse::<u64>()
        .map_err(|e| CodecError::InvalidHeader(format!("bad database id '{id}': {e}")))
}

/// Decodes a request payload in one pass, returning the database id and its statements.
pub fn decode_request(payload: &str) -> Result<(u64, Vec<SqlStatement>), CodecError> {
    let mut de = serde_json::Deserializer::from_str(payload);
    let decoded = (&mut de).deserialize_seq(RequestVisitor)?;
    de.end()?;
    Ok(decoded)
}

struct RequestVisitor;

impl<'de> Visitor<'de> for RequestVisitor {
    type Value = (u64, Vec<SqlStatement>);

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a flat request array [id, sql, count, params.., ...]")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let id: u64 = seq
            .next_element()?
            .ok_or_else(|| de::Error::custom("missing database id"))?;

        let mut statements = Vec::new();
        while let Some(sql) = seq.next_element::<String>()? {
            let count: usize = seq
                .next_element()?
                .ok_or_else(|| de::Error::custom(format!("missing parameter count for '{sql}'")))?;

            let mut params = Vec::with_capacity(count);
            for i in 0..count {
                let param: SqlValue = seq.next_element()?.ok_or_else(|| {
                    de::Error::custom(format!("expected {count} parameters for '{sql}', found {i}"))
                })?;
                params.push(param);
            }
            statements.push(SqlStatement { sql, params });
        }

        Ok((id, statements))
    }
}
