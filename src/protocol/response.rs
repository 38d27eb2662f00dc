use bincode::{Decode, Encode};

use crate::{error::Error, statement::StatementOutcome};

#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Response {
    Opened { id: u64 },
    Outcomes(Vec<StatementOutcome>),
    FlatResults(String),
    Ok,
    Echo(String),
    Err {
        code: ResponseError,
        description: String,
    },
    ConnectionClosed,
}

#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub enum ResponseError {
    AlreadyOpen,
    NotOpen,
    Queue,
    Open,
    Close,
    Delete,
    Codec,
    Abandoned,
}

impl From<&Error> for ResponseError {
    fn from(value: &Error) -> Self {
        match value {
            Error::AlreadyOpen(_) => ResponseError::AlreadyOpen,
            Error::NotOpen(_) => ResponseError::NotOpen,
            Error::QueueUnavailable(_) | Error::QueueFull(_) => ResponseError::Queue,
            Error::OpenFailed { .. } => ResponseError::Open,
            Error::CloseFailed { .. } => ResponseError::Close,
            Error::DeleteFailed { .. } => ResponseError::Delete,
            Error::Codec(_) => ResponseError::Codec,
            Error::Abandoned => ResponseError::Abandoned,
        }
    }
}

impl From<Error> for Response {
    fn from(value: Error) -> Self {
        Response::Err {
            code: (&value).into(),
            description: value.to_string(),
        }
    }
}
