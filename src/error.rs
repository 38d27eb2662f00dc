//! Caller-facing error taxonomy.
//!
//! Every command submitted to a [`Dispatcher`](crate::Dispatcher) receives exactly one reply,
//! either the command's value or one of the [`Error`] variants below. Per-statement failures
//! inside a batch are *not* errors; they are recorded as
//! [`StatementOutcome::Error`](crate::StatementOutcome::Error) and the batch carries on.
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error)]
pub enum Error {
    /// A worker already exists for this name. Signals a leaked handle or a double
    /// open upstream; retrying will not help.
    #[error("database already open: {0}")]
    AlreadyOpen(String),

    #[error("database not open: {0}")]
    NotOpen(String),

    #[error("couldn't add to queue for database: {0}")]
    QueueUnavailable(String),

    #[error("queue full for database: {0}")]
    QueueFull(String),

    #[error("can't open database {name}: {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("couldn't close database {name}: {source}")]
    CloseFailed {
        name: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("couldn't delete database {path:?}: {reason}")]
    DeleteFailed { path: PathBuf, reason: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("command abandoned before a reply was sent")]
    Abandoned,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
