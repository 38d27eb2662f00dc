use bincode::{Decode, Encode};

use crate::{config::OpenOptions, statement::SqlStatement};

#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Request {
    Open {
        name: String,
        options: OpenOptions,
    },
    ExecuteBatch {
        name: String,
        statements: Vec<SqlStatement>,
    },
    /// A complete flat frame, routed by the id inside it.
    ExecuteFlatBatch {
        wire: String,
    },
    Close {
        name: String,
    },
    Delete {
        name: String,
        location: Option<String>,
    },
    Echo(String),
    Disconnect,
}
