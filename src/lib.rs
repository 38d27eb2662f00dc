pub mod cli;
pub mod codec;
pub mod command;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod statement;
pub mod worker;

pub use command::{CommandError, ReplCommand};
pub use config::{Config, Locator, OpenOptions};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use registry::ResourceKey;
pub use statement::{Row, SqlStatement, SqlValue, StatementOutcome};
pub use worker::{Command, Opened, Responder};
