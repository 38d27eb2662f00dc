//! High-level command module for the client REPL.
//!
//! This module defines the [`ReplCommand`] enum, which encapsulates the commands a user can type
//! at the `sqlrunner_cli` prompt. Dot-prefixed input is a meta command; anything else is SQL
//! for the database currently in use.
//!
//! # Overview
//! - `.open <name> [ro]`: open (and switch to) a database, optionally read-only.
//! - `.use <name>`: switch to an already open database.
//! - `.close <name>` / `.delete <name>`: close, or close and delete, a database.
//! - `.echo <text>`: round trip through the server.
//! - `.exit`: disconnect.
//!
//! # Example
//! ```rust
//! use sqlrunner::ReplCommand;
//!
//! let cmd: ReplCommand = ".open app.db ro".try_into().unwrap();
//! assert_eq!(cmd, ReplCommand::Open { name: "app.db".into(), read_only: true });
//! ```
use thiserror::Error;

/// List of possible error that a command can throw.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no database in use, run .open <name> or .use <name> first")]
    NoDatabase,

    #[error("no command provided")]
    Empty,
}

/// User supplied commands for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    /// Disconnect and leave the REPL.
    Exit,
    Open { name: String, read_only: bool },
    /// Switch the current database without contacting the server.
    Use(String),
    Close(String),
    Delete(String),
    Echo(String),
    /// SQL run as a one-statement batch against the current database.
    Sql(String),
}

impl TryFrom<&str> for ReplCommand {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<ReplCommand, Self::Error> {
        let s = value.trim();
        if s.is_empty() {
            return Err(CommandError::Empty);
        }
        if !s.starts_with('.') {
            return Ok(ReplCommand::Sql(s.to_string()));
        }

        let (command, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        let rest = rest.trim();
        let name = |usage: &str| {
            let parts = rest.split_whitespace().collect::<Vec<&str>>();
            match parts.as_slice() {
                [name] => Ok(name.to_string()),
                _ => Err(CommandError::InvalidCommandArguments {
                    command: command.to_string(),
                    reason: format!("requires a database name. Example: {usage}"),
                }),
            }
        };

        match command {
            ".exit" => Ok(ReplCommand::Exit),
            ".open" => {
                let parts = rest.split_whitespace().collect::<Vec<&str>>();
                match parts.as_slice() {
                    [name] => Ok(ReplCommand::Open {
                        name: name.to_string(),
                        read_only: false,
                    }),
                    [name, "ro"] => Ok(ReplCommand::Open {
                        name: name.to_string(),
                        read_only: true,
                    }),
                    _ => Err(CommandError::InvalidCommandArguments {
                        command: command.to_string(),
                        reason: "expected a name and optional 'ro'. Example: .open app.db ro"
                            .to_string(),
                    }),
                }
            }
            ".use" => name(".use app.db").map(ReplCommand::Use),
            ".close" => name(".close app.db").map(ReplCommand::Close),
            ".delete" => name(".delete app.db").map(ReplCommand::Delete),
            ".echo" => Ok(ReplCommand::Echo(rest.to_string())),
            _ => Err(CommandError::UnrecognizedCommand(s.to_string())),
        }
    }
}
