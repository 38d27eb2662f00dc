//! CLI utilities for sqlrunner.
//!
//! The utilities present in this module drive the `sqlrunner_cli` REPL: reading a command,
//! turning it into a protocol [`Request`] for the current database, and rendering the
//! [`Response`] for a terminal.
use std::{
    fmt::{self, Write as _},
    io::{self, BufRead, Write},
};

use crate::{
    command::{CommandError, ReplCommand},
    config::OpenOptions,
    protocol::{Request, Response},
    statement::{SqlStatement, StatementOutcome},
};

/// Prompt user for a command. End of input reads as `.exit`.
pub fn prompt<R, W>(
    mut reader: R,
    mut writer: W,
    current: Option<&str>,
) -> io::Result<Result<ReplCommand, CommandError>>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "{}> ", current.unwrap_or(""))?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Ok(ReplCommand::Exit));
    }
    Ok(s.as_str().try_into())
}

/// Client-side state of a REPL session.
#[derive(Debug, Default)]
pub struct Session {
    current: Option<String>,
}

impl Session {
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Request to send for `command`, or `None` when the command is handled locally.
    pub fn request(&mut self, command: ReplCommand) -> Result<Option<Request>, CommandError> {
        let req = match command {
            ReplCommand::Exit => Request::Disconnect,
            ReplCommand::Use(name) => {
                self.current = Some(name);
                return Ok(None);
            }
            ReplCommand::Open { name, read_only } => {
                let options = if read_only {
                    OpenOptions::read_only()
                } else {
                    OpenOptions::default()
                };
                self.current = Some(name.clone());
                Request::Open { name, options }
            }
            ReplCommand::Close(name) => {
                self.forget(&name);
                Request::Close { name }
            }
            ReplCommand::Delete(name) => {
                self.forget(&name);
                Request::Delete {
                    name,
                    location: None,
                }
            }
            ReplCommand::Echo(value) => Request::Echo(value),
            ReplCommand::Sql(sql) => Request::ExecuteBatch {
                name: self.current.clone().ok_or(CommandError::NoDatabase)?,
                statements: vec![SqlStatement::plain(sql)],
            },
        };
        Ok(Some(req))
    }

    fn forget(&mut self, name: &str) {
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
    }
}

/// Human readable form of a response.
pub fn render(response: &Response) -> String {
    match response {
        Response::Opened { id } => format!("opened (id {id})"),
        Response::Outcomes(outcomes) => {
            let mut out = String::new();
            match outcomes.iter().try_for_each(|o| render_outcome(&mut out, o)) {
                Ok(()) => out.trim_end().to_string(),
                Err(_) => out,
            }
        }
        Response::FlatResults(stream) => stream.clone(),
        Response::Ok => "ok".to_string(),
        Response::Echo(value) => value.clone(),
        Response::Err { code, description } => format!("error ({code:?}): {description}"),
        Response::ConnectionClosed => "bye".to_string(),
    }
}

fn render_outcome(out: &mut String, outcome: &StatementOutcome) -> fmt::Result {
    match outcome {
        StatementOutcome::Rows(rows) => {
            if let Some(first) = rows.first() {
                let header: Vec<&str> = first.columns.iter().map(|(c, _)| c.as_str()).collect();
                writeln!(out, "{}", header.join(" | "))?;
            }
            for row in rows {
                let values: Vec<String> = row.columns.iter().map(|(_, v)| v.to_string()).collect();
                writeln!(out, "{}", values.join(" | "))?;
            }
            writeln!(out, "({} rows)", rows.len())
        }
        StatementOutcome::Changes {
            rows_affected,
            insert_id,
        } => writeln!(out, "{rows_affected} changed, last insert id {insert_id}"),
        StatementOutcome::Ok => writeln!(out, "ok"),
        StatementOutcome::Error(message) => writeln!(out, "error: {message}"),
    }
}
