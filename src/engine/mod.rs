//! Storage engine adapter.
//!
//! SQLite itself is an external collaborator reached through `rusqlite`; this module only
//! holds what the rest of the crate needs from it:
//!
//! - [`Database`]: open/close/reopen of one connection, plus its interrupt handle.
//! - [`execute_batch`]: the per-statement prepare/bind/step/read loop.
//! - [`OutcomeSink`]: where statement outcomes are streamed to. The structured path collects
//!   them with [`OutcomeCollector`]; the flat path writes tokens with
//!   [`ResultWriter`](crate::codec::ResultWriter).
mod batch;
mod database;

use rusqlite::types::ValueRef;

use crate::statement::{Row, SqlValue, StatementOutcome};

pub use batch::execute_batch;
pub use database::{Database, delete_database};

/// Receives the outcome of each statement, in statement order.
///
/// Exactly one of `ok`, `changes`, `error`, or a `begin_rows` .. `end_rows` block is emitted
/// per statement. Inside a row block every row is announced by `begin_row` followed by one
/// `column` call per column.
pub trait OutcomeSink {
    fn begin_rows(&mut self);
    fn begin_row(&mut self, column_count: usize);
    fn column(&mut self, name: &str, value: ValueRef<'_>);
    fn end_rows(&mut self);
    fn changes(&mut self, rows_affected: u64, insert_id: i64);
    fn ok(&mut self);
    fn error(&mut self, message: &str);
}

/// Builds structured [`StatementOutcome`]s.
#[derive(Debug, Default)]
pub struct OutcomeCollector {
    outcomes: Vec<StatementOutcome>,
    rows: Vec<Row>,
}

impl OutcomeCollector {
    pub fn finish(self) -> Vec<StatementOutcome> {
        self.outcomes
    }
}

impl OutcomeSink for OutcomeCollector {
    fn begin_rows(&mut self) {
        self.rows.clear();
    }

    fn begin_row(&mut self, column_count: usize) {
        self.rows.push(Row {
            columns: Vec::with_capacity(column_count),
        });
    }

    fn column(&mut self, name: &str, value: ValueRef<'_>) {
        if let Some(row) = self.rows.last_mut() {
            row.columns.push((name.to_string(), SqlValue::from(value)));
        }
    }

    fn end_rows(&mut self) {
        let rows = std::mem::take(&mut self.rows);
        self.outcomes.push(StatementOutcome::Rows(rows));
    }

    fn changes(&mut self, rows_affected: u64, insert_id: i64) {
        self.outcomes.push(StatementOutcome::Changes {
            rows_affected,
            insert_id,
        });
    }

    fn ok(&mut self) {
        self.outcomes.push(StatementOutcome::Ok);
    }

    fn error(&mut self, message: &str) {
        self.outcomes.push(StatementOutcome::Error(message.to_string()));
    }
}
