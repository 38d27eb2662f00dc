use log::{debug, trace, warn};
use rusqlite::{Connection, types::ValueRef};

use super::OutcomeSink;
use crate::statement::SqlStatement;

/// Runs `statements` in order against `conn`, streaming one outcome per statement into `sink`.
///
/// A failing statement records an error outcome and the batch moves on to the next one.
pub fn execute_batch<S: OutcomeSink>(conn: &Connection, statements: &[SqlStatement], sink: &mut S) {
    for statement in statements {
        trace!("executing: {}", statement.sql);
        if let Err(e) = execute_statement(conn, statement, sink) {
            debug!("statement failed: {e}; sql: {}", statement.sql);
            sink.error(&e.to_string());
        }
    }
}

/// Executes one statement. An `Err` means no outcome has been written yet.
fn execute_statement<S: OutcomeSink>(
    conn: &Connection,
    statement: &SqlStatement,
    sink: &mut S,
) -> rusqlite::Result<()> {
    let mut prepared = conn.prepare(&statement.sql)?;
    for (i, param) in statement.params.iter().enumerate() {
        prepared.raw_bind_parameter(i + 1, param)?;
    }

    let names: Vec<String> = prepared
        .column_names()
        .into_iter()
        .map(String::from)
        .collect();

    let before = total_changes(conn)?;
    let mut rows = prepared.raw_query();
    let mut streaming = false;

    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) if streaming => {
                // The row block is already open; it can only be closed early.
                warn!("row stepping failed, ending result set: {e}");
                break;
            }
            Err(e) => return Err(e),
        };

        if !streaming {
            sink.begin_rows();
            streaming = true;
        }

        sink.begin_row(names.len());
        for (i, name) in names.iter().enumerate() {
            sink.column(name, row.get_ref(i).unwrap_or(ValueRef::Null));
        }
    }
    drop(rows);

    if streaming {
        sink.end_rows();
        return Ok(());
    }

    let rows_affected = u64::try_from(total_changes(conn)? - before).unwrap_or(0);
    if rows_affected > 0 {
        sink.changes(rows_affected, conn.last_insert_rowid());
    } else {
        sink.ok();
    }
    Ok(())
}

fn total_changes(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT total_changes()", [], |row| row.get(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::OutcomeCollector,
        statement::{Row, SqlValue, StatementOutcome},
    };

    fn run(conn: &Connection, statements: &[SqlStatement]) -> Vec<StatementOutcome> {
        let mut collector = OutcomeCollector::default();
        execute_batch(conn, statements, &mut collector);
        collector.finish()
    }

    fn select_one(conn: &Connection, param: SqlValue) -> SqlValue {
        let outcomes = run(
            conn,
            &[SqlStatement::new("SELECT ? AS v, typeof(?1) AS t", vec![param])],
        );
        match &outcomes[0] {
            StatementOutcome::Rows(rows) => rows[0].get("v").cloned().unwrap(),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn params_bind_with_their_own_type() {
        let conn = Connection::open_in_memory().unwrap();

        assert_eq!(
            select_one(&conn, SqlValue::from(serde_json::json!(2.0))),
            SqlValue::Real(2.0)
        );
        assert_eq!(
            select_one(&conn, SqlValue::from(serde_json::json!(2))),
            SqlValue::Integer(2)
        );
        assert_eq!(
            select_one(&conn, SqlValue::from(serde_json::json!(null))),
            SqlValue::Null
        );
        assert_eq!(
            select_one(&conn, SqlValue::from(serde_json::json!("x"))),
            SqlValue::Text("x".into())
        );
    }

    #[test]
    fn sqlite_types_of_bound_params() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[SqlStatement::new(
                "SELECT typeof(?), typeof(?), typeof(?), typeof(?)",
                vec![
                    SqlValue::Real(2.0),
                    SqlValue::Integer(2),
                    SqlValue::Null,
                    SqlValue::Text("x".into()),
                ],
            )],
        );

        let StatementOutcome::Rows(rows) = &outcomes[0] else {
            panic!("expected rows, got {outcomes:?}");
        };
        let types: Vec<_> = rows[0].columns.iter().map(|(_, v)| v.clone()).collect();
        assert_eq!(
            types,
            vec![
                SqlValue::Text("real".into()),
                SqlValue::Text("integer".into()),
                SqlValue::Text("null".into()),
                SqlValue::Text("text".into()),
            ]
        );
    }

    #[test]
    fn insert_reports_changes_and_insert_id() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[
                SqlStatement::plain("CREATE TABLE t(x)"),
                SqlStatement::plain("INSERT INTO t VALUES (1)"),
                SqlStatement::plain("UPDATE t SET x=1 WHERE 0=1"),
            ],
        );

        assert_eq!(outcomes[0], StatementOutcome::Ok);
        assert_eq!(
            outcomes[1],
            StatementOutcome::Changes {
                rows_affected: 1,
                insert_id: 1
            }
        );
        assert_eq!(outcomes[2], StatementOutcome::Ok);
    }

    #[test]
    fn ignored_insert_has_no_insert_id() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[
                SqlStatement::plain("CREATE TABLE t(x PRIMARY KEY)"),
                SqlStatement::plain("INSERT INTO t VALUES (1)"),
                SqlStatement::plain("INSERT OR IGNORE INTO t VALUES (1)"),
            ],
        );
        assert_eq!(outcomes[2], StatementOutcome::Ok);
    }

    #[test]
    fn failure_does_not_abort_siblings() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[
                SqlStatement::plain("CREATE TABLE t(x)"),
                SqlStatement::plain("SELEKT nonsense"),
                SqlStatement::new("INSERT INTO t VALUES (?)", vec![SqlValue::Integer(4)]),
                SqlStatement::plain("SELECT x FROM t"),
            ],
        );

        assert_eq!(outcomes.len(), 4);
        assert!(matches!(outcomes[1], StatementOutcome::Error(_)));
        assert!(matches!(outcomes[2], StatementOutcome::Changes { .. }));
        assert_eq!(
            outcomes[3],
            StatementOutcome::Rows(vec![Row {
                columns: vec![("x".into(), SqlValue::Integer(4))]
            }])
        );
    }

    #[test]
    fn too_many_params_is_a_statement_error() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[SqlStatement::new(
                "SELECT ?",
                vec![SqlValue::Integer(1), SqlValue::Integer(2)],
            )],
        );
        assert!(matches!(outcomes[0], StatementOutcome::Error(_)));
    }

    #[test]
    fn constraint_violation_reports_error() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[
                SqlStatement::plain("CREATE TABLE t(x UNIQUE)"),
                SqlStatement::plain("INSERT INTO t VALUES (1)"),
                SqlStatement::plain("INSERT INTO t VALUES (1)"),
            ],
        );
        let StatementOutcome::Error(message) = &outcomes[2] else {
            panic!("expected an error, got {:?}", outcomes[2]);
        };
        assert!(message.contains("UNIQUE"));
    }

    #[test]
    fn select_without_rows_is_plain_ok() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[
                SqlStatement::plain("CREATE TABLE t(x)"),
                SqlStatement::plain("SELECT * FROM t"),
            ],
        );
        assert_eq!(outcomes[1], StatementOutcome::Ok);
    }

    #[test]
    fn column_types_map_to_values() {
        let conn = Connection::open_in_memory().unwrap();
        let outcomes = run(
            &conn,
            &[SqlStatement::plain(
                "SELECT NULL AS n, 1.5 AS r, 3 AS i, 'txt' AS t, x'6869' AS b",
            )],
        );
        assert_eq!(
            outcomes[0],
            StatementOutcome::Rows(vec![Row {
                columns: vec![
                    ("n".into(), SqlValue::Null),
                    ("r".into(), SqlValue::Real(1.5)),
                    ("i".into(), SqlValue::Integer(3)),
                    ("t".into(), SqlValue::Text("txt".into())),
                    ("b".into(), SqlValue::Text("hi".into())),
                ]
            }])
        );
    }
}
