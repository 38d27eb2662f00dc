use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info, warn};
use rusqlite::{Connection, InterruptHandle, OpenFlags};

use crate::error::Error;

const BUSY_TIMEOUT_MS: u64 = 100;

/// Files SQLite may leave next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-wal", "-shm"];

/// One open SQLite connection and the file it belongs to.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    path: PathBuf,
    flags: OpenFlags,
}

impl Database {
    /// Opens (and, unless `read_only`, creates) the database at `path`.
    pub fn open(path: &Path, read_only: bool) -> rusqlite::Result<Self> {
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };

        info!("open sqlite db: {}", path.display());
        let conn = Self::connect(path, flags)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
            flags,
        })
    }

    fn connect(path: &Path, flags: OpenFlags) -> rusqlite::Result<Connection> {
        let conn = Connection::open_with_flags(path, flags)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Ok(conn)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Handle that can abort the running statement from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }

    /// Replaces the connection with a freshly opened one on the same file.
    pub fn reopen(&mut self) -> rusqlite::Result<()> {
        let fresh = Self::connect(&self.path, self.flags)?;
        let stale = std::mem::replace(&mut self.conn, fresh);
        if let Err((_, e)) = stale.close() {
            warn!("couldn't close stale connection, ignoring: {e}");
        }
        debug!("reopened {}", self.path.display());
        Ok(())
    }

    pub fn close(self) -> rusqlite::Result<()> {
        self.conn.close().map_err(|(_, e)| e)
    }
}

/// Deletes a database file and any sidecar files beside it.
///
/// A missing main file is a failure: there was nothing to delete.
pub fn delete_database(path: &Path) -> Result<(), Error> {
    fs::remove_file(path).map_err(|e| Error::DeleteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        match fs::remove_file(&sidecar) {
            Ok(()) => debug!("removed {}", Path::new(&sidecar).display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "couldn't remove {}, ignoring: {e}",
                Path::new(&sidecar).display()
            ),
        }
    }

    info!("deleted sqlite db: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn open_creates_file() {
        let dir = TempDir::new("sqlrunner").unwrap();
        let path = dir.path().join("a.db");

        let db = Database::open(&path, false).unwrap();
        db.connection().execute_batch("CREATE TABLE t(x)").unwrap();
        db.close().unwrap();

        assert!(path.exists());
    }

    #[test]
    fn read_only_does_not_create() {
        let dir = TempDir::new("sqlrunner").unwrap();
        assert!(Database::open(&dir.path().join("missing.db"), true).is_err());
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = TempDir::new("sqlrunner").unwrap();
        let path = dir.path().join("a.db");
        Database::open(&path, false)
            .unwrap()
            .connection()
            .execute_batch("CREATE TABLE t(x)")
            .unwrap();

        let reader = Database::open(&path, true).unwrap();
        assert!(reader.connection().execute("INSERT INTO t VALUES (1)", []).is_err());
    }

    #[test]
    fn reopen_keeps_data() {
        let dir = TempDir::new("sqlrunner").unwrap();
        let mut db = Database::open(&dir.path().join("a.db"), false).unwrap();
        db.connection()
            .execute_batch("CREATE TABLE t(x); INSERT INTO t VALUES (5);")
            .unwrap();

        db.reopen().unwrap();
        let x: i64 = db
            .connection()
            .query_row("SELECT x FROM t", [], |row| row.get(0))
            .unwrap();
        assert_eq!(x, 5);
    }

    #[test]
    fn delete_removes_file_and_sidecars() {
        let dir = TempDir::new("sqlrunner").unwrap();
        let path = dir.path().join("a.db");
        fs::write(&path, b"").unwrap();
        fs::write(dir.path().join("a.db-journal"), b"").unwrap();

        delete_database(&path).unwrap();

        assert!(!path.exists());
        assert!(!dir.path().join("a.db-journal").exists());
    }

    #[test]
    fn delete_missing_file_fails() {
        let dir = TempDir::new("sqlrunner").unwrap();
        assert!(matches!(
            delete_database(&dir.path().join("nope.db")),
            Err(Error::DeleteFailed { .. })
        ));
    }
}
