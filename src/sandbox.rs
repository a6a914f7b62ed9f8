//! Disposable-database validation of untrusted dumps.
//!
//! Before a dump is allowed anywhere near the live database it is executed
//! against a throwaway SQLite file. If the dump is malformed, contains a
//! forbidden statement, or produces no tables, validation fails and the live
//! database is never touched. The throwaway file is removed when the
//! [`Sandbox`] is dropped.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog;
use crate::errors::{BackupError, BackupResult};
use crate::validate;

/// A fully-executed dump living in a throwaway database file.
///
/// Holding a `Sandbox` proves the dump executed cleanly and created at least
/// one table. The backing file stays on disk for the lifetime of the value so
/// a migration can `ATTACH` it, and is deleted on drop.
#[derive(Debug)]
pub struct Sandbox {
    path: PathBuf,
    tables: Vec<String>,
}

impl Sandbox {
    /// Executes `sql` against a fresh disposable database under `work_dir`.
    ///
    /// The dump is scanned for dangerous statements before any file is
    /// created, so a hostile dump cannot leave artifacts behind.
    pub fn from_untrusted_sql(sql: &str, work_dir: &Path) -> BackupResult<Self> {
        if sql.trim().is_empty() {
            return Err(BackupError::empty_dump());
        }
        validate::scan_for_dangerous_statements(sql)?;

        fs::create_dir_all(work_dir).map_err(|e| {
            BackupError::io_error(e, "Failed to create sandbox directory").with_path(work_dir)
        })?;
        let path = work_dir.join(format!("validate_{}.db", Uuid::new_v4()));

        // Constructed before execution so the file is removed on every
        // failure path below.
        let mut sandbox = Sandbox {
            path,
            tables: Vec::new(),
        };
        sandbox.tables = sandbox.execute_and_inspect(sql)?;

        debug!(
            path = %sandbox.path.display(),
            tables = sandbox.tables.len(),
            "dump validated in disposable database"
        );
        Ok(sandbox)
    }

    fn execute_and_inspect(&self, sql: &str) -> BackupResult<Vec<String>> {
        let conn = Connection::open(&self.path).map_err(|e| {
            BackupError::execution_failed("Failed to create disposable database")
                .with_path(&self.path)
                .with_source(e)
        })?;

        // The sandbox never has to survive a crash, so durability is off.
        conn.execute_batch(
            "PRAGMA journal_mode = MEMORY;
             PRAGMA synchronous = OFF;
             PRAGMA foreign_keys = OFF;",
        )
        .map_err(|e| {
            BackupError::execution_failed("Failed to configure disposable database")
                .with_source(e)
        })?;

        conn.execute_batch(sql)
            .map_err(|e| BackupError::execution_failed("Dump failed to execute").with_source(e))?;

        let tables = catalog::user_tables(&conn, "main").map_err(|e| {
            BackupError::execution_failed("Failed to inspect disposable database").with_source(e)
        })?;

        conn.close().map_err(|(_, e)| {
            BackupError::execution_failed("Failed to close disposable database").with_source(e)
        })?;

        if tables.is_empty() {
            return Err(BackupError::execution_failed("Dump produced no tables"));
        }
        Ok(tables)
    }

    /// Path of the backing database file, suitable for `ATTACH DATABASE`.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User tables the dump created, in catalog order.
    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        for path in [
            self.path.clone(),
            sibling(&self.path, "-wal"),
            sibling(&self.path, "-shm"),
        ] {
            if !path.exists() {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove sandbox file");
            }
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackupErrorCode;
    use tempfile::TempDir;

    fn entry_count(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_rejects_empty_dump() {
        let tmp = TempDir::new().unwrap();
        for sql in ["", "   \n\t  "] {
            let err = Sandbox::from_untrusted_sql(sql, tmp.path()).unwrap_err();
            assert_eq!(err.code(), BackupErrorCode::EmptyDump);
        }
        assert_eq!(entry_count(tmp.path()), 0);
    }

    #[test]
    fn test_rejects_dangerous_dump_before_touching_disk() {
        let tmp = TempDir::new().unwrap();
        let work_dir = tmp.path().join("sandboxes");
        let err = Sandbox::from_untrusted_sql("ATTACH DATABASE 'evil.db' AS evil;", &work_dir)
            .unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::DangerousStatement);
        // Rejected during the textual scan, so not even the directory exists.
        assert!(!work_dir.exists());
    }

    #[test]
    fn test_rejects_dump_that_fails_to_execute() {
        let tmp = TempDir::new().unwrap();
        let err = Sandbox::from_untrusted_sql("CREATE TABLE broken (", tmp.path()).unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::ExecutionFailed);
        assert!(format!("{}", err).contains("caused by:"));
        assert_eq!(entry_count(tmp.path()), 0);
    }

    #[test]
    fn test_rejects_dump_that_creates_no_tables() {
        let tmp = TempDir::new().unwrap();
        let err =
            Sandbox::from_untrusted_sql("BEGIN TRANSACTION; COMMIT;", tmp.path()).unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::ExecutionFailed);
        assert!(err.message().contains("no tables"));
        assert_eq!(entry_count(tmp.path()), 0);
    }

    #[test]
    fn test_accepts_valid_dump() {
        let tmp = TempDir::new().unwrap();
        let sql = "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT);\n\
                   INSERT INTO students (id, name) VALUES (1, 'Ada');\n";
        let sandbox = Sandbox::from_untrusted_sql(sql, tmp.path()).unwrap();
        assert_eq!(sandbox.tables(), ["students"]);
        assert!(sandbox.path().exists());
        assert!(sandbox.path().starts_with(tmp.path()));
    }

    #[test]
    fn test_removes_backing_file_on_drop() {
        let tmp = TempDir::new().unwrap();
        let sandbox =
            Sandbox::from_untrusted_sql("CREATE TABLE t (id INTEGER);", tmp.path()).unwrap();
        let path = sandbox.path().to_path_buf();
        assert!(path.exists());
        drop(sandbox);
        assert!(!path.exists());
        assert_eq!(entry_count(tmp.path()), 0);
    }

    #[test]
    fn test_accepts_generated_dump() {
        let tmp = TempDir::new().unwrap();
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
             INSERT INTO students VALUES (1, 'Ada', 'ada@example.com');",
        )
        .unwrap();
        let dump = crate::dump::generate_dump(&conn, &[], true, false).unwrap();

        let sandbox = Sandbox::from_untrusted_sql(&dump, tmp.path()).unwrap();
        assert_eq!(sandbox.tables(), ["students"]);
    }
}
