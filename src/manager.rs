//! Backup orchestration.
//!
//! Composes the dump generator, disposable-database validator, migration
//! engine, and metadata store into the operations the surrounding
//! application calls: create, list, download, restore, upload-and-restore,
//! delete.

use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::dump;
use crate::errors::{BackupError, BackupErrorCode, BackupResult};
use crate::metadata::{BackupRecord, BackupStatus, BackupType, MetadataStore};
use crate::migrate::{self, MigrationSummary};
use crate::sandbox::Sandbox;

/// Options for a single backup creation.
#[derive(Debug, Clone)]
pub struct CreateOptions {
    /// Tables to capture; empty means every user table.
    pub tables: Vec<String>,
    /// Emit schema statements (CREATE TABLE, indexes, triggers).
    pub include_schema: bool,
    /// Replace sensitive column values with fixed placeholders.
    pub anonymize: bool,
    /// Gzip the artifact.
    pub compress: bool,
}

impl Default for CreateOptions {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            include_schema: true,
            anonymize: false,
            compress: true,
        }
    }
}

/// A completed backup artifact read back for the caller.
#[derive(Debug, Clone)]
pub struct BackupDownload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub size: u64,
    pub compressed: bool,
}

/// Aggregate view over all stored backups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOverview {
    pub last_backup: Option<DateTime<Utc>>,
    pub backup_count: u32,
    pub total_size: u64,
}

/// Entry point for all backup and restore operations.
///
/// Operations are synchronous and expect at most one `create` or restore
/// running at a time; the embedded database serializes writers and the
/// `&mut Connection` taken by the restore paths keeps a single caller from
/// overlapping them on one handle.
pub struct BackupManager {
    config: BackupConfig,
    store: MetadataStore,
}

impl BackupManager {
    /// Create a manager rooted at `config.backup_dir`, creating the
    /// directory if needed. Metadata records live next to the artifacts.
    pub fn new(config: BackupConfig) -> BackupResult<Self> {
        fs::create_dir_all(&config.backup_dir).map_err(|e| {
            BackupError::io_error(e, "Failed to create backup directory")
                .with_path(&config.backup_dir)
        })?;
        let store = MetadataStore::new(&config.backup_dir);
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Create a new backup of the live database.
    ///
    /// The record is persisted as `pending` before any dump work starts and
    /// flipped exactly once. A failed creation keeps its record, marked
    /// `failed` with the reason, as a forensic trail.
    pub fn create(
        &self,
        conn: &Connection,
        actor: &str,
        kind: BackupType,
        options: &CreateOptions,
    ) -> BackupResult<BackupRecord> {
        let created_at = Utc::now();
        let filename = dump::artifact_filename(&self.config.prefix, created_at, options.compress);
        let mut record = BackupRecord::pending(
            &filename,
            actor,
            kind,
            options.compress,
            options.tables.clone(),
        );
        record.created_at = created_at;
        self.store.save(&record)?;

        match self.write_dump(conn, &filename, options) {
            Ok(size) => {
                record.complete(size);
                self.store.save(&record)?;
                info!(id = %record.id, filename = %record.filename, size, "backup created");
                if let Err(e) = self.cleanup_old_backups() {
                    warn!(error = %e, "retention cleanup failed");
                }
                Ok(record)
            }
            Err(e) => {
                record.fail(e.to_string());
                if let Err(save_err) = self.store.save(&record) {
                    warn!(id = %record.id, error = %save_err, "failed to persist failure state");
                }
                Err(e)
            }
        }
    }

    fn write_dump(
        &self,
        conn: &Connection,
        filename: &str,
        options: &CreateOptions,
    ) -> BackupResult<u64> {
        let text = dump::generate_dump(
            conn,
            &options.tables,
            options.include_schema,
            options.anonymize,
        )?;
        let dest = self.artifact_path(filename);
        dump::write_artifact(&text, &dest, options.compress)
    }

    /// All backup records, newest first.
    pub fn list(&self) -> BackupResult<Vec<BackupRecord>> {
        self.store.list()
    }

    /// Read a completed backup's artifact for the caller.
    ///
    /// Pending and failed backups are refused; they have no trustworthy
    /// artifact to hand out.
    pub fn download(&self, id: &str) -> BackupResult<BackupDownload> {
        let record = self.store.load(id)?;
        if record.status != BackupStatus::Completed {
            return Err(BackupError::not_completed(id, record.status.to_string()));
        }

        let path = self.artifact_path(&record.filename);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackupError::not_found(id).with_path(&path)
            } else {
                BackupError::io_error(e, "Failed to read backup artifact").with_path(&path)
            }
        })?;
        let size = bytes.len() as u64;
        Ok(BackupDownload {
            bytes,
            filename: record.filename,
            size,
            compressed: record.compressed,
        })
    }

    /// Restore a stored backup into the live database.
    pub fn restore(&self, conn: &mut Connection, id: &str) -> BackupResult<MigrationSummary> {
        let download = self.download(id)?;
        info!(id, filename = %download.filename, "restoring stored backup");
        self.restore_dump_bytes(conn, &download.bytes, download.compressed)
    }

    /// Validate an uploaded dump and migrate it into the live database.
    ///
    /// The upload never executes against production directly; it runs in a
    /// disposable database first and only its catalog is replayed.
    pub fn upload_and_restore(
        &self,
        conn: &mut Connection,
        bytes: &[u8],
        filename: &str,
        compressed: bool,
    ) -> BackupResult<MigrationSummary> {
        info!(filename, compressed, size = bytes.len(), "restoring uploaded dump");
        self.restore_dump_bytes(conn, bytes, compressed)
    }

    fn restore_dump_bytes(
        &self,
        conn: &mut Connection,
        bytes: &[u8],
        compressed: bool,
    ) -> BackupResult<MigrationSummary> {
        let text = dump::decode_dump_bytes(bytes, compressed)?;
        let sandbox = Sandbox::from_untrusted_sql(&text, &self.sandbox_dir())?;
        migrate::migrate(conn, sandbox.path(), sandbox.tables())
    }

    /// Delete a backup's artifact and metadata record.
    ///
    /// Both removals are attempted independently; absence of either is
    /// tolerated, so calling this twice is harmless.
    pub fn delete(&self, id: &str) -> BackupResult<()> {
        let artifact_result = match self.store.load(id) {
            Ok(record) => {
                let path = self.artifact_path(&record.filename);
                match fs::remove_file(&path) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(BackupError::io_error(e, "Failed to delete backup artifact")
                        .with_path(&path)),
                }
            }
            Err(e) if e.code() == BackupErrorCode::BackupNotFound => Ok(()),
            Err(e) => Err(e),
        };

        let removed = self.store.delete(id)?;
        artifact_result?;
        if removed {
            info!(id, "backup deleted");
        }
        Ok(())
    }

    /// Delete the oldest records beyond the retention cap.
    ///
    /// Runs after every successful creation; individual delete failures are
    /// logged and skipped so one stuck file cannot wedge retention.
    pub fn cleanup_old_backups(&self) -> BackupResult<u32> {
        let mut records = self.store.list()?;
        let max_backups = self.config.max_backups as usize;
        if records.len() <= max_backups {
            return Ok(0);
        }

        let mut deleted = 0u32;
        while records.len() > max_backups {
            if let Some(oldest) = records.pop() {
                match self.delete(&oldest.id) {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        warn!(id = %oldest.id, error = %e, "failed to delete expired backup")
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// Aggregate counts and sizes across all records.
    pub fn status(&self) -> BackupResult<BackupOverview> {
        let records = self.store.list()?;
        Ok(BackupOverview {
            last_backup: records.first().map(|r| r.created_at),
            backup_count: records.len() as u32,
            total_size: records.iter().map(|r| r.size).sum(),
        })
    }

    fn artifact_path(&self, filename: &str) -> PathBuf {
        self.config.backup_dir.join(filename)
    }

    fn sandbox_dir(&self) -> PathBuf {
        self.config.backup_dir.join(".validate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_manager(tmp: &TempDir) -> BackupManager {
        let mut config = BackupConfig::new(tmp.path().join("backups"));
        config.max_backups = 3;
        BackupManager::new(config).unwrap()
    }

    fn seeded_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
             CREATE TABLE notes (id INTEGER PRIMARY KEY, student_id INTEGER REFERENCES students(id), body TEXT);
             CREATE INDEX idx_notes_student ON notes(student_id);
             CREATE TRIGGER trg_note_added AFTER INSERT ON notes
             BEGIN
                 UPDATE students SET name = name WHERE id = NEW.student_id;
             END;
             INSERT INTO students VALUES (1, 'Ada', 'ada@example.com');
             INSERT INTO students VALUES (2, 'Grace', 'grace@example.com');
             INSERT INTO notes VALUES (1, 1, 'first note');
             INSERT INTO notes VALUES (2, 2, 'second note');",
        )
        .unwrap();
        conn
    }

    fn plain_options() -> CreateOptions {
        CreateOptions {
            compress: false,
            ..CreateOptions::default()
        }
    }

    #[test]
    fn test_create_writes_artifact_and_record() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();

        let record = manager
            .create(&conn, "admin", BackupType::Manual, &plain_options())
            .unwrap();

        assert_eq!(record.status, BackupStatus::Completed);
        assert!(record.filename.ends_with(".sql"));
        let artifact = manager.config().backup_dir.join(&record.filename);
        assert!(artifact.exists());
        assert_eq!(record.size, fs::metadata(&artifact).unwrap().len());

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, record.id);
    }

    #[test]
    fn test_create_compressed_artifact() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();

        let record = manager
            .create(&conn, "admin", BackupType::Automatic, &CreateOptions::default())
            .unwrap();
        assert!(record.filename.ends_with(".sql.gz"));
        assert!(record.compressed);
        assert!(record.size > 0);
    }

    #[test]
    fn test_create_failure_keeps_failed_record() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();

        let options = CreateOptions {
            tables: vec!["no_such_table".to_string()],
            ..plain_options()
        };
        manager
            .create(&conn, "admin", BackupType::Manual, &options)
            .unwrap_err();

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, BackupStatus::Failed);
        assert!(listed[0].error.as_deref().unwrap().contains("no_such_table"));
    }

    #[test]
    fn test_round_trip_restore() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let source = seeded_db();
        let record = manager
            .create(&source, "admin", BackupType::Manual, &plain_options())
            .unwrap();

        // A live database that has drifted since the backup.
        let mut live = Connection::open(tmp.path().join("live.db")).unwrap();
        live.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
             INSERT INTO students VALUES (99, 'Drift', 'drift@example.com');",
        )
        .unwrap();

        let summary = manager.restore(&mut live, &record.id).unwrap();
        assert_eq!(summary.total_rows(), 4);

        let students: i64 = live
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .unwrap();
        let notes: i64 = live
            .query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))
            .unwrap();
        assert_eq!((students, notes), (2, 2));
        let drift: i64 = live
            .query_row("SELECT COUNT(*) FROM students WHERE id = 99", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(drift, 0);
    }

    #[test]
    fn test_restore_recreates_indexes_and_triggers() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let source = seeded_db();
        let record = manager
            .create(&source, "admin", BackupType::Manual, &plain_options())
            .unwrap();

        let mut live = Connection::open(tmp.path().join("live.db")).unwrap();
        let summary = manager.restore(&mut live, &record.id).unwrap();
        assert!(summary.skipped_indexes.is_empty());
        assert!(summary.skipped_triggers.is_empty());

        let indexes: i64 = live
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_notes_student'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let triggers: i64 = live
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = 'trg_note_added'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!((indexes, triggers), (1, 1));
    }

    #[test]
    fn test_download_refuses_unfinished_backups() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();

        let options = CreateOptions {
            tables: vec!["no_such_table".to_string()],
            ..plain_options()
        };
        manager
            .create(&conn, "admin", BackupType::Manual, &options)
            .unwrap_err();
        let failed_id = manager.list().unwrap()[0].id.clone();

        let err = manager.download(&failed_id).unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::BackupNotCompleted);
        assert_eq!(err.code().status_code(), 409);

        // A record still pending is refused the same way.
        let store = MetadataStore::new(&manager.config().backup_dir);
        let pending = BackupRecord::pending("p.sql", "admin", BackupType::Manual, false, Vec::new());
        store.save(&pending).unwrap();
        let err = manager.download(&pending.id).unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::BackupNotCompleted);
    }

    #[test]
    fn test_download_returns_artifact_bytes() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();
        let record = manager
            .create(&conn, "admin", BackupType::Manual, &plain_options())
            .unwrap();

        let download = manager.download(&record.id).unwrap();
        assert_eq!(download.filename, record.filename);
        assert_eq!(download.size, record.size);
        assert!(!download.compressed);
        let text = String::from_utf8(download.bytes).unwrap();
        assert!(text.contains("CREATE TABLE students"));
    }

    #[test]
    fn test_upload_and_restore_plain_dump() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let mut live = Connection::open(tmp.path().join("live.db")).unwrap();

        let dump = "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT);
                    INSERT INTO students VALUES (1, 'Ada');";
        let summary = manager
            .upload_and_restore(&mut live, dump.as_bytes(), "upload.sql", false)
            .unwrap();
        assert_eq!(summary.total_rows(), 1);

        let count: i64 = live
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // Sandbox files are cleaned up after the migration.
        let sandbox_dir = manager.config().backup_dir.join(".validate");
        let leftovers = fs::read_dir(&sandbox_dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_upload_and_restore_rejects_dangerous_dump() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let mut live = Connection::open(tmp.path().join("live.db")).unwrap();
        live.execute_batch("CREATE TABLE students (id INTEGER PRIMARY KEY);")
            .unwrap();

        let dump = "ATTACH DATABASE '/tmp/evil.db' AS evil;";
        let err = manager
            .upload_and_restore(&mut live, dump.as_bytes(), "evil.sql", false)
            .unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::DangerousStatement);

        // Production untouched.
        let count: i64 = live
            .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_delete_removes_both_and_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();
        let record = manager
            .create(&conn, "admin", BackupType::Manual, &plain_options())
            .unwrap();
        let artifact = manager.config().backup_dir.join(&record.filename);
        assert!(artifact.exists());

        manager.delete(&record.id).unwrap();
        assert!(!artifact.exists());
        assert!(manager.list().unwrap().is_empty());

        // Second delete tolerates both absences.
        manager.delete(&record.id).unwrap();
    }

    #[test]
    fn test_cleanup_old_backups_evicts_oldest() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let store = MetadataStore::new(&manager.config().backup_dir);
        let now = Utc::now();

        for i in 0..5u32 {
            let filename = format!("seed_{}.sql", i);
            let mut record = BackupRecord::pending(
                &filename,
                "admin",
                BackupType::Automatic,
                false,
                Vec::new(),
            );
            record.id = format!("b-{}", i);
            record.created_at = now - chrono::Duration::hours((5 - i) as i64);
            record.complete(4);
            store.save(&record).unwrap();
            fs::write(manager.config().backup_dir.join(&filename), "-- x").unwrap();
        }

        let deleted = manager.cleanup_old_backups().unwrap();
        assert_eq!(deleted, 2);

        let remaining: Vec<String> = manager.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(remaining, ["b-4", "b-3", "b-2"]);
        assert!(!manager.config().backup_dir.join("seed_0.sql").exists());
        assert!(!manager.config().backup_dir.join("seed_1.sql").exists());
        assert!(manager.config().backup_dir.join("seed_2.sql").exists());
    }

    #[test]
    fn test_status_aggregates_records() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let conn = seeded_db();

        assert_eq!(manager.status().unwrap().backup_count, 0);

        let record = manager
            .create(&conn, "admin", BackupType::Manual, &plain_options())
            .unwrap();
        let status = manager.status().unwrap();
        assert_eq!(status.backup_count, 1);
        assert_eq!(status.total_size, record.size);
        assert_eq!(status.last_backup, Some(record.created_at));
    }

    #[test]
    fn test_restore_unknown_id() {
        let tmp = TempDir::new().unwrap();
        let manager = test_manager(&tmp);
        let mut live = Connection::open_in_memory().unwrap();
        let err = manager.restore(&mut live, "ghost").unwrap_err();
        assert_eq!(err.code(), BackupErrorCode::BackupNotFound);
    }
}
