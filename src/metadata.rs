//! Per-backup metadata records, persisted as one JSON sidecar per id.

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::errors::{BackupError, BackupResult};

/// Lifecycle state of a backup. Moves strictly forward from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatus::Pending => "pending",
            BackupStatus::Completed => "completed",
            BackupStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// How a backup was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Manual,
    Automatic,
}

/// Metadata for one backup artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Unique backup id
    pub id: String,
    /// Artifact filename on disk
    pub filename: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Actor that requested the backup
    pub created_by: String,
    /// Final artifact size in bytes; 0 until completion
    pub size: u64,
    /// Manual or automatic
    #[serde(rename = "type")]
    pub kind: BackupType,
    /// Whether the artifact is gzip-compressed
    pub compressed: bool,
    /// Tables captured; empty means all tables at creation time
    pub tables: Vec<String>,
    /// Lifecycle state
    pub status: BackupStatus,
    /// Failure message, set only when status is `failed`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl BackupRecord {
    /// New pending record with a fresh id.
    pub fn pending(
        filename: impl Into<String>,
        created_by: impl Into<String>,
        kind: BackupType,
        compressed: bool,
        tables: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            created_at: Utc::now(),
            created_by: created_by.into(),
            size: 0,
            kind,
            compressed,
            tables,
            status: BackupStatus::Pending,
            error: None,
        }
    }

    /// Mark the backup completed with its final artifact size.
    ///
    /// Terminal records are left untouched.
    pub fn complete(&mut self, size: u64) {
        if self.status != BackupStatus::Pending {
            warn!(id = %self.id, status = %self.status, "ignoring completion of terminal record");
            return;
        }
        self.status = BackupStatus::Completed;
        self.size = size;
    }

    /// Mark the backup failed with the captured reason.
    ///
    /// Terminal records are left untouched.
    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status != BackupStatus::Pending {
            warn!(id = %self.id, status = %self.status, "ignoring failure of terminal record");
            return;
        }
        self.status = BackupStatus::Failed;
        self.error = Some(error.into());
    }
}

/// Sidecar store for [`BackupRecord`]s, one `<id>.json` file per record.
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist a record, replacing any previous version.
    pub fn save(&self, record: &BackupRecord) -> BackupResult<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            BackupError::io_error(e, "Failed to create metadata directory").with_path(&self.dir)
        })?;
        let path = self.record_path(&record.id);
        let contents = serde_json::to_string_pretty(record)?;

        // Write-then-rename keeps a crash from leaving a half-written record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents).map_err(|e| {
            BackupError::io_error(e, "Failed to write metadata record").with_path(&tmp)
        })?;
        fs::rename(&tmp, &path).map_err(|e| {
            BackupError::io_error(e, "Failed to finalize metadata record").with_path(&path)
        })?;
        Ok(())
    }

    /// Load a record by id.
    pub fn load(&self, id: &str) -> BackupResult<BackupRecord> {
        let path = self.record_path(id);
        let contents = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackupError::not_found(id)
            } else {
                BackupError::io_error(e, "Failed to read metadata record").with_path(&path)
            }
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            BackupError::metadata(format!("Malformed metadata record for backup {}", id))
                .with_path(&path)
                .with_source(e)
        })
    }

    /// All records, newest first.
    ///
    /// Unreadable or malformed sidecars are skipped so one corrupt file
    /// cannot take down the listing.
    pub fn list(&self) -> BackupResult<Vec<BackupRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(
                    BackupError::io_error(e, "Failed to read metadata directory")
                        .with_path(&self.dir),
                )
            }
        };

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                BackupError::io_error(e, "Failed to read metadata directory entry")
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(BackupError::from)
                .and_then(|c| serde_json::from_str::<BackupRecord>(&c).map_err(BackupError::from));
            match parsed {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable metadata record")
                }
            }
        }
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(records)
    }

    /// Remove a record. Missing records are tolerated; returns whether a
    /// file was actually deleted.
    pub fn delete(&self, id: &str) -> BackupResult<bool> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                Err(BackupError::io_error(e, "Failed to delete metadata record").with_path(&path))
            }
        }
    }
}
