//! Backup configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Backup subsystem configuration.
///
/// Constructed by the host application; this crate does not load config
/// files itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding backup artifacts and their metadata sidecars
    pub backup_dir: PathBuf,
    /// Maximum number of backups to retain
    pub max_backups: u32,
    /// Prefix for generated artifact filenames
    pub prefix: String,
    /// Enable automatic backups
    pub enabled: bool,
    /// Automatic backup interval in hours
    pub interval_hours: u32,
}

impl BackupConfig {
    /// Create a config with defaults rooted at the given directory.
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("backups"),
            max_backups: 7,
            prefix: "rollbook".to_string(),
            enabled: false,
            interval_hours: 24,
        }
    }
}
