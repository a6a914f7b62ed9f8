//! Error types for the backup subsystem.
//!
//! Every failure carries a stable `BACKUP_*` code so the surrounding
//! HTTP/CLI layer can classify errors without string matching.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Backup error code, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupErrorCode {
    /// Table or column name outside the allowed shape
    InvalidIdentifier,
    /// Catalog-derived CREATE TABLE statement failed validation
    UnsafeSchemaStatement,
    /// Catalog-derived CREATE INDEX statement failed validation
    UnsafeIndexStatement,
    /// Catalog-derived CREATE TRIGGER statement failed validation
    UnsafeTriggerStatement,
    /// Uploaded dump was empty or whitespace-only
    EmptyDump,
    /// Raw dump text tripped the coarse dangerous-keyword scan
    DangerousStatement,
    /// Disposable database could not run the dump, or it produced no tables
    ExecutionFailed,
    /// Dump generation against the live catalog failed
    DumpFailed,
    /// Production-side failure after validation passed
    MigrationFailed,
    /// No backup record with the requested id
    BackupNotFound,
    /// Download/restore requested on a non-completed record
    BackupNotCompleted,
    /// I/O failure reading or writing backup artifacts
    IoError,
    /// Metadata sidecar could not be serialized or parsed
    MetadataError,
}

impl BackupErrorCode {
    /// Returns the stable string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupErrorCode::InvalidIdentifier => "BACKUP_INVALID_IDENTIFIER",
            BackupErrorCode::UnsafeSchemaStatement => "BACKUP_UNSAFE_SCHEMA_STATEMENT",
            BackupErrorCode::UnsafeIndexStatement => "BACKUP_UNSAFE_INDEX_STATEMENT",
            BackupErrorCode::UnsafeTriggerStatement => "BACKUP_UNSAFE_TRIGGER_STATEMENT",
            BackupErrorCode::EmptyDump => "BACKUP_EMPTY_DUMP",
            BackupErrorCode::DangerousStatement => "BACKUP_DANGEROUS_STATEMENT",
            BackupErrorCode::ExecutionFailed => "BACKUP_EXECUTION_FAILED",
            BackupErrorCode::DumpFailed => "BACKUP_DUMP_FAILED",
            BackupErrorCode::MigrationFailed => "BACKUP_MIGRATION_FAILED",
            BackupErrorCode::BackupNotFound => "BACKUP_NOT_FOUND",
            BackupErrorCode::BackupNotCompleted => "BACKUP_NOT_COMPLETED",
            BackupErrorCode::IoError => "BACKUP_IO_ERROR",
            BackupErrorCode::MetadataError => "BACKUP_METADATA_ERROR",
        }
    }

    /// HTTP-equivalent status for API responses.
    ///
    /// Rejections of untrusted input are client-correctable (4xx);
    /// anything that failed after validation passed is server-side (5xx).
    pub fn status_code(&self) -> u16 {
        match self {
            BackupErrorCode::InvalidIdentifier
            | BackupErrorCode::UnsafeSchemaStatement
            | BackupErrorCode::UnsafeIndexStatement
            | BackupErrorCode::UnsafeTriggerStatement
            | BackupErrorCode::EmptyDump
            | BackupErrorCode::DangerousStatement => 400,
            BackupErrorCode::BackupNotFound => 404,
            BackupErrorCode::BackupNotCompleted => 409,
            BackupErrorCode::ExecutionFailed
            | BackupErrorCode::DumpFailed
            | BackupErrorCode::MigrationFailed
            | BackupErrorCode::IoError
            | BackupErrorCode::MetadataError => 500,
        }
    }
}

impl fmt::Display for BackupErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backup error with context.
#[derive(Debug)]
pub struct BackupError {
    code: BackupErrorCode,
    message: String,
    path: Option<PathBuf>,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackupError {
    /// Create a new backup error.
    pub fn new(code: BackupErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            source: None,
        }
    }

    /// Attach path context.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Identifier rejected by the allowed-shape check.
    pub fn invalid_identifier(name: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::InvalidIdentifier,
            format!("Invalid identifier: {:?}", name.into()),
        )
    }

    /// CREATE TABLE statement rejected during pre-flight validation.
    pub fn unsafe_schema_statement(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::UnsafeSchemaStatement,
            format!("Unsafe schema statement for {}: {}", table.into(), reason.into()),
        )
    }

    /// CREATE INDEX statement rejected during pre-flight validation.
    pub fn unsafe_index_statement(index: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::UnsafeIndexStatement,
            format!("Unsafe index statement for {}: {}", index.into(), reason.into()),
        )
    }

    /// CREATE TRIGGER statement rejected during pre-flight validation.
    pub fn unsafe_trigger_statement(trigger: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::UnsafeTriggerStatement,
            format!("Unsafe trigger statement for {}: {}", trigger.into(), reason.into()),
        )
    }

    /// Empty or whitespace-only dump.
    pub fn empty_dump() -> Self {
        Self::new(BackupErrorCode::EmptyDump, "Dump is empty")
    }

    /// Coarse pre-check found a forbidden pattern in the raw dump text.
    pub fn dangerous_statement(pattern: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::DangerousStatement,
            format!("Dump contains forbidden pattern: {}", pattern.into()),
        )
    }

    /// Disposable database failed to execute or verify the dump.
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::ExecutionFailed, message)
    }

    /// Dump generation against the live catalog failed.
    pub fn dump_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::DumpFailed, message)
    }

    /// Migration into the production database failed.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::MigrationFailed, message)
    }

    /// No record with the given backup id.
    pub fn not_found(backup_id: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::BackupNotFound,
            format!("Backup not found: {}", backup_id.into()),
        )
    }

    /// Record exists but is not in the `completed` state.
    pub fn not_completed(backup_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::new(
            BackupErrorCode::BackupNotCompleted,
            format!(
                "Backup {} is not completed (status: {})",
                backup_id.into(),
                status.into()
            ),
        )
    }

    /// I/O error with context.
    pub fn io_error(err: io::Error, context: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::IoError, context).with_source(err)
    }

    /// Metadata serialization or parse failure.
    pub fn metadata(message: impl Into<String>) -> Self {
        Self::new(BackupErrorCode::MetadataError, message)
    }

    /// Get the error code.
    pub fn code(&self) -> BackupErrorCode {
        self.code
    }

    /// Get the message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the path if present.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (path: {})", path.display())?;
        }
        if let Some(ref source) = self.source {
            write!(f, " (caused by: {})", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for BackupError {
    fn from(err: io::Error) -> Self {
        Self::io_error(err, "I/O operation failed")
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::metadata("Metadata serialization failed").with_source(err)
    }
}

/// Result type for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(
            BackupErrorCode::InvalidIdentifier.as_str(),
            "BACKUP_INVALID_IDENTIFIER"
        );
        assert_eq!(
            BackupErrorCode::MigrationFailed.as_str(),
            "BACKUP_MIGRATION_FAILED"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(BackupErrorCode::DangerousStatement.status_code(), 400);
        assert_eq!(BackupErrorCode::BackupNotFound.status_code(), 404);
        assert_eq!(BackupErrorCode::BackupNotCompleted.status_code(), 409);
        assert_eq!(BackupErrorCode::ExecutionFailed.status_code(), 500);
    }

    #[test]
    fn test_error_display() {
        let err = BackupError::not_found("backup-123");
        let display = format!("{}", err);
        assert!(display.contains("BACKUP_NOT_FOUND"));
        assert!(display.contains("backup-123"));
    }

    #[test]
    fn test_error_with_path_and_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = BackupError::io_error(io_err, "reading artifact").with_path("/tmp/b.sql");
        assert_eq!(err.code(), BackupErrorCode::IoError);
        assert!(err.path().is_some());
        let display = format!("{}", err);
        assert!(display.contains("caused by"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let backup_err: BackupError = io_err.into();
        assert_eq!(backup_err.code(), BackupErrorCode::IoError);
    }

    #[test]
    fn test_not_completed_names_status() {
        let err = BackupError::not_completed("b-1", "pending");
        assert!(err.message().contains("pending"));
    }
}
