//! Identifier and statement validation for untrusted dumps.
//!
//! Everything replayed into production passes through here first. The rules
//! are deliberately narrow: accept only the statement shapes this subsystem
//! generates itself, reject everything else. Validation runs twice per
//! restore: a coarse scan over the raw upload before any I/O, then
//! statement-by-statement checks on the catalog-derived SQL pulled out of
//! the disposable database.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{BackupError, BackupResult};

/// An identifier that passed validation, quoted for safe interpolation
/// into generated SQL. The only sanctioned way to build an
/// identifier-bearing statement from a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedIdentifier(String);

impl QuotedIdentifier {
    /// The quoted form, including surrounding double quotes.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QuotedIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

fn fk_action_clauses() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\bON\s+(DELETE|UPDATE)\s+(CASCADE|SET\s+NULL|SET\s+DEFAULT|RESTRICT|NO\s+ACTION)\b")
            .expect("valid regex")
    })
}

fn schema_banned() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(DROP|DELETE|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX)\b")
            .expect("valid regex")
    })
}

fn index_banned() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(DROP|DELETE|UPDATE|ALTER|TRUNCATE|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX)\b")
            .expect("valid regex")
    })
}

fn trigger_banned() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(DROP|ATTACH|DETACH|PRAGMA|VACUUM|REINDEX)\b").expect("valid regex")
    })
}

fn dangerous_patterns() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:DROP|ATTACH|DETACH)\s+DATABASE\b|\bPRAGMA\s+(?:load_extension|writable_schema)\b")
            .expect("valid regex")
    })
}

/// Validate a table or column name and return it quoted.
///
/// Accepts only `[A-Za-z_][A-Za-z0-9_]*`; embedded double quotes in the
/// output are doubled per SQL quoting rules.
pub fn validate_identifier(name: &str) -> BackupResult<QuotedIdentifier> {
    if !identifier_pattern().is_match(name) {
        return Err(BackupError::invalid_identifier(name));
    }
    Ok(QuotedIdentifier(format!("\"{}\"", name.replace('"', "\"\""))))
}

/// Validate a catalog-derived `CREATE TABLE` statement before replay.
pub fn validate_schema_statement(sql: &str, table: &str) -> BackupResult<()> {
    let trimmed = sql.trim();
    if !trimmed.to_uppercase().starts_with("CREATE TABLE") {
        return Err(BackupError::unsafe_schema_statement(
            table,
            "statement does not start with CREATE TABLE",
        ));
    }
    // ON DELETE / ON UPDATE actions are the one legitimate place the
    // banned keywords appear inside a table definition.
    let stripped = fk_action_clauses().replace_all(trimmed, "");
    if let Some(found) = schema_banned().find(&stripped) {
        return Err(BackupError::unsafe_schema_statement(
            table,
            format!("contains forbidden keyword {}", found.as_str()),
        ));
    }
    ensure_single_statement(trimmed)
        .map_err(|reason| BackupError::unsafe_schema_statement(table, reason))
}

/// Validate a catalog-derived `CREATE INDEX` statement before replay.
pub fn validate_index_statement(sql: &str, index: &str) -> BackupResult<()> {
    let upper = sql.trim().to_uppercase();
    if !upper.starts_with("CREATE INDEX") && !upper.starts_with("CREATE UNIQUE INDEX") {
        return Err(BackupError::unsafe_index_statement(
            index,
            "statement does not start with CREATE [UNIQUE] INDEX",
        ));
    }
    if let Some(found) = index_banned().find(sql.trim()) {
        return Err(BackupError::unsafe_index_statement(
            index,
            format!("contains forbidden keyword {}", found.as_str()),
        ));
    }
    Ok(())
}

/// Validate a catalog-derived `CREATE TRIGGER` statement before replay.
///
/// Trigger bodies legitimately contain INSERT/UPDATE/DELETE, so the banned
/// list here is shorter than for indexes.
pub fn validate_trigger_statement(sql: &str, trigger: &str) -> BackupResult<()> {
    if !sql.trim().to_uppercase().starts_with("CREATE TRIGGER") {
        return Err(BackupError::unsafe_trigger_statement(
            trigger,
            "statement does not start with CREATE TRIGGER",
        ));
    }
    if let Some(found) = trigger_banned().find(sql.trim()) {
        return Err(BackupError::unsafe_trigger_statement(
            trigger,
            format!("contains forbidden keyword {}", found.as_str()),
        ));
    }
    Ok(())
}

/// Coarse pre-check over raw dump text, run before any sandbox file is
/// created. Cheap fail-fast; the real gate is the per-statement validation
/// above.
pub fn scan_for_dangerous_statements(text: &str) -> BackupResult<()> {
    if let Some(found) = dangerous_patterns().find(text) {
        return Err(BackupError::dangerous_statement(found.as_str()));
    }
    Ok(())
}

fn ensure_single_statement(sql: &str) -> Result<(), String> {
    let statements = sql.split(';').filter(|s| !s.trim().is_empty()).count();
    if statements > 1 {
        Err(format!("contains {} statements, expected one", statements))
    } else {
        Ok(())
    }
}
