//! Logical dump generation.
//!
//! A dump is a UTF-8 SQL script: header comments, `PRAGMA foreign_keys=OFF;`,
//! then per table, in dependency order, the `CREATE TABLE` statement and one
//! `INSERT` per row, then the dumped tables' `CREATE INDEX` and
//! `CREATE TRIGGER` statements. Artifacts are optionally gzip-compressed on
//! the way to disk without holding the compressed output in memory.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::warn;

use crate::errors::{BackupError, BackupResult};
use crate::validate::QuotedIdentifier;
use crate::{catalog, order, validate};

const EMAIL_PLACEHOLDER: &str = "anonymous@example.com";
const PHONE_PLACEHOLDER: &str = "05XX XXX XX XX";
const NATIONAL_ID_PLACEHOLDER: &str = "XXXXXXXXXXX";
const ADDRESS_PLACEHOLDER: &str = "Anonymized Address";
const CONTACT_PLACEHOLDER: &str = "Anonymized Contact";

/// Generate a dump of the given tables (empty slice = all user tables).
///
/// Tables are emitted in foreign-key dependency order. With `anonymize`,
/// values in sensitive columns are replaced by fixed placeholders.
pub fn generate_dump(
    conn: &Connection,
    tables: &[String],
    include_schema: bool,
    anonymize: bool,
) -> BackupResult<String> {
    let requested: Vec<String> = if tables.is_empty() {
        catalog::user_tables(conn, "main").map_err(|e| wrap(e, "listing user tables"))?
    } else {
        tables.to_vec()
    };
    let deps = catalog::foreign_key_targets(conn, "main", &requested)
        .map_err(|e| wrap(e, "reading foreign keys"))?;
    let ordered = order::creation_order(&requested, &deps);

    let mut out = String::new();
    out.push_str("-- Rollbook database dump\n");
    out.push_str(&format!("-- Created: {}\n", Utc::now().to_rfc3339()));
    out.push_str(&format!("-- Tables: {}\n\n", ordered.join(", ")));
    out.push_str("PRAGMA foreign_keys=OFF;\n\n");

    for table in &ordered {
        let quoted = validate::validate_identifier(table)?;
        let create = catalog::table_sql(conn, "main", table)
            .map_err(|e| wrap(e, "reading table definition"))?
            .ok_or_else(|| {
                BackupError::dump_failed(format!("Table {} not found in catalog", table))
            })?;
        if include_schema {
            out.push_str(create.trim());
            out.push_str(";\n");
        }
        append_table_rows(conn, table, &quoted, anonymize, &mut out)?;
        out.push('\n');
    }

    if include_schema {
        append_secondary_statements(conn, &ordered, &mut out)?;
    }

    Ok(out)
}

fn append_table_rows(
    conn: &Connection,
    table: &str,
    quoted: &QuotedIdentifier,
    anonymize: bool,
    out: &mut String,
) -> BackupResult<()> {
    let columns =
        catalog::table_columns(conn, "main", table).map_err(|e| wrap(e, "reading columns"))?;
    if columns.is_empty() {
        return Ok(());
    }
    let quoted_columns = columns
        .iter()
        .map(|c| validate::validate_identifier(c))
        .collect::<BackupResult<Vec<QuotedIdentifier>>>()?;
    let column_list = quoted_columns
        .iter()
        .map(QuotedIdentifier::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders: Vec<Option<&'static str>> = columns
        .iter()
        .map(|c| if anonymize { placeholder_for(c) } else { None })
        .collect();

    let select = format!("SELECT {} FROM main.{}", column_list, quoted);
    let mut stmt = conn
        .prepare(&select)
        .map_err(|e| wrap(e, "preparing row read"))?;
    let mut rows = stmt.query([]).map_err(|e| wrap(e, "querying rows"))?;
    while let Some(row) = rows.next().map_err(|e| wrap(e, "reading row"))? {
        let mut values = Vec::with_capacity(columns.len());
        for (i, placeholder) in placeholders.iter().enumerate() {
            let value = row.get_ref(i).map_err(|e| wrap(e, "reading value"))?;
            values.push(render_value(value, *placeholder));
        }
        out.push_str(&format!(
            "INSERT INTO {} ({}) VALUES ({});\n",
            quoted,
            column_list,
            values.join(", ")
        ));
    }
    Ok(())
}

/// Appends `CREATE INDEX` then `CREATE TRIGGER` statements for the dumped
/// tables. Emitted after all row data so replay never fires a trigger
/// mid-load.
///
/// A statement the validator refuses is left out with a warning; the
/// artifact must stay replayable by the restore path.
fn append_secondary_statements(
    conn: &Connection,
    tables: &[String],
    out: &mut String,
) -> BackupResult<()> {
    let table_set: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

    let indexes =
        catalog::index_statements(conn, "main").map_err(|e| wrap(e, "reading indexes"))?;
    for index in indexes {
        if !table_set.contains(index.table.as_str()) {
            continue;
        }
        if let Err(e) = validate::validate_index_statement(&index.sql, &index.name) {
            warn!(index = %index.name, error = %e, "omitting index from dump");
            continue;
        }
        out.push_str(index.sql.trim());
        out.push_str(";\n");
    }

    let triggers =
        catalog::trigger_statements(conn, "main").map_err(|e| wrap(e, "reading triggers"))?;
    for trigger in triggers {
        if !table_set.contains(trigger.table.as_str()) {
            continue;
        }
        if let Err(e) = validate::validate_trigger_statement(&trigger.sql, &trigger.name) {
            warn!(trigger = %trigger.name, error = %e, "omitting trigger from dump");
            continue;
        }
        out.push_str(trigger.sql.trim());
        out.push_str(";\n");
    }
    Ok(())
}

fn wrap(err: rusqlite::Error, context: &str) -> BackupError {
    BackupError::dump_failed(format!("Dump generation failed while {}", context)).with_source(err)
}

/// Fixed placeholder for a sensitive column name, if any.
///
/// Matching is by lowercase substring; ordering matters so that
/// `parent_email` gets the email placeholder, not the contact one.
pub(crate) fn placeholder_for(column: &str) -> Option<&'static str> {
    let name = column.to_lowercase();
    if name.contains("email") {
        Some(EMAIL_PLACEHOLDER)
    } else if name.contains("phone") {
        Some(PHONE_PLACEHOLDER)
    } else if name.contains("national_id") || name.contains("tc_no") {
        Some(NATIONAL_ID_PLACEHOLDER)
    } else if name.contains("address") {
        Some(ADDRESS_PLACEHOLDER)
    } else if name.contains("parent") || name.contains("guardian") || name.contains("emergency") {
        Some(CONTACT_PLACEHOLDER)
    } else {
        None
    }
}

fn render_value(value: ValueRef<'_>, placeholder: Option<&str>) -> String {
    if let Some(text) = placeholder {
        // NULL stays NULL; only present values are masked
        if !matches!(value, ValueRef::Null) {
            return quote_text(text);
        }
    }
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(i) => i.to_string(),
        // SQLite has no infinity literal; 9e999 overflows back to it on
        // replay. NaN never reaches here, SQLite stores it as NULL.
        ValueRef::Real(f) if f.is_infinite() => {
            if f.is_sign_positive() {
                "9e999".to_string()
            } else {
                "-9e999".to_string()
            }
        }
        ValueRef::Real(f) => format!("{:?}", f),
        ValueRef::Text(t) => quote_text(&String::from_utf8_lossy(t)),
        ValueRef::Blob(b) => {
            let mut hex = String::with_capacity(b.len() * 2 + 3);
            hex.push_str("X'");
            for byte in b {
                hex.push_str(&format!("{:02X}", byte));
            }
            hex.push('\'');
            hex
        }
    }
}

fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Artifact filename for a backup taken at `at`.
pub fn artifact_filename(prefix: &str, at: DateTime<Utc>, compressed: bool) -> String {
    let stamp = at.format("%Y-%m-%d_%H-%M");
    if compressed {
        format!("{}_{}.sql.gz", prefix, stamp)
    } else {
        format!("{}_{}.sql", prefix, stamp)
    }
}

/// Write dump text to `dest`, optionally gzip-compressed, and return the
/// final artifact size in bytes.
///
/// Compression streams through a temp file next to the destination so the
/// compressed output never lives in memory; the temp file is removed
/// afterwards on every path.
pub fn write_artifact(text: &str, dest: &Path, compress: bool) -> BackupResult<u64> {
    if !compress {
        fs::write(dest, text)
            .map_err(|e| BackupError::io_error(e, "writing dump artifact").with_path(dest))?;
    } else {
        let tmp = tmp_sibling(dest);
        fs::write(&tmp, text)
            .map_err(|e| BackupError::io_error(e, "writing dump temp file").with_path(&tmp))?;
        let result = compress_file(&tmp, dest);
        if let Err(e) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %e, "failed to remove dump temp file");
        }
        result?;
    }
    let size = fs::metadata(dest)
        .map_err(|e| BackupError::io_error(e, "reading artifact size").with_path(dest))?
        .len();
    Ok(size)
}

fn tmp_sibling(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn compress_file(src: &Path, dest: &Path) -> BackupResult<()> {
    let mut reader = File::open(src)
        .map_err(|e| BackupError::io_error(e, "opening dump temp file").with_path(src))?;
    let out = File::create(dest)
        .map_err(|e| BackupError::io_error(e, "creating compressed artifact").with_path(dest))?;
    let mut encoder = GzEncoder::new(out, Compression::default());
    io::copy(&mut reader, &mut encoder)
        .map_err(|e| BackupError::io_error(e, "compressing dump").with_path(dest))?;
    encoder
        .finish()
        .map_err(|e| BackupError::io_error(e, "finishing compressed artifact").with_path(dest))?;
    Ok(())
}

/// Decode uploaded or stored dump bytes into SQL text.
pub fn decode_dump_bytes(bytes: &[u8], compressed: bool) -> BackupResult<String> {
    if compressed {
        let mut decoder = GzDecoder::new(bytes);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| {
                BackupError::execution_failed("Failed to decode compressed dump").with_source(e)
            })?;
        Ok(text)
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
