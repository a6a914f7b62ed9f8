//! Migration of a validated dump into the live database.
//!
//! Nothing from the uploaded text is replayed directly. The dump has already
//! been executed into a disposable database; every statement applied here is
//! re-derived from that database's own catalog and validated again
//! immediately before execution.

use std::path::Path;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::catalog;
use crate::errors::{BackupError, BackupResult};
use crate::order;
use crate::validate;

/// Schema alias the disposable database is attached under.
const INCOMING: &str = "incoming";

/// Row counts and skipped secondary objects from a completed migration.
#[derive(Debug, Default, Clone)]
pub struct MigrationSummary {
    /// Rows copied per table, in load order.
    pub table_rows: Vec<(String, u64)>,
    /// Indexes that failed validation or execution, by name.
    pub skipped_indexes: Vec<String>,
    /// Triggers that failed validation or execution, by name.
    pub skipped_triggers: Vec<String>,
}

impl MigrationSummary {
    /// Total rows copied across all tables.
    pub fn total_rows(&self) -> u64 {
        self.table_rows.iter().map(|(_, n)| n).sum()
    }
}

/// Replaces `tables` in the live database with their contents from the
/// disposable database at `source`.
///
/// Table replacement is all-or-nothing: any table failure rolls the whole
/// transaction back. Foreign-key enforcement is re-enabled on every exit
/// path, success or failure.
pub fn migrate(
    conn: &mut Connection,
    source: &Path,
    tables: &[String],
) -> BackupResult<MigrationSummary> {
    if tables.is_empty() {
        return Err(BackupError::migration_failed("No tables to migrate"));
    }

    // Must happen outside the transaction; SQLite ignores this pragma while
    // one is open.
    conn.pragma_update(None, "foreign_keys", 0).map_err(|e| {
        BackupError::migration_failed("Failed to disable foreign-key enforcement").with_source(e)
    })?;

    match replay(conn, source, tables) {
        Ok(summary) => {
            if let Err(e) = conn.pragma_update(None, "foreign_keys", 1) {
                detach_best_effort(conn);
                return Err(BackupError::migration_failed(
                    "Failed to re-enable foreign-key enforcement",
                )
                .with_source(e));
            }
            detach_best_effort(conn);
            info!(
                tables = summary.table_rows.len(),
                rows = summary.total_rows(),
                "migration committed"
            );
            Ok(summary)
        }
        Err(err) => {
            // Ordered compensating actions; one failing must not stop the
            // next.
            if let Err(e) = conn.execute_batch("ROLLBACK;") {
                warn!(error = %e, "rollback failed during migration cleanup");
            }
            detach_best_effort(conn);
            if let Err(e) = conn.pragma_update(None, "foreign_keys", 1) {
                warn!(error = %e, "failed to re-enable foreign-key enforcement");
            }
            Err(err)
        }
    }
}

fn replay(conn: &Connection, source: &Path, tables: &[String]) -> BackupResult<MigrationSummary> {
    let source_path = source.to_string_lossy().to_string();
    let attach = format!("ATTACH DATABASE ?1 AS {}", INCOMING);
    conn.execute(&attach, [source_path.as_str()]).map_err(|e| {
        BackupError::migration_failed("Failed to attach disposable database")
            .with_path(source)
            .with_source(e)
    })?;

    conn.execute_batch("BEGIN IMMEDIATE;").map_err(|e| {
        BackupError::migration_failed("Failed to open migration transaction").with_source(e)
    })?;

    let deps = catalog::foreign_key_targets(conn, INCOMING, tables).map_err(|e| {
        BackupError::migration_failed("Failed to read incoming foreign keys").with_source(e)
    })?;
    let load_order = order::creation_order(tables, &deps);

    let mut summary = MigrationSummary::default();
    for table in &load_order {
        let rows = replace_table(conn, table)?;
        summary.table_rows.push((table.clone(), rows));
    }

    replay_secondary(conn, &mut summary)?;

    conn.execute_batch("COMMIT;").map_err(|e| {
        BackupError::migration_failed("Failed to commit migration transaction").with_source(e)
    })?;
    Ok(summary)
}

/// Drops and recreates one table from the incoming catalog, then copies its
/// rows. Any failure here is fatal to the migration.
fn replace_table(conn: &Connection, table: &str) -> BackupResult<u64> {
    let quoted = validate::validate_identifier(table)?;

    conn.execute_batch(&format!("DROP TABLE IF EXISTS main.{}", quoted))
        .map_err(|e| {
            BackupError::migration_failed(format!("Failed to drop table {}", table))
                .with_source(e)
        })?;

    let create_sql = catalog::table_sql(conn, INCOMING, table)
        .map_err(|e| {
            BackupError::migration_failed(format!("Failed to read schema for table {}", table))
                .with_source(e)
        })?
        .ok_or_else(|| {
            BackupError::migration_failed(format!("Table {} missing from incoming catalog", table))
        })?;
    validate::validate_schema_statement(&create_sql, table)?;

    // Unqualified CREATE TABLE lands in the main schema.
    conn.execute_batch(&create_sql).map_err(|e| {
        BackupError::migration_failed(format!("Failed to create table {}", table)).with_source(e)
    })?;

    let rows = catalog::row_count(conn, INCOMING, table).map_err(|e| {
        BackupError::migration_failed(format!("Failed to count rows in table {}", table))
            .with_source(e)
    })?;
    if rows > 0 {
        let copy = format!(
            "INSERT INTO main.{q} SELECT * FROM {schema}.{q}",
            q = quoted,
            schema = INCOMING
        );
        conn.execute(&copy, []).map_err(|e| {
            BackupError::migration_failed(format!("Failed to copy rows into table {}", table))
                .with_source(e)
        })?;
    }
    Ok(rows)
}

/// Recreates indexes and triggers from the incoming catalog.
///
/// A missing index or trigger is recoverable after the fact, so failures
/// here are logged and skipped rather than aborting the migration.
fn replay_secondary(conn: &Connection, summary: &mut MigrationSummary) -> BackupResult<()> {
    let indexes = catalog::index_statements(conn, INCOMING).map_err(|e| {
        BackupError::migration_failed("Failed to read incoming indexes").with_source(e)
    })?;
    for index in indexes {
        let applied = validate::validate_index_statement(&index.sql, &index.name).and_then(|_| {
            conn.execute_batch(&index.sql).map_err(|e| {
                BackupError::migration_failed(format!("Failed to create index {}", index.name))
                    .with_source(e)
            })
        });
        if let Err(e) = applied {
            warn!(index = %index.name, error = %e, "skipping index");
            summary.skipped_indexes.push(index.name);
        }
    }

    let triggers = catalog::trigger_statements(conn, INCOMING).map_err(|e| {
        BackupError::migration_failed("Failed to read incoming triggers").with_source(e)
    })?;
    for trigger in triggers {
        let applied =
            validate::validate_trigger_statement(&trigger.sql, &trigger.name).and_then(|_| {
                conn.execute_batch(&trigger.sql).map_err(|e| {
                    BackupError::migration_failed(format!(
                        "Failed to create trigger {}",
                        trigger.name
                    ))
                    .with_source(e)
                })
            });
        if let Err(e) = applied {
            warn!(trigger = %trigger.name, error = %e, "skipping trigger");
            summary.skipped_triggers.push(trigger.name);
        }
    }
    Ok(())
}

fn detach_best_effort(conn: &Connection) {
    if let Err(e) = conn.execute_batch(&format!("DETACH DATABASE {};", INCOMING)) {
        warn!(error = %e, "failed to detach disposable database");
    }
}
