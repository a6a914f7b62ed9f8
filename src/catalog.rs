//! Read-only catalog introspection.
//!
//! Helpers are schema-qualified so the same code serves the production
//! handle (`main`) and a database attached for migration. All functions
//! return `rusqlite::Result`; callers wrap failures with the error code
//! their context calls for.

use std::collections::{BTreeSet, HashMap};

use rusqlite::{Connection, OptionalExtension};

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A named schema object (index or trigger) and the table it belongs to.
#[derive(Debug, Clone)]
pub struct SchemaObject {
    /// Object name as stored in sqlite_master.
    pub name: String,
    /// Table the object is attached to.
    pub table: String,
    /// The stored `CREATE ...` statement.
    pub sql: String,
}

/// User tables in the given schema, excluding engine internals.
pub fn user_tables(conn: &Connection, schema: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!(
        "SELECT name FROM {}.sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        quote_ident(schema)
    );
    let mut stmt = conn.prepare(&sql)?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// The stored `CREATE TABLE` statement for a table, if the table exists.
pub fn table_sql(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<Option<String>> {
    let sql = format!(
        "SELECT sql FROM {}.sqlite_master WHERE type = 'table' AND name = ?1",
        quote_ident(schema)
    );
    let stored: Option<Option<String>> = conn
        .query_row(&sql, [table], |row| row.get(0))
        .optional()?;
    Ok(stored.flatten())
}

/// Named `CREATE INDEX` statements in the schema.
///
/// Auto-created indexes (primary key, unique constraints) have NULL sql
/// and are excluded; they come back with their `CREATE TABLE`.
pub fn index_statements(conn: &Connection, schema: &str) -> rusqlite::Result<Vec<SchemaObject>> {
    statements_of_type(conn, schema, "index")
}

/// `CREATE TRIGGER` statements in the schema.
pub fn trigger_statements(conn: &Connection, schema: &str) -> rusqlite::Result<Vec<SchemaObject>> {
    statements_of_type(conn, schema, "trigger")
}

fn statements_of_type(
    conn: &Connection,
    schema: &str,
    kind: &str,
) -> rusqlite::Result<Vec<SchemaObject>> {
    let sql = format!(
        "SELECT name, tbl_name, sql FROM {}.sqlite_master \
         WHERE type = ?1 AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%' ORDER BY name",
        quote_ident(schema)
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map([kind], |row| {
            Ok(SchemaObject {
                name: row.get(0)?,
                table: row.get(1)?,
                sql: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<SchemaObject>>>()?;
    Ok(entries)
}

/// Foreign-key target tables per table, restricted to the given set.
///
/// Self-references are dropped here; the sorter treats any edge it sees as
/// a hard ordering constraint.
pub fn foreign_key_targets(
    conn: &Connection,
    schema: &str,
    tables: &[String],
) -> rusqlite::Result<HashMap<String, BTreeSet<String>>> {
    let table_set: BTreeSet<&str> = tables.iter().map(String::as_str).collect();
    let mut deps = HashMap::new();
    for table in tables {
        let sql = format!(
            "PRAGMA {}.foreign_key_list({})",
            quote_ident(schema),
            quote_ident(table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let targets = stmt
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        let set: BTreeSet<String> = targets
            .into_iter()
            .filter(|t| table_set.contains(t.as_str()) && t != table)
            .collect();
        deps.insert(table.clone(), set);
    }
    Ok(deps)
}

/// Column names of a table, in declaration order.
pub fn table_columns(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!(
        "PRAGMA {}.table_info({})",
        quote_ident(schema),
        quote_ident(table)
    );
    let mut stmt = conn.prepare(&sql)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns)
}

/// Number of rows in a table.
pub fn row_count(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<u64> {
    let sql = format!(
        "SELECT COUNT(*) FROM {}.{}",
        quote_ident(schema),
        quote_ident(table)
    );
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count as u64)
}
