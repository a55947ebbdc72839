//! Registry schema: persistent tables, session tables and SQL helpers.
//!
//! The persistent layout is created once per registry file and validated on
//! every later open. No migrations are performed; a file whose tables do not
//! carry the expected columns is rejected with [`RegistryError::Schema`].
//!
//! Session tables live in SQLite's `temp` schema and disappear with the
//! connection.

use crate::config::RegistryConfig;
use crate::error::StorageContext;
use crate::version::compare_versions;
use crate::{RegistryError, Result};
use regex::Regex;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Columns of the `ports` table, in declaration order.
///
/// `id` aliases the row id and is `AUTOINCREMENT`, so a deleted entry's id is
/// never handed to a later entry.
pub const PORT_COLUMNS: [&str; 11] = [
    "id", "name", "portfile", "url", "location", "epoch", "version", "revision", "variants", "state",
    "date",
];

const FILE_COLUMNS: [&str; 3] = ["port_id", "path", "mtime"];
const METADATA_COLUMNS: [&str; 2] = ["key", "value"];

/// Apply connection tuning pragmas.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL;\n\
         PRAGMA busy_timeout={};\n\
         PRAGMA synchronous=NORMAL;\n\
         PRAGMA temp_store=MEMORY;",
        RegistryConfig::BUSY_TIMEOUT_MS,
    ))
    .during("configure connection")?;
    Ok(())
}

/// Register the `VERSION` collation and the `NOW()` / `REGEXP` functions.
///
/// Must run before any statement touches the `ports` table, since its
/// version and revision columns (and the unique indexes over them) are
/// declared with the collation.
pub fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_collation(RegistryConfig::VERSION_COLLATION, compare_versions)
        .map_err(|e| schema_error("register VERSION collation", e))?;

    conn.create_scalar_function("now", 0, FunctionFlags::SQLITE_UTF8, |_ctx| {
        Ok(chrono::Utc::now().timestamp())
    })
    .map_err(|e| schema_error("register NOW function", e))?;

    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        sql_regexp,
    )
    .map_err(|e| schema_error("register REGEXP function", e))?;

    Ok(())
}

/// `X REGEXP Y` is evaluated by SQLite as `regexp(Y, X)`: pattern first.
///
/// The compiled pattern is kept as auxiliary data on argument 0, so a search
/// compiles it once per statement rather than once per row.
fn sql_regexp(ctx: &Context<'_>) -> rusqlite::Result<bool> {
    if matches!(ctx.get_raw(0), ValueRef::Null) {
        return Ok(false);
    }
    let Some(value) = value_text(ctx.get_raw(1)) else {
        return Ok(false);
    };
    let re: Arc<Regex> = ctx.get_or_create_aux(0, |pattern| {
        Regex::new(&value_text(pattern).unwrap_or_default())
    })?;
    Ok(re.is_match(&value))
}

fn value_text(value: ValueRef<'_>) -> Option<Cow<'_, str>> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Cow::Owned(i.to_string())),
        ValueRef::Real(f) => Some(Cow::Owned(f.to_string())),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(String::from_utf8_lossy(bytes)),
    }
}

/// Create the persistent tables on a fresh file, or validate them on an
/// existing one.
pub fn ensure_schema(conn: &mut Connection) -> Result<()> {
    let existing: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master
             WHERE type = 'table' AND name IN ('metadata', 'ports', 'files')",
            [],
            |row| row.get(0),
        )
        .during("inspect schema")?;

    if existing == 0 {
        create_tables(conn)
    } else {
        validate_tables(conn)
    }
}

fn create_tables(conn: &mut Connection) -> Result<()> {
    let tx = conn
        .transaction()
        .map_err(|e| schema_error("begin schema creation", e))?;

    tx.execute_batch(
        "CREATE TABLE metadata (key TEXT UNIQUE, value TEXT);

         CREATE TABLE ports (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT,
             portfile TEXT,
             url TEXT,
             location TEXT,
             epoch TEXT,
             version TEXT COLLATE VERSION,
             revision TEXT COLLATE VERSION,
             variants TEXT,
             state TEXT,
             date TEXT,
             UNIQUE (name, epoch, version, revision, variants),
             UNIQUE (url, epoch, version, revision, variants)
         );
         CREATE INDEX port_name ON ports (name, epoch, version, revision, variants);
         CREATE INDEX port_url ON ports (url, epoch, version, revision, variants);
         CREATE INDEX port_state ON ports (state);

         CREATE TABLE files (port_id INTEGER, path TEXT UNIQUE, mtime INTEGER);
         CREATE INDEX file_port ON files (port_id);",
    )
    .map_err(|e| schema_error("create tables", e))?;

    tx.execute(
        "INSERT INTO metadata (key, value) VALUES ('version', ?1)",
        params![RegistryConfig::SCHEMA_VERSION],
    )
    .map_err(|e| schema_error("record schema version", e))?;
    tx.execute(
        "INSERT INTO metadata (key, value) VALUES ('created', NOW())",
        [],
    )
    .map_err(|e| schema_error("record creation time", e))?;

    tx.commit().map_err(|e| schema_error("commit schema", e))?;
    debug!("Created registry schema v{}", RegistryConfig::SCHEMA_VERSION);
    Ok(())
}

fn validate_tables(conn: &Connection) -> Result<()> {
    require_columns(conn, "metadata", &METADATA_COLUMNS)?;
    require_columns(conn, "ports", &PORT_COLUMNS)?;
    require_columns(conn, "files", &FILE_COLUMNS)?;

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .during("read schema version")?;
    match version {
        Some(v) if v == RegistryConfig::SCHEMA_VERSION => Ok(()),
        Some(v) => Err(RegistryError::Schema {
            message: format!(
                "unsupported registry schema version {v} (expected {})",
                RegistryConfig::SCHEMA_VERSION
            ),
        }),
        None => Err(RegistryError::Schema {
            message: "registry metadata has no schema version".to_string(),
        }),
    }
}

fn require_columns(conn: &Connection, table: &str, expected: &[&str]) -> Result<()> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info(?1)")
        .during("inspect table columns")?;
    let columns = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))
        .during("inspect table columns")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .during("inspect table columns")?;

    if columns.is_empty() {
        return Err(RegistryError::Schema {
            message: format!("registry table '{table}' is missing"),
        });
    }
    let missing: Vec<&str> = expected
        .iter()
        .copied()
        .filter(|col| !columns.iter().any(|c| c.as_str() == *col))
        .collect();
    if !missing.is_empty() {
        return Err(RegistryError::Schema {
            message: format!(
                "registry table '{table}' is missing columns: {}",
                missing.join(", ")
            ),
        });
    }
    Ok(())
}

/// Create the per-session tables in the `temp` schema.
pub fn init_session(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TEMPORARY TABLE IF NOT EXISTS items (
             refcount, proc UNIQUE, name, url, path, worker, options, variants
         );
         CREATE TEMPORARY TABLE IF NOT EXISTS indexes (file, name, attached);
         CREATE TEMPORARY TABLE IF NOT EXISTS entry_handles (
             entry_id INTEGER UNIQUE, handle TEXT UNIQUE
         );",
    )
    .map_err(|e| schema_error("create session tables", e))?;
    Ok(())
}

fn schema_error(operation: &str, err: rusqlite::Error) -> RegistryError {
    RegistryError::Schema {
        message: format!("{operation}: {err}"),
    }
}
