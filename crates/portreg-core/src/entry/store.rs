//! Entry CRUD and search against the `ports` table.
//!
//! Column names only ever come from [`EntryProperty::as_str`]; every value
//! supplied by a caller is bound as a query parameter.

use super::{EntryId, EntryProperty, EntryRecord, EntryState, MatchStrategy};
use crate::config::RegistryConfig;
use crate::error::StorageContext;
use crate::files;
use crate::{RegistryError, Result};
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

const SELECT_RECORD: &str = "SELECT rowid, name, portfile, url, location, epoch, version,
        revision, variants, state, date
 FROM ports";

/// Insert a new entry in the `imported` state, stamped with the current time.
///
/// Fails with [`RegistryError::Duplicate`] if an entry with the same
/// (name, epoch, version, revision, variants) already exists. Versions are
/// compared with the version collation, so `1.0` and `1.00` collide.
pub fn create(
    conn: &mut Connection,
    name: &str,
    version: &str,
    revision: u64,
    variants: &str,
    epoch: u64,
) -> Result<EntryId> {
    let duplicate = || RegistryError::Duplicate {
        name: name.to_string(),
        epoch,
        version: version.to_string(),
        revision,
        variants: variants.to_string(),
    };

    let tx = conn.transaction().during("begin create entry")?;

    let existing = find(&tx, name, version, revision, variants, epoch)?;
    if existing.is_some() {
        return Err(duplicate());
    }

    let inserted = tx.execute(
        "INSERT INTO ports (name, epoch, version, revision, variants, state, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NOW())",
        params![
            name,
            epoch.to_string(),
            version,
            revision.to_string(),
            variants,
            RegistryConfig::INITIAL_STATE,
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            return Err(duplicate());
        }
        Err(err) => return Err(RegistryError::storage("create entry", err)),
    }
    let id = EntryId(tx.last_insert_rowid());

    tx.commit().during("commit create entry")?;
    debug!(
        "Created entry {}: {} @{}:{}_{} {}",
        id, name, epoch, version, revision, variants
    );
    Ok(id)
}

/// Delete each entry in `ids`, releasing the files it owns.
///
/// Stops at the first id with no row, returning [`RegistryError::InvalidEntry`]
/// wrapped in [`RegistryError::Partial`]. Entries deleted before the failure
/// stay deleted; the count in the error is authoritative.
pub fn delete(conn: &mut Connection, ids: &[EntryId]) -> Result<usize> {
    let tx = conn.transaction().during("begin delete entries")?;

    let mut failure = None;
    for (done, id) in ids.iter().enumerate() {
        match delete_one(&tx, *id) {
            Ok(()) => {}
            Err(err) => {
                failure = Some(err.after(done));
                break;
            }
        }
    }

    tx.commit().during("commit delete entries")?;
    match failure {
        Some(err) => Err(err),
        None => Ok(ids.len()),
    }
}

fn delete_one(conn: &Connection, id: EntryId) -> Result<()> {
    let removed = conn
        .execute("DELETE FROM ports WHERE rowid = ?1", params![id.0])
        .during("delete entry")?;
    if removed == 0 {
        return Err(RegistryError::InvalidEntry { id: id.0 });
    }
    let released = files::unmap_all(conn, id)?;
    debug!("Deleted entry {} (released {} files)", id, released);
    Ok(())
}

/// Read one property. `None` means the property has never been set.
pub fn get_property(conn: &Connection, id: EntryId, prop: EntryProperty) -> Result<Option<String>> {
    let sql = format!("SELECT {} FROM ports WHERE rowid = ?1", prop.as_str());
    let value: Option<Option<String>> = conn
        .query_row(&sql, params![id.0], |row| row.get(0))
        .optional()
        .during("read entry property")?;
    value.ok_or(RegistryError::InvalidEntry { id: id.0 })
}

/// Overwrite one property.
///
/// `epoch` and `revision` only accept non-negative integers. A write that
/// would break either uniqueness tuple fails with
/// [`RegistryError::Constraint`] and leaves the row unchanged.
pub fn set_property(conn: &Connection, id: EntryId, prop: EntryProperty, value: &str) -> Result<()> {
    let value = normalize_value(prop, value)?;

    let sql = format!("UPDATE ports SET {} = ?1 WHERE rowid = ?2", prop.as_str());
    match conn.execute(&sql, params![value, id.0]) {
        Ok(0) => Err(RegistryError::InvalidEntry { id: id.0 }),
        Ok(_) => {
            debug!("Set {} of entry {} to {:?}", prop, id, value);
            Ok(())
        }
        Err(rusqlite::Error::SqliteFailure(err, message))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(RegistryError::Constraint {
                key: prop.as_str().to_string(),
                message: message.unwrap_or_else(|| err.to_string()),
            })
        }
        Err(err) => Err(RegistryError::storage("write entry property", err)),
    }
}

/// Validate a property value before it reaches storage.
pub fn normalize_value(prop: EntryProperty, value: &str) -> Result<String> {
    if prop.is_numeric() {
        let parsed: u64 = value.trim().parse().map_err(|_| RegistryError::Constraint {
            key: prop.as_str().to_string(),
            message: format!("expected a non-negative integer, got {value:?}"),
        })?;
        return Ok(parsed.to_string());
    }
    Ok(value.to_string())
}

/// Entries matching every predicate. No predicates selects every entry.
/// Results are in row id order.
///
/// Exact `epoch` and `revision` values are compared in the integer form they
/// are stored in, so `00` finds an entry with epoch `0`.
pub fn search(
    conn: &Connection,
    strategy: MatchStrategy,
    predicates: &[(EntryProperty, &str)],
) -> Result<Vec<EntryId>> {
    let mut sql = String::from("SELECT rowid FROM ports");
    for (i, (prop, _)) in predicates.iter().enumerate() {
        let keyword = if i == 0 { " WHERE " } else { " AND " };
        sql.push_str(&format!(
            "{keyword}{} {} ?{}",
            prop.as_str(),
            strategy.operator(),
            i + 1
        ));
    }
    sql.push_str(" ORDER BY rowid");

    let values: Vec<String> = predicates
        .iter()
        .map(|(prop, value)| match strategy {
            MatchStrategy::Exact => {
                normalize_value(*prop, value).unwrap_or_else(|_| value.to_string())
            }
            MatchStrategy::Glob | MatchStrategy::Regexp => value.to_string(),
        })
        .collect();
    query_ids(conn, &sql, values.iter().map(String::as_str))
}

/// Entry with exactly this identity tuple, if one exists.
pub fn find(
    conn: &Connection,
    name: &str,
    version: &str,
    revision: u64,
    variants: &str,
    epoch: u64,
) -> Result<Option<EntryId>> {
    let id = conn
        .query_row(
            "SELECT rowid FROM ports
             WHERE name = ?1 AND epoch = ?2 AND version = ?3 AND revision = ?4
               AND variants = ?5",
            params![
                name,
                epoch.to_string(),
                version,
                revision.to_string(),
                variants
            ],
            |row| row.get(0),
        )
        .optional()
        .during("find entry")?;
    Ok(id.map(EntryId))
}

/// Entries in the `installed` or `active` state, optionally narrowed by name
/// and version.
pub fn installed(conn: &Connection, name: Option<&str>, version: Option<&str>) -> Result<Vec<EntryId>> {
    let mut sql = format!(
        "SELECT rowid FROM ports WHERE (state = '{}' OR state = '{}')",
        EntryState::Installed,
        EntryState::Active
    );
    let mut values = Vec::new();
    if let Some(name) = name {
        values.push(name);
        sql.push_str(&format!(" AND name = ?{}", values.len()));
        if let Some(version) = version {
            values.push(version);
            sql.push_str(&format!(" AND version = ?{}", values.len()));
        }
    }
    sql.push_str(" ORDER BY rowid");
    query_ids(conn, &sql, values)
}

/// Entries in the `active` state, optionally narrowed by name.
pub fn active(conn: &Connection, name: Option<&str>) -> Result<Vec<EntryId>> {
    let mut sql = format!("SELECT rowid FROM ports WHERE state = '{}'", EntryState::Active);
    let values: Vec<&str> = name.into_iter().collect();
    if !values.is_empty() {
        sql.push_str(" AND name = ?1");
    }
    sql.push_str(" ORDER BY rowid");
    query_ids(conn, &sql, values)
}

fn query_ids<'a>(
    conn: &Connection,
    sql: &str,
    values: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<EntryId>> {
    let mut stmt = conn.prepare(sql).during("search entries")?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| row.get(0))
        .during("search entries")?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(EntryId(row.during("search entries")?));
    }
    Ok(ids)
}

/// Read every property of one entry.
pub fn record(conn: &Connection, id: EntryId) -> Result<EntryRecord> {
    let sql = format!("{SELECT_RECORD} WHERE rowid = ?1");
    conn.query_row(&sql, params![id.0], row_to_record)
        .optional()
        .during("read entry")?
        .ok_or(RegistryError::InvalidEntry { id: id.0 })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<EntryRecord> {
    Ok(EntryRecord {
        id: EntryId(row.get(0)?),
        name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        portfile: row.get(2)?,
        url: row.get(3)?,
        location: row.get(4)?,
        epoch: parse_counter(row, 5)?,
        version: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        revision: parse_counter(row, 7)?,
        variants: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        state: row.get::<_, Option<String>>(9)?.map(EntryState::from),
        date: row.get(10)?,
    })
}

fn parse_counter(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let Some(text) = row.get::<_, Option<String>>(idx)? else {
        return Ok(0);
    };
    text.trim().parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Fail with [`RegistryError::InvalidEntry`] unless `id` names a row.
pub fn ensure_exists(conn: &Connection, id: EntryId) -> Result<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM ports WHERE rowid = ?1",
            params![id.0],
            |_| Ok(()),
        )
        .optional()
        .during("check entry")?;
    found.ok_or(RegistryError::InvalidEntry { id: id.0 })
}

/// Read a registry metadata value (`version`, `created`).
pub fn metadata(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .during("read metadata")?;
    Ok(value.flatten())
}
