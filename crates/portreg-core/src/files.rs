//! File ownership: which entry owns which installed path.
//!
//! A path is owned by at most one entry registry-wide. `map` is
//! all-or-nothing; `unmap` stops at the first path the entry does not own and
//! keeps the removals made before it.

use crate::entry::store::ensure_exists;
use crate::entry::EntryId;
use crate::error::StorageContext;
use crate::{RegistryError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

/// Bind every path in `paths` to `id`.
///
/// Fails with [`RegistryError::AlreadyOwned`] naming the first path that is
/// already bound (to any entry, including `id`), in which case none of the
/// batch is bound.
pub fn map(conn: &mut Connection, id: EntryId, paths: &[&str]) -> Result<()> {
    let tx = conn.transaction().during("begin map files")?;
    ensure_exists(&tx, id)?;

    {
        let mut insert = tx
            .prepare_cached("INSERT INTO files (port_id, path) VALUES (?1, ?2)")
            .during("map files")?;
        for path in paths {
            if owner(&tx, path)?.is_some() {
                // Dropping the transaction rolls back the rows inserted so far.
                return Err(RegistryError::AlreadyOwned {
                    path: (*path).to_string(),
                });
            }
            insert.execute(params![id.0, path]).during("map files")?;
        }
    }

    tx.commit().during("commit map files")?;
    debug!("Mapped {} files to entry {}", paths.len(), id);
    Ok(())
}

/// Remove the binding of every path in `paths` from `id`.
///
/// Stops at the first path not owned by `id` with
/// [`RegistryError::NotOwned`], wrapped in [`RegistryError::Partial`]
/// carrying how many paths were unbound before it. Those removals stay
/// committed.
pub fn unmap(conn: &mut Connection, id: EntryId, paths: &[&str]) -> Result<()> {
    let tx = conn.transaction().during("begin unmap files")?;
    ensure_exists(&tx, id)?;

    let mut failure = None;
    {
        let mut delete = tx
            .prepare_cached("DELETE FROM files WHERE port_id = ?1 AND path = ?2")
            .during("unmap files")?;
        for (done, path) in paths.iter().enumerate() {
            match delete.execute(params![id.0, path]) {
                Ok(0) => {
                    failure = Some(
                        RegistryError::NotOwned {
                            path: (*path).to_string(),
                        }
                        .after(done),
                    );
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    failure = Some(RegistryError::storage("unmap files", e).after(done));
                    break;
                }
            }
        }
    }

    tx.commit().during("commit unmap files")?;
    match failure {
        Some(err) => Err(err),
        None => {
            debug!("Unmapped {} files from entry {}", paths.len(), id);
            Ok(())
        }
    }
}

/// Every path currently owned by `id`, in no particular order.
pub fn list(conn: &Connection, id: EntryId) -> Result<Vec<String>> {
    ensure_exists(conn, id)?;
    let mut stmt = conn
        .prepare_cached("SELECT path FROM files WHERE port_id = ?1")
        .during("list files")?;
    let rows = stmt
        .query_map(params![id.0], |row| row.get(0))
        .during("list files")?;

    let mut paths = Vec::new();
    for row in rows {
        paths.push(row.during("list files")?);
    }
    Ok(paths)
}

/// The entry owning `path`, if any.
pub fn owner(conn: &Connection, path: &str) -> Result<Option<EntryId>> {
    let owner = conn
        .query_row(
            "SELECT port_id FROM files WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )
        .optional()
        .during("look up file owner")?;
    Ok(owner.map(EntryId))
}

/// Drop every binding held by `id`. Used when the entry itself is deleted.
pub(crate) fn unmap_all(conn: &Connection, id: EntryId) -> Result<usize> {
    conn.execute("DELETE FROM files WHERE port_id = ?1", params![id.0])
        .during("release entry files")
}
