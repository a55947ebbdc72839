//! Session-scoped handles for exposed entries.
//!
//! Each entry handed to a caller gets one opaque handle per session. Asking
//! for the same entry again returns the very same handle (pointer-identical,
//! see [`Handle::same`]) instead of minting a new one. The mapping is mirrored
//! into the `temp.entry_handles` table so it can be joined against from SQL,
//! and it disappears when the registry is closed.

use crate::config::RegistryConfig;
use crate::entry::EntryId;
use crate::error::StorageContext;
use crate::Result;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque, session-stable reference to an entry.
#[derive(Debug, Clone)]
pub struct Handle(Arc<str>);

impl Handle {
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether two handles are the same allocation, not merely equal names.
    pub fn same(a: &Handle, b: &Handle) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Handle {}

impl Hash for Handle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entry ⇄ handle mapping for one registry session.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    next: u64,
    by_entry: HashMap<EntryId, Handle>,
    by_name: HashMap<Arc<str>, EntryId>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle recorded for `id`, minting and recording one if the
    /// entry has not been exposed in this session yet.
    pub fn expose(&mut self, conn: &Connection, id: EntryId) -> Result<Handle> {
        if let Some(handle) = self.by_entry.get(&id) {
            return Ok(handle.clone());
        }

        let handle = self.mint();
        conn.execute(
            "INSERT INTO temp.entry_handles (entry_id, handle) VALUES (?1, ?2)",
            params![id.0, handle.name()],
        )
        .during("record entry handle")?;

        self.by_name.insert(handle.0.clone(), id);
        self.by_entry.insert(id, handle.clone());
        debug!("Exposed entry {} as {}", id, handle);
        Ok(handle)
    }

    fn mint(&mut self) -> Handle {
        loop {
            let name = format!("{}{}", RegistryConfig::HANDLE_PREFIX, self.next);
            self.next += 1;
            if !self.by_name.contains_key(name.as_str()) {
                return Handle(Arc::from(name));
            }
        }
    }

    /// Entry currently bound to the handle named `name`.
    pub fn resolve(&self, name: &str) -> Option<EntryId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Whether the handle named `name` is currently bound to `id`.
    pub fn is_bound(&self, name: &str, id: EntryId) -> bool {
        self.resolve(name) == Some(id)
    }

    /// Forget the handle named `name`. Returns the entry it pointed at.
    pub fn release(&mut self, conn: &Connection, name: &str) -> Result<Option<EntryId>> {
        let Some(id) = self.by_name.remove(name) else {
            return Ok(None);
        };
        self.by_entry.remove(&id);
        Self::forget_row(conn, id)?;
        Ok(Some(id))
    }

    /// Forget whatever handle is bound to `id`.
    pub fn release_entry(&mut self, conn: &Connection, id: EntryId) -> Result<()> {
        if let Some(handle) = self.by_entry.remove(&id) {
            self.by_name.remove(handle.name());
            Self::forget_row(conn, id)?;
        }
        Ok(())
    }

    fn forget_row(conn: &Connection, id: EntryId) -> Result<()> {
        let removed = conn
            .execute(
                "DELETE FROM temp.entry_handles WHERE entry_id = ?1",
                params![id.0],
            )
            .during("release entry handle")?;
        if removed == 0 {
            warn!("No handle row recorded for entry {}", id);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entry.is_empty()
    }
}
