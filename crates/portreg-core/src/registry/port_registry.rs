//! The registry session: one open registry file plus its handle table.

use crate::entry::{store, Entry, EntryId, EntryProperty, EntryRecord, MatchStrategy};
use crate::error::StorageContext;
use crate::handles::HandleRegistry;
use crate::{files, schema};
use crate::{RegistryError, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

struct Session {
    conn: Connection,
    handles: HandleRegistry,
}

impl Session {
    fn expose(&mut self, id: EntryId) -> Result<Entry> {
        let handle = self.handles.expose(&self.conn, id)?;
        Ok(Entry::new(id, handle))
    }

    fn expose_all(&mut self, ids: Vec<EntryId>) -> Result<Vec<Entry>> {
        ids.into_iter().map(|id| self.expose(id)).collect()
    }

    /// Storage id of `entry`, provided its handle is still bound to it in this
    /// session. Entries whose handle was released (deleted, closed, or minted
    /// by another session) are rejected.
    fn live_id(&self, entry: &Entry) -> Result<EntryId> {
        if self.handles.is_bound(entry.handle().name(), entry.id()) {
            Ok(entry.id())
        } else {
            Err(RegistryError::InvalidEntry { id: entry.id().0 })
        }
    }
}

/// An open port registry.
///
/// Owns the single SQLite connection for the registry file and the
/// session-scoped handle table. All operations are synchronous; the session
/// is guarded by a mutex so a registry can be shared between threads, but it
/// is meant to be the only writer of its file.
///
/// Handles minted by one `PortRegistry` are meaningless to another, even one
/// opened on the same file.
pub struct PortRegistry {
    db_path: PathBuf,
    session: Mutex<Session>,
}

impl PortRegistry {
    /// Open the registry at the default platform location.
    ///
    /// Creates the database and parent directories if they don't exist.
    pub fn open() -> Result<Self> {
        let db_path = crate::platform::registry_db_path()?;
        Self::open_at(&db_path)
    }

    /// Open the registry at a specific path.
    ///
    /// Creates the database, its schema and parent directories if they don't
    /// exist. An existing file whose tables don't match the expected layout
    /// fails with [`RegistryError::Schema`].
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| RegistryError::Io {
                    message: format!(
                        "Failed to create registry directory: {}",
                        parent.display()
                    ),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let mut conn = Connection::open(db_path).during("open registry")?;
        schema::configure_connection(&conn)?;
        schema::register_functions(&conn)?;
        schema::ensure_schema(&mut conn)?;
        schema::init_session(&conn)?;

        debug!("Opened registry at {}", db_path.display());
        Ok(Self {
            db_path: db_path.to_path_buf(),
            session: Mutex::new(Session {
                conn,
                handles: HandleRegistry::new(),
            }),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Close the registry, releasing every handle minted in this session.
    ///
    /// A close the storage engine refuses is logged and reported; the
    /// connection is dropped either way.
    pub fn close(self) -> Result<()> {
        let session = self
            .session
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let released = session.handles.len();
        let conn = session.conn;

        conn.flush_prepared_statement_cache();
        match conn.close() {
            Ok(()) => {
                debug!(
                    "Closed registry at {} ({} handles released)",
                    self.db_path.display(),
                    released
                );
                Ok(())
            }
            Err((_conn, err)) => {
                warn!(
                    "Registry at {} did not close cleanly: {}",
                    self.db_path.display(),
                    err
                );
                Err(RegistryError::storage("close registry", err))
            }
        }
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Session>> {
        self.session.lock().map_err(|_| {
            RegistryError::storage_message(
                "lock registry session",
                "Failed to acquire registry session lock",
            )
        })
    }

    // ========================================
    // Entries
    // ========================================

    /// Record a new entry and expose it.
    ///
    /// The entry starts in the `imported` state with its date set to now.
    pub fn create(
        &self,
        name: &str,
        version: &str,
        revision: u64,
        variants: &str,
        epoch: u64,
    ) -> Result<Entry> {
        let mut session = self.lock_session()?;
        let id = store::create(&mut session.conn, name, version, revision, variants, epoch)?;
        session.expose(id)
    }

    /// Delete entries, releasing the files they own and their handles.
    ///
    /// Stops at the first entry that no longer exists in this session. On
    /// failure the error carries the number of entries deleted before it
    /// (see [`RegistryError::completed`]); those deletions are kept.
    pub fn delete(&self, entries: &[Entry]) -> Result<usize> {
        let mut guard = self.lock_session()?;
        let session = &mut *guard;

        let stale = entries
            .iter()
            .position(|entry| session.live_id(entry).is_err());
        let ids: Vec<EntryId> = entries[..stale.unwrap_or(entries.len())]
            .iter()
            .map(Entry::id)
            .collect();
        let result = store::delete(&mut session.conn, &ids);

        let deleted = match &result {
            Ok(count) => *count,
            Err(err) => err.completed().unwrap_or(0),
        };
        for id in &ids[..deleted] {
            if let Err(err) = session.handles.release_entry(&session.conn, *id) {
                warn!("Failed to release handle of deleted entry {}: {}", id, err);
            }
        }

        match (result, stale) {
            (Ok(count), Some(index)) => Err(RegistryError::InvalidEntry {
                id: entries[index].id().0,
            }
            .after(count)),
            (result, _) => result,
        }
    }

    /// Read a property. `Ok(None)` means the property is unset.
    pub fn get_property(&self, entry: &Entry, key: &str) -> Result<Option<String>> {
        let prop: EntryProperty = key.parse()?;
        let session = self.lock_session()?;
        let id = session.live_id(entry)?;
        store::get_property(&session.conn, id, prop)
    }

    pub fn set_property(&self, entry: &Entry, key: &str, value: &str) -> Result<()> {
        let prop: EntryProperty = key.parse()?;
        let session = self.lock_session()?;
        let id = session.live_id(entry)?;
        store::set_property(&session.conn, id, prop, value)
    }

    /// Entries whose properties equal every `(key, value)` predicate.
    ///
    /// No predicates returns every entry. Results are ordered by creation.
    pub fn search(&self, predicates: &[(&str, &str)]) -> Result<Vec<Entry>> {
        self.search_with(MatchStrategy::Exact, predicates)
    }

    /// Like [`search`](Self::search), matching values with `strategy`.
    ///
    /// Every key is validated before the registry is touched.
    pub fn search_with(
        &self,
        strategy: MatchStrategy,
        predicates: &[(&str, &str)],
    ) -> Result<Vec<Entry>> {
        let predicates = EntryProperty::parse_all(predicates)?;
        let mut session = self.lock_session()?;
        let ids = store::search(&session.conn, strategy, &predicates)?;
        session.expose_all(ids)
    }

    /// Expose the entry with exactly this identity tuple, if it exists.
    pub fn open_entry(
        &self,
        name: &str,
        version: &str,
        revision: u64,
        variants: &str,
        epoch: u64,
    ) -> Result<Option<Entry>> {
        let mut session = self.lock_session()?;
        let found = store::find(&session.conn, name, version, revision, variants, epoch)?;
        match found {
            Some(id) => session.expose(id).map(Some),
            None => Ok(None),
        }
    }

    /// Entries that are installed (including active ones).
    ///
    /// `version` only narrows the result when `name` is given.
    pub fn installed(&self, name: Option<&str>, version: Option<&str>) -> Result<Vec<Entry>> {
        let mut session = self.lock_session()?;
        let ids = store::installed(&session.conn, name, version)?;
        session.expose_all(ids)
    }

    pub fn active(&self, name: Option<&str>) -> Result<Vec<Entry>> {
        let mut session = self.lock_session()?;
        let ids = store::active(&session.conn, name)?;
        session.expose_all(ids)
    }

    pub fn record(&self, entry: &Entry) -> Result<EntryRecord> {
        let session = self.lock_session()?;
        let id = session.live_id(entry)?;
        store::record(&session.conn, id)
    }

    /// Registry self-description (`version`, `created`).
    pub fn metadata(&self, key: &str) -> Result<Option<String>> {
        let session = self.lock_session()?;
        store::metadata(&session.conn, key)
    }

    // ========================================
    // File ownership
    // ========================================

    /// Bind `paths` to `entry`. Nothing is bound if any path is already owned.
    pub fn map(&self, entry: &Entry, paths: &[&str]) -> Result<()> {
        let mut session = self.lock_session()?;
        let id = session.live_id(entry)?;
        files::map(&mut session.conn, id, paths)
    }

    /// Unbind `paths` from `entry`, stopping at the first path it does not own.
    pub fn unmap(&self, entry: &Entry, paths: &[&str]) -> Result<()> {
        let mut session = self.lock_session()?;
        let id = session.live_id(entry)?;
        files::unmap(&mut session.conn, id, paths)
    }

    /// Paths owned by `entry`, in no particular order.
    pub fn list_files(&self, entry: &Entry) -> Result<Vec<String>> {
        let session = self.lock_session()?;
        let id = session.live_id(entry)?;
        files::list(&session.conn, id)
    }

    /// The entry owning `path`, if any.
    pub fn owner(&self, path: &str) -> Result<Option<Entry>> {
        let mut session = self.lock_session()?;
        let owner = files::owner(&session.conn, path)?;
        match owner {
            Some(id) => session.expose(id).map(Some),
            None => Ok(None),
        }
    }

    // ========================================
    // Handles
    // ========================================

    /// Whether `handle` names a live entry in this session.
    ///
    /// Only the session's handle table is consulted, never storage.
    pub fn exists(&self, handle: &str) -> bool {
        match self.session.lock() {
            Ok(session) => session.handles.contains(handle),
            Err(_) => false,
        }
    }

    /// The entry a handle refers to.
    pub fn resolve(&self, handle: &str) -> Result<Entry> {
        let mut session = self.lock_session()?;
        let id = session
            .handles
            .resolve(handle)
            .ok_or_else(|| RegistryError::InvalidHandle {
                handle: handle.to_string(),
            })?;
        session.expose(id)
    }

    /// Release handles without touching their entries.
    ///
    /// Stops at the first unknown handle with [`RegistryError::InvalidHandle`];
    /// handles released before it stay released.
    pub fn close_entries(&self, handles: &[&str]) -> Result<usize> {
        let mut guard = self.lock_session()?;
        let session = &mut *guard;
        for (done, handle) in handles.iter().enumerate() {
            let released = session
                .handles
                .release(&session.conn, handle)
                .map_err(|e| e.after(done))?;
            if released.is_none() {
                return Err(RegistryError::InvalidHandle {
                    handle: (*handle).to_string(),
                }
                .after(done));
            }
        }
        Ok(handles.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::Handle;
    use tempfile::TempDir;

    fn create_test_registry() -> (PortRegistry, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test-registry.db");
        let registry = PortRegistry::open_at(&db_path).unwrap();
        (registry, temp_dir)
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("registry.db");

        let registry = PortRegistry::open_at(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(registry.db_path(), db_path.as_path());
        registry.close().unwrap();
    }

    #[test]
    fn test_create_exposes_entry() {
        let (registry, _temp_dir) = create_test_registry();

        let entry = registry.create("zlib", "1.2.3", 1, "", 0).unwrap();

        assert!(registry.exists(entry.handle().name()));
        assert_eq!(
            registry.get_property(&entry, "name").unwrap(),
            Some("zlib".to_string())
        );
        assert_eq!(
            registry.get_property(&entry, "state").unwrap(),
            Some("imported".to_string())
        );
    }

    #[test]
    fn test_same_entry_yields_same_handle() {
        let (registry, _temp_dir) = create_test_registry();
        let created = registry.create("vim", "7.1", 0, "", 0).unwrap();

        let found = registry.search(&[("name", "vim")]).unwrap();
        let opened = registry.open_entry("vim", "7.1", 0, "", 0).unwrap().unwrap();

        assert_eq!(found.len(), 1);
        assert!(Handle::same(created.handle(), found[0].handle()));
        assert!(Handle::same(created.handle(), opened.handle()));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let (registry, _temp_dir) = create_test_registry();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();

        assert!(matches!(
            registry.get_property(&entry, "colour"),
            Err(RegistryError::InvalidKey { .. })
        ));
        assert!(matches!(
            registry.set_property(&entry, "rowid", "1"),
            Err(RegistryError::InvalidKey { .. })
        ));
        assert!(matches!(
            registry.search(&[("name", "vim"), ("bogus", "x")]),
            Err(RegistryError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_delete_releases_handles() {
        let (registry, _temp_dir) = create_test_registry();
        let vim = registry.create("vim", "7.1", 0, "", 0).unwrap();
        let zlib = registry.create("zlib", "1.2.3", 1, "", 0).unwrap();

        assert_eq!(registry.delete(&[vim.clone()]).unwrap(), 1);

        assert!(!registry.exists(vim.handle().name()));
        assert!(registry.exists(zlib.handle().name()));
        assert!(matches!(
            registry.record(&vim),
            Err(RegistryError::InvalidEntry { .. })
        ));
    }

    #[test]
    fn test_partial_delete_releases_only_deleted_handles() {
        let (registry, _temp_dir) = create_test_registry();
        let a = registry.create("a", "1", 0, "", 0).unwrap();
        let b = registry.create("b", "1", 0, "", 0).unwrap();
        registry.delete(&[b.clone()]).unwrap();
        let c = registry.create("c", "1", 0, "", 0).unwrap();

        let err = registry.delete(&[a.clone(), b, c.clone()]).unwrap_err();

        assert_eq!(err.completed(), Some(1));
        assert!(!registry.exists(a.handle().name()));
        assert!(registry.exists(c.handle().name()));
    }

    #[test]
    fn test_exists_is_session_only() {
        let (registry, _temp_dir) = create_test_registry();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();

        assert!(!registry.exists("entry999"));
        assert!(registry.exists(entry.handle().name()));

        assert_eq!(registry.close_entries(&[entry.handle().name()]).unwrap(), 1);
        assert!(!registry.exists(entry.handle().name()));
        assert_eq!(registry.search(&[]).unwrap().len(), 1);
    }

    #[test]
    fn test_close_entries_unknown_handle() {
        let (registry, _temp_dir) = create_test_registry();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();

        let err = registry
            .close_entries(&[entry.handle().name(), "entry999"])
            .unwrap_err();

        assert_eq!(err.completed(), Some(1));
        assert!(matches!(err.root(), RegistryError::InvalidHandle { handle } if handle == "entry999"));
        assert!(!registry.exists(entry.handle().name()));
    }

    #[test]
    fn test_deleted_entry_does_not_reach_new_entry() {
        let (registry, _temp_dir) = create_test_registry();
        let vim = registry.create("vim", "7.1", 0, "", 0).unwrap();
        registry.map(&vim, &["/usr/bin/vim"]).unwrap();
        registry.delete(&[vim.clone()]).unwrap();

        let zlib = registry.create("zlib", "1.2.3", 1, "", 0).unwrap();
        registry.map(&zlib, &["/usr/lib/libz.a"]).unwrap();

        assert_ne!(zlib.id(), vim.id());
        assert!(matches!(
            registry.get_property(&vim, "name"),
            Err(RegistryError::InvalidEntry { .. })
        ));
        assert!(matches!(
            registry.set_property(&vim, "state", "active"),
            Err(RegistryError::InvalidEntry { .. })
        ));
        assert!(matches!(
            registry.map(&vim, &["/usr/bin/vi"]),
            Err(RegistryError::InvalidEntry { .. })
        ));

        let err = registry.delete(&[vim]).unwrap_err();
        assert_eq!(err.completed(), Some(0));
        assert!(matches!(err.root(), RegistryError::InvalidEntry { .. }));
        assert_eq!(registry.list_files(&zlib).unwrap(), vec!["/usr/lib/libz.a"]);
    }

    #[test]
    fn test_closed_entry_is_no_longer_usable() {
        let (registry, _temp_dir) = create_test_registry();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();
        registry.close_entries(&[entry.handle().name()]).unwrap();

        assert!(matches!(
            registry.record(&entry),
            Err(RegistryError::InvalidEntry { .. })
        ));
        assert!(matches!(
            registry.unmap(&entry, &["/usr/bin/vim"]),
            Err(RegistryError::InvalidEntry { .. })
        ));

        let reopened = registry.open_entry("vim", "7.1", 0, "", 0).unwrap().unwrap();
        assert_eq!(reopened.id(), entry.id());
        assert!(registry.list_files(&reopened).unwrap().is_empty());
    }

    #[test]
    fn test_resolve() {
        let (registry, _temp_dir) = create_test_registry();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();

        let resolved = registry.resolve(entry.handle().name()).unwrap();

        assert_eq!(resolved.id(), entry.id());
        assert!(Handle::same(resolved.handle(), entry.handle()));
        assert!(matches!(
            registry.resolve("nope"),
            Err(RegistryError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_owner_exposes_entry() {
        let (registry, _temp_dir) = create_test_registry();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();
        registry.map(&entry, &["/usr/bin/vim"]).unwrap();

        let owner = registry.owner("/usr/bin/vim").unwrap().unwrap();

        assert!(Handle::same(owner.handle(), entry.handle()));
        assert!(registry.owner("/usr/bin/emacs").unwrap().is_none());
    }

    #[test]
    fn test_metadata_records_schema_version() {
        let (registry, _temp_dir) = create_test_registry();

        assert_eq!(
            registry.metadata("version").unwrap().as_deref(),
            Some(crate::config::RegistryConfig::SCHEMA_VERSION)
        );
        assert!(registry.metadata("created").unwrap().is_some());
    }

    #[test]
    fn test_handles_do_not_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test-registry.db");

        let registry = PortRegistry::open_at(&db_path).unwrap();
        let entry = registry.create("vim", "7.1", 0, "", 0).unwrap();
        let name = entry.handle().name().to_string();
        registry.close().unwrap();

        let reopened = PortRegistry::open_at(&db_path).unwrap();
        assert!(!reopened.exists(&name));
        assert_eq!(reopened.search(&[("name", "vim")]).unwrap().len(), 1);
    }
}
