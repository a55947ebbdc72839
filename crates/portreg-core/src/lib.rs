//! Portreg - SQLite-backed registry of installed ports.
//!
//! Records which ports (name, version, revision, variants, epoch) are known
//! to the system, their installation state, and which files each one owns.
//! Versions and revisions are ordered with an RPM-style comparator that is
//! also registered with SQLite as the `VERSION` collation.
//!
//! # Example
//!
//! ```rust,no_run
//! use portreg::PortRegistry;
//!
//! fn main() -> portreg::Result<()> {
//!     let registry = PortRegistry::open_at("/tmp/portreg/registry.db".as_ref())?;
//!
//!     let zlib = registry.create("zlib", "1.2.3", 1, "", 0)?;
//!     registry.set_property(&zlib, "state", "installed")?;
//!     registry.map(&zlib, &["/opt/local/lib/libz.dylib"])?;
//!
//!     for entry in registry.installed(None, None)? {
//!         println!("{} -> {:?}", entry.handle(), registry.record(&entry)?);
//!     }
//!
//!     registry.close()
//! }
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod files;
pub mod handles;
pub mod platform;
pub mod registry;
pub mod schema;
pub mod version;

pub use config::RegistryConfig;
pub use entry::{Entry, EntryId, EntryProperty, EntryRecord, EntryState, MatchStrategy};
pub use error::{RegistryError, Result};
pub use handles::{Handle, HandleRegistry};
pub use registry::PortRegistry;
pub use version::compare_versions;
