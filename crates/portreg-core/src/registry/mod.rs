//! Registry sessions.
//!
//! A [`PortRegistry`] is one open registry file. It records:
//! - **Entries**: one row per recorded port instance, with its properties
//! - **File ownership**: which entry owns each installed path
//!
//! and keeps the session-scoped handles exposed to callers.
//!
//! # Location
//!
//! [`PortRegistry::open`] uses the platform data directory:
//! - **Linux**: `~/.local/share/portreg/registry.db`
//! - **Windows**: `%APPDATA%\portreg\registry.db`
//! - **macOS**: `~/Library/Application Support/portreg/registry.db`

pub mod port_registry;

pub use port_registry::PortRegistry;
