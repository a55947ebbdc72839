//! Centralized configuration for the port registry.
//!
//! The registry takes no runtime configuration file; these constants pin the
//! on-disk layout, connection tuning and session naming.

/// Registry database and session configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    /// File name of the registry database inside the platform data directory.
    pub const DB_FILENAME: &'static str = "registry.db";
    /// Directory name under the platform data directory.
    pub const APP_DIR_NAME: &'static str = "portreg";
    /// How long a writer waits on a locked database before giving up.
    pub const BUSY_TIMEOUT_MS: u64 = 30_000;
    /// Schema version recorded in the metadata table on creation.
    pub const SCHEMA_VERSION: &'static str = "1.000";
    /// Prefix of the opaque handle names minted for exposed entries.
    pub const HANDLE_PREFIX: &'static str = "entry";
    /// Name of the collation that orders version and revision columns.
    pub const VERSION_COLLATION: &'static str = "VERSION";
    /// State assigned to freshly created entries.
    pub const INITIAL_STATE: &'static str = "imported";
}
