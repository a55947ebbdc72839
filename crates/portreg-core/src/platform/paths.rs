//! Default registry file location.

use crate::config::RegistryConfig;
use crate::{RegistryError, Result};
use std::path::PathBuf;

/// Get the registry data directory.
///
/// # Platform Behavior
/// - **Linux**: `~/.local/share/portreg` (XDG_DATA_HOME)
/// - **Windows**: `%APPDATA%\portreg`
/// - **macOS**: `~/Library/Application Support/portreg`
pub fn registry_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| RegistryError::Io {
        message: "Could not determine platform data directory".to_string(),
        path: None,
        source: None,
    })?;
    Ok(data_dir.join(RegistryConfig::APP_DIR_NAME))
}

/// Get the path to the default registry database.
///
/// Returns `{registry_data_dir}/registry.db`.
pub fn registry_db_path() -> Result<PathBuf> {
    Ok(registry_data_dir()?.join(RegistryConfig::DB_FILENAME))
}
