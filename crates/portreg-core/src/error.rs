//! Error types for the port registry.
//!
//! Every failure the registry can report is a variant of [`RegistryError`].
//! Validation failures (unknown property names, malformed values) are raised
//! before any transaction begins. Batch operations that stop partway wrap the
//! underlying failure in [`RegistryError::Partial`] together with the number
//! of items that were applied before the failure.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the port registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    // Schema errors
    #[error("Schema error: {message}")]
    Schema { message: String },

    // Uniqueness errors
    #[error("Duplicate entry: {name} @{epoch}:{version}_{revision} {variants}")]
    Duplicate {
        name: String,
        epoch: u64,
        version: String,
        revision: u64,
        variants: String,
    },

    #[error("Constraint violated writing {key}: {message}")]
    Constraint { key: String, message: String },

    // Lookup errors
    #[error("Invalid property key: {key}")]
    InvalidKey { key: String },

    #[error("Invalid entry: no entry with id {id}")]
    InvalidEntry { id: i64 },

    #[error("Invalid handle: {handle}")]
    InvalidHandle { handle: String },

    // File ownership errors
    #[error("File is already owned by an entry: {path}")]
    AlreadyOwned { path: String },

    #[error("File is not owned by this entry: {path}")]
    NotOwned { path: String },

    // Storage errors
    #[error("Storage error{}: {message}", during_suffix(.operation))]
    Storage {
        operation: Option<String>,
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Batch errors
    #[error("{source} (after {completed} completed)")]
    Partial {
        completed: usize,
        #[source]
        source: Box<RegistryError>,
    },
}

fn during_suffix(operation: &Option<String>) -> String {
    match operation {
        Some(op) => format!(" during {op}"),
        None => String::new(),
    }
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Storage {
            operation: None,
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl RegistryError {
    /// Wrap a storage failure with the operation that triggered it.
    pub fn storage(operation: impl Into<String>, err: rusqlite::Error) -> Self {
        RegistryError::Storage {
            operation: Some(operation.into()),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Storage failure that has no underlying SQLite error (e.g. a poisoned lock).
    pub fn storage_message(operation: impl Into<String>, message: impl Into<String>) -> Self {
        RegistryError::Storage {
            operation: Some(operation.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Wrap `self` as the failure that stopped a batch after `completed` items.
    pub fn after(self, completed: usize) -> Self {
        RegistryError::Partial {
            completed,
            source: Box::new(self),
        }
    }

    /// The underlying error, looking through [`RegistryError::Partial`].
    pub fn root(&self) -> &RegistryError {
        match self {
            RegistryError::Partial { source, .. } => source.root(),
            other => other,
        }
    }

    /// Number of batch items applied before the failure, if this error
    /// stopped a batch partway.
    pub fn completed(&self) -> Option<usize> {
        match self {
            RegistryError::Partial { completed, .. } => Some(*completed),
            _ => None,
        }
    }

    /// Stable machine-readable code for callers that dispatch on error kind.
    pub fn code(&self) -> &'static str {
        match self.root() {
            RegistryError::Schema { .. } => "registry::schema",
            RegistryError::Duplicate { .. } => "registry::duplicate",
            RegistryError::Constraint { .. } => "registry::constraint",
            RegistryError::InvalidKey { .. } => "registry::invalid-key",
            RegistryError::InvalidEntry { .. } => "registry::invalid-entry",
            RegistryError::InvalidHandle { .. } => "registry::invalid-handle",
            RegistryError::AlreadyOwned { .. } => "registry::already-owned",
            RegistryError::NotOwned { .. } => "registry::not-owned",
            RegistryError::Storage { .. } => "registry::sqlite-error",
            RegistryError::Io { .. } => "registry::io-error",
            RegistryError::Partial { .. } => "registry::partial",
        }
    }
}

/// Attach an operation description to raw SQLite results.
pub(crate) trait StorageContext<T> {
    fn during(self, operation: &str) -> Result<T>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn during(self, operation: &str) -> Result<T> {
        self.map_err(|err| RegistryError::storage(operation, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::NotOwned {
            path: "/usr/bin/x".into(),
        };
        assert_eq!(err.to_string(), "File is not owned by this entry: /usr/bin/x");
    }

    #[test]
    fn test_storage_display_includes_operation() {
        let err = RegistryError::storage_message("map files", "disk I/O error");
        assert_eq!(err.to_string(), "Storage error during map files: disk I/O error");

        let err = RegistryError::Storage {
            operation: None,
            message: "locked".into(),
            source: None,
        };
        assert_eq!(err.to_string(), "Storage error: locked");
    }

    #[test]
    fn test_partial_exposes_root_and_count() {
        let err = RegistryError::InvalidEntry { id: 7 }.after(2);
        assert_eq!(err.completed(), Some(2));
        assert!(matches!(err.root(), RegistryError::InvalidEntry { id: 7 }));
        assert_eq!(err.code(), "registry::invalid-entry");
        assert_eq!(
            err.to_string(),
            "Invalid entry: no entry with id 7 (after 2 completed)"
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            RegistryError::AlreadyOwned { path: "/a".into() }.code(),
            "registry::already-owned"
        );
        assert_eq!(
            RegistryError::InvalidKey { key: "bogus".into() }.code(),
            "registry::invalid-key"
        );
        assert_eq!(RegistryError::InvalidKey { key: "x".into() }.completed(), None);
    }
}
