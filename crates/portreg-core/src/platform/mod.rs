//! Platform-specific locations.

mod paths;

pub use paths::{registry_data_dir, registry_db_path};
