//! Constants used throughout the seqvault core crate.
//!
//! This module contains all folder and filename conventions to ensure
//! consistency across the codebase and make maintenance easier.

use std::time::Duration;

/// Directory name for dataset folders inside every storage location.
pub const DATASETS_DIR_NAME: &str = "datasets";

/// Directory name for sample folders inside every storage location.
pub const SAMPLES_DIR_NAME: &str = "samples";

/// Filename of the append-only deletion ledger kept in each entity folder.
pub const DELETED_FILENAME: &str = ".deleted";

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "seqvault.yaml";

/// Filename of the persisted public access grants inside the state directory.
pub const GRANTS_FILENAME: &str = "grants.yaml";

/// Filename of the entity catalog inside the state directory.
pub const ENTITIES_FILENAME: &str = "entities.yaml";

/// Interval between two refreshes of an open staging view.
pub const STAGING_REFRESH_INTERVAL: Duration = Duration::from_secs(2);

/// Default age after which leftovers in the shared upload area are removed.
pub const DEFAULT_UPLOAD_DELETE_AGE_HOURS: u64 = 48;
