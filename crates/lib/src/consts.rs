//! Crate-wide constants.

/// Application name, used for default directories.
pub const APP_NAME: &str = "shipyard";

/// Length of the truncated object hash used for store entry names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Project manifest file name.
pub const MANIFEST_FILENAME: &str = "shipyard.json";

/// Optional ignore file at the project root.
pub const IGNORE_FILENAME: &str = ".shipyardignore";

/// Overrides the store location.
pub const STORE_ENV: &str = "SHIPYARD_STORE";

/// Extra native-library search directories, separated like `PATH`.
pub const LIBRARY_PATH_ENV: &str = "SHIPYARD_LIBRARY_PATH";
