//! Global constants used throughout the kubedeps codebase.
//!
//! File names, schema versions, timeouts and environment variable names that
//! are referenced from more than one module.

use std::time::Duration;

/// Name of the project configuration file inside a project directory.
pub const PROJECT_CONFIG_FILE: &str = "kubedeps.yaml";

/// Directory (relative to the root project) holding generated state.
pub const STATE_DIR: &str = ".kubedeps";

/// File name of the persisted state cache inside [`STATE_DIR`].
pub const STATE_FILE: &str = "state.json";

/// Schema version written by this build.
pub const CURRENT_CONFIG_VERSION: &str = "v1";

/// Legacy schema version that is upgraded on load.
pub const LEGACY_CONFIG_VERSION: &str = "v1beta1";

/// Every schema version this build can read.
pub const SUPPORTED_CONFIG_VERSIONS: &[&str] = &[LEGACY_CONFIG_VERSION, CURRENT_CONFIG_VERSION];

/// Environment variable overriding the global configuration path.
pub const CONFIG_PATH_ENV: &str = "KUBEDEPS_CONFIG";

/// Environment variable disabling progress indicators.
pub const NO_PROGRESS_ENV: &str = "KUBEDEPS_NO_PROGRESS";

/// Number of hex characters kept from the SHA-256 digest for node ids.
pub const NODE_ID_LEN: usize = 16;

/// Timeout for Git clone operations (120 seconds).
///
/// Dependency repositories can be large; clone may take much longer than fetch.
pub const GIT_CLONE_TIMEOUT: Duration = Duration::from_secs(120);

/// Timeout for Git fetch and checkout operations (60 seconds).
pub const GIT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Number of attempts for network-bound git operations.
pub const GIT_RETRY_ATTEMPTS: usize = 3;

/// Starting delay for exponential backoff between git retries (100ms).
pub const GIT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Directories never included in a content fingerprint.
pub const FINGERPRINT_EXCLUDED_DIRS: &[&str] = &[".git", STATE_DIR];
