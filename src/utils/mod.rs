//! Cross-platform utilities
//!
//! - [`fs`] - Atomic writes and lexical path handling
//! - [`lock`] - Process-safe file locks
//! - [`progress`] - Progress bars and spinners for long-running operations

pub mod fs;
pub mod lock;
pub mod progress;

pub use fs::{atomic_write, ensure_dir, normalize_path, normalize_path_for_storage, resolve_relative};
pub use lock::FileLock;
pub use progress::{ProgressBar, spinner_with_message};
