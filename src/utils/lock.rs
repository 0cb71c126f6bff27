//! Process-safe advisory file locks.
//!
//! Guards shared on-disk areas (git checkouts, the state file) against
//! concurrent `kubedeps` processes. The lock is released when dropped.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// An exclusive lock on `<dir>/.locks/<name>.lock`.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire the lock, waiting for other holders to release it.
    ///
    /// The blocking OS call runs on the blocking pool so the runtime keeps
    /// making progress while another process holds the lock.
    pub async fn acquire(dir: &Path, name: &str) -> Result<Self> {
        let locks_dir = dir.join(".locks");
        tokio::fs::create_dir_all(&locks_dir).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                anyhow::anyhow!("Permission denied: cannot create locks directory at {}", locks_dir.display())
            } else {
                anyhow::anyhow!("Failed to create directory {}: {}", locks_dir.display(), e)
            }
        })?;

        let lock_path = locks_dir.join(format!("{name}.lock"));
        let open_path = lock_path.clone();
        let name = name.to_string();

        let file = tokio::task::spawn_blocking(move || -> Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&open_path)
                .with_context(|| format!("Failed to open lock file: {}", open_path.display()))?;
            file.lock_exclusive().with_context(|| format!("Failed to acquire lock for: {name}"))?;
            Ok(file)
        })
        .await
        .context("Failed to spawn blocking task for lock acquisition")??;

        tracing::trace!("Acquired lock {}", lock_path.display());
        Ok(Self {
            file,
            path: lock_path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[allow(unstable_name_collisions)]
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn test_lock_creates_locks_directory() {
        let temp = TempDir::new().unwrap();
        let lock = FileLock::acquire(temp.path(), "state").await.unwrap();
        assert!(temp.path().join(".locks").is_dir());
        assert!(lock.path().ends_with(".locks/state.lock"));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let dir = Arc::new(temp.path().to_path_buf());
        let barrier = Arc::new(Barrier::new(2));

        let holder_dir = dir.clone();
        let holder_barrier = barrier.clone();
        let holder = tokio::spawn(async move {
            let _lock = FileLock::acquire(&holder_dir, "checkout").await.unwrap();
            holder_barrier.wait().await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let waiter = tokio::spawn(async move {
            barrier.wait().await;
            let start = Instant::now();
            let _lock = FileLock::acquire(&dir, "checkout").await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(50));
        });

        holder.await.unwrap();
        waiter.await.unwrap();
    }
}
