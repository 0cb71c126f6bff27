//! Per-dependency run state that survives across invocations.
//!
//! The runner reads an entry before executing a node (to decide whether an
//! image rebuild can be skipped) and writes one after every executed node,
//! whatever the outcome. Entries are never removed here; the persisted file
//! belongs to the project and lives at `<root>/.kubedeps/state.json`.
//!
//! ```json
//! {
//!   "version": 1,
//!   "entries": {
//!     "3f9a1c0d2b7e4a55": {
//!       "name": "backend",
//!       "lastFingerprint": "sha256:…",
//!       "lastRunStatus": "succeeded",
//!       "lastOperation": "deploy",
//!       "updatedAt": "2026-01-01T12:00:00Z"
//!     }
//!   }
//! }
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::{STATE_DIR, STATE_FILE};
use crate::core::KubedepsError;
use crate::graph::NodeId;
use crate::runner::Operation;
use crate::utils::{FileLock, atomic_write};

const STATE_FORMAT_VERSION: u32 = 1;

/// Outcome of the last executed operation of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

/// What the last run recorded about one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    /// Display name at the time of the run.
    pub name: String,
    pub last_fingerprint: String,
    pub last_run_status: RunStatus,
    pub last_operation: Operation,
    pub updated_at: DateTime<Utc>,
}

impl StateEntry {
    /// Entry stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        fingerprint: impl Into<String>,
        operation: Operation,
        status: RunStatus,
    ) -> Self {
        Self {
            name: name.into(),
            last_fingerprint: fingerprint.into(),
            last_run_status: status,
            last_operation: operation,
            updated_at: Utc::now(),
        }
    }

    /// Whether this entry proves a successful deploy of exactly `fingerprint`.
    #[must_use]
    pub fn is_deployed_at(&self, fingerprint: &str) -> bool {
        self.last_operation == Operation::Deploy
            && self.last_run_status == RunStatus::Succeeded
            && self.last_fingerprint == fingerprint
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<NodeId, StateEntry>,
}

/// Id-keyed state entries, safe to update from concurrently running nodes.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: DashMap<NodeId, StateEntry>,
}

impl StateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default state file for a root project directory.
    #[must_use]
    pub fn default_path(project_dir: &Path) -> PathBuf {
        project_dir.join(STATE_DIR).join(STATE_FILE)
    }

    #[must_use]
    pub fn get(&self, id: &NodeId) -> Option<StateEntry> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn put(&self, id: NodeId, entry: StateEntry) {
        self.entries.insert(id, entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of all entries ordered by id.
    #[must_use]
    pub fn entries(&self) -> BTreeMap<NodeId, StateEntry> {
        self.entries.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    /// Read a persisted cache. A missing file yields an empty cache.
    ///
    /// An unreadable or corrupt file is logged and ignored: the cache only
    /// saves work, so losing it must never block a deploy.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}", path.display());
                return Ok(Self::new());
            }
            Err(e) => {
                return Err(KubedepsError::StateCacheError {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        let file: StateFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring unreadable state file {}: {}", path.display(), e);
                return Ok(Self::new());
            }
        };
        if file.version != STATE_FORMAT_VERSION {
            warn!(
                "Ignoring state file {} with unknown format version {}",
                path.display(),
                file.version
            );
            return Ok(Self::new());
        }

        debug!("Loaded {} state entries from {}", file.entries.len(), path.display());
        Ok(Self {
            entries: file.entries.into_iter().collect(),
        })
    }

    /// Persist the cache atomically under an exclusive lock.
    ///
    /// Entries written by another process since this cache was loaded are
    /// kept unless this cache has a newer entry for the same id.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let _lock = FileLock::acquire(dir, "state").await?;

        let mut entries = match Self::load(path).await {
            Ok(existing) => existing.entries(),
            Err(e) => {
                warn!("Overwriting unreadable state file {}: {:#}", path.display(), e);
                BTreeMap::new()
            }
        };
        for (id, entry) in self.entries() {
            let newer = entries.get(&id).is_none_or(|current| current.updated_at <= entry.updated_at);
            if newer {
                entries.insert(id, entry);
            }
        }

        let file = StateFile {
            version: STATE_FORMAT_VERSION,
            entries,
        };
        let json = serde_json::to_vec_pretty(&file).context("Failed to serialize state")?;
        atomic_write(path, &json).map_err(|e| KubedepsError::StateCacheError {
            path: path.display().to_string(),
            reason: format!("{e:#}"),
        })?;
        debug!("Saved {} state entries to {}", file.entries.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(key: &str) -> NodeId {
        NodeId::derive(key, None)
    }

    #[test]
    fn test_get_put() {
        let cache = StateCache::new();
        assert!(cache.get(&id("api")).is_none());

        cache.put(id("api"), StateEntry::new("api", "sha256:1", Operation::Deploy, RunStatus::Failed));
        cache.put(id("api"), StateEntry::new("api", "sha256:2", Operation::Deploy, RunStatus::Succeeded));

        let entry = cache.get(&id("api")).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(entry.is_deployed_at("sha256:2"));
        assert!(!entry.is_deployed_at("sha256:1"));
    }

    #[test]
    fn test_purge_invalidates_deploy() {
        let entry = StateEntry::new("db", "sha256:1", Operation::Purge, RunStatus::Succeeded);
        assert!(!entry.is_deployed_at("sha256:1"));
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = StateCache::default_path(temp.path());

        let cache = StateCache::new();
        cache.put(id("api"), StateEntry::new("api", "sha256:1", Operation::Deploy, RunStatus::Succeeded));
        cache.put(id("db"), StateEntry::new("db", "sha256:2", Operation::Deploy, RunStatus::Failed));
        cache.save(&path).await.unwrap();

        let loaded = StateCache::load(&path).await.unwrap();
        assert_eq!(loaded.entries(), cache.entries());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"lastRunStatus\": \"failed\""));
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_files_are_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        assert!(StateCache::load(&path).await.unwrap().is_empty());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(StateCache::load(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_merges_other_entries() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");

        let first = StateCache::new();
        first.put(id("api"), StateEntry::new("api", "sha256:1", Operation::Deploy, RunStatus::Succeeded));
        first.save(&path).await.unwrap();

        let second = StateCache::new();
        second.put(id("db"), StateEntry::new("db", "sha256:2", Operation::Deploy, RunStatus::Succeeded));
        second.save(&path).await.unwrap();

        let loaded = StateCache::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 2);
    }
}
