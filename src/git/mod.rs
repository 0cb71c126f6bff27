//! Git checkouts for remote dependencies.
//!
//! Uses the system `git` binary through [`GitCommand`], so existing SSH keys,
//! credential helpers and proxy settings apply unchanged. Network-bound
//! operations (clone, fetch) are retried with exponential backoff.

pub mod command_builder;

pub use command_builder::GitCommand;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;

use crate::constants::{GIT_CLONE_TIMEOUT, GIT_FETCH_TIMEOUT, GIT_RETRY_ATTEMPTS, GIT_RETRY_BASE_DELAY_MS};
use crate::core::KubedepsError;

/// A local git working copy.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
}

fn retry_strategy() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(GIT_RETRY_BASE_DELAY_MS)
        .max_delay(Duration::from_secs(2))
        .take(GIT_RETRY_ATTEMPTS - 1)
}

/// Only transient command failures are worth another attempt.
fn is_retryable(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<KubedepsError>(), Some(KubedepsError::GitCommandError { .. }))
}

impl GitRepo {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory holds a git working copy.
    #[must_use]
    pub fn is_git_repo(&self) -> bool {
        self.path.join(".git").exists()
    }

    /// Clone `url` into `target` without checking out a working tree.
    ///
    /// A partially written target is removed before each retry.
    pub async fn clone(url: &str, target: impl AsRef<Path>) -> Result<Self> {
        let target = target.as_ref().to_path_buf();

        RetryIf::spawn(
            retry_strategy(),
            || {
                let target = target.clone();
                async move {
                    if target.exists() {
                        tokio::fs::remove_dir_all(&target).await.with_context(|| {
                            format!("Failed to remove incomplete checkout {}", target.display())
                        })?;
                    }
                    GitCommand::clone(url, &target)
                        .timeout(GIT_CLONE_TIMEOUT)
                        .with_context(url)
                        .execute_success()
                        .await
                }
            },
            is_retryable,
        )
        .await?;

        Ok(Self::new(target))
    }

    /// Fetch branches and tags from `origin`.
    pub async fn fetch(&self) -> Result<()> {
        RetryIf::spawn(
            retry_strategy(),
            || {
                GitCommand::fetch()
                    .current_dir(&self.path)
                    .timeout(GIT_FETCH_TIMEOUT)
                    .execute_success()
            },
            is_retryable,
        )
        .await
    }

    /// Resolve a branch, tag or commit to a full commit SHA.
    ///
    /// Branch names prefer the remote-tracking ref so a stale local branch
    /// never shadows what was just fetched.
    pub async fn resolve_commit(&self, reference: &str) -> Result<String> {
        let remote = format!("origin/{reference}");
        if let Ok(sha) = GitCommand::rev_parse(&remote).current_dir(&self.path).execute_stdout().await
            && !sha.is_empty()
        {
            return Ok(sha);
        }

        GitCommand::rev_parse(reference).current_dir(&self.path).execute_stdout().await.map_err(|_| {
            KubedepsError::GitCommandError {
                operation: "rev-parse".to_string(),
                stderr: format!("revision '{reference}' not found in {}", self.path.display()),
            }
            .into()
        })
    }

    /// The default branch of `origin`, e.g. `origin/main`.
    pub async fn remote_head(&self) -> Result<String> {
        GitCommand::remote_head().current_dir(&self.path).execute_stdout().await
    }

    pub async fn current_commit(&self) -> Result<String> {
        GitCommand::current_commit().current_dir(&self.path).execute_stdout().await
    }

    /// Whether `commit` is already present in the local object store.
    pub async fn has_commit(&self, commit: &str) -> bool {
        GitCommand::rev_parse(commit).current_dir(&self.path).execute_success().await.is_ok()
    }

    /// Materialize `commit` as a detached worktree at `worktree_path`.
    ///
    /// A leftover directory at the path is removed first, and registrations
    /// whose directories vanished are pruned.
    pub async fn create_worktree(&self, worktree_path: impl AsRef<Path>, commit: &str) -> Result<Self> {
        let worktree_path = worktree_path.as_ref();
        if worktree_path.exists() {
            tokio::fs::remove_dir_all(worktree_path).await.with_context(|| {
                format!("Failed to remove stale worktree {}", worktree_path.display())
            })?;
        }
        if let Some(parent) = worktree_path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create parent directory for worktree: {}", parent.display())
            })?;
        }

        GitCommand::worktree_prune().current_dir(&self.path).execute_success().await?;
        GitCommand::worktree_add(worktree_path, commit)
            .current_dir(&self.path)
            .timeout(GIT_FETCH_TIMEOUT)
            .execute_success()
            .await?;

        Ok(Self::new(worktree_path))
    }
}

/// Whether `revision` is a full 40-character commit SHA.
#[must_use]
pub fn is_commit_sha(revision: &str) -> bool {
    revision.len() == 40 && revision.chars().all(|c| c.is_ascii_hexdigit())
}

/// Canonical form of a repository URL used for identity and checkout naming.
///
/// Trailing slashes and a `.git` suffix are ignored, so `https://h/r.git`
/// and `https://h/r/` name the same repository.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_commit_sha() {
        assert!(is_commit_sha("0123456789abcdef0123456789abcdef01234567"));
        assert!(!is_commit_sha("main"));
        assert!(!is_commit_sha("0123456"));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("https://example.com/db.git"), "https://example.com/db");
        assert_eq!(normalize_url("https://example.com/db/"), "https://example.com/db");
        assert_eq!(normalize_url("git@example.com:team/db.git"), "git@example.com:team/db");
    }

    #[test]
    fn test_is_git_repo() {
        let temp = TempDir::new().unwrap();
        let repo = GitRepo::new(temp.path());
        assert!(!repo.is_git_repo());
        std::fs::create_dir(temp.path().join(".git")).unwrap();
        assert!(repo.is_git_repo());
    }

    #[test]
    fn test_only_command_errors_retry() {
        let transient: anyhow::Error = KubedepsError::GitCommandError {
            operation: "fetch".into(),
            stderr: "connection reset".into(),
        }
        .into();
        assert!(is_retryable(&transient));
        assert!(!is_retryable(&KubedepsError::GitNotFound.into()));
    }
}
