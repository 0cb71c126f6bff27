//! Fluent builder for git invocations
//!
//! Every git call goes through [`GitCommand`] so that working directory
//! handling, timeouts, logging and error mapping stay consistent.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::KubedepsError;

/// Builder for a single git command.
///
/// ```rust,ignore
/// use kubedeps::git::command_builder::GitCommand;
///
/// # async fn example() -> anyhow::Result<()> {
/// let head = GitCommand::current_commit()
///     .current_dir("/path/to/repo")
///     .with_context("backend")
///     .execute_stdout()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// Defaults: output captured, 5 minute timeout, `GIT_TERMINAL_PROMPT=0` so
/// that credential prompts fail fast instead of hanging a run.
pub struct GitCommand {
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
    timeout_duration: Option<Duration>,
    /// Shown in log lines to tell concurrent operations apart
    context: Option<String>,
}

impl Default for GitCommand {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            current_dir: None,
            env_vars: vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())],
            timeout_duration: Some(Duration::from_secs(300)),
            context: None,
        }
    }
}

impl GitCommand {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run inside `dir` (passed to git as `-C <dir>`).
    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    pub const fn timeout(mut self, duration: Duration) -> Self {
        self.timeout_duration = Some(duration);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// The git subcommand, used to label errors.
    fn operation(&self) -> String {
        self.args.first().cloned().unwrap_or_else(|| "unknown".to_string())
    }

    /// Execute the command and return its output.
    ///
    /// # Errors
    ///
    /// - [`KubedepsError::GitNotFound`] when git is not on `PATH`
    /// - [`KubedepsError::GitCommandError`] on a non-zero exit or timeout
    pub async fn execute(self) -> Result<GitCommandOutput> {
        let start = std::time::Instant::now();
        let git = which::which("git").map_err(|_| KubedepsError::GitNotFound)?;

        let mut full_args = Vec::new();
        if let Some(ref dir) = self.current_dir {
            full_args.push("-C".to_string());
            full_args.push(dir.display().to_string());
        }
        full_args.extend(self.args.iter().cloned());

        let label = self.context.as_deref().unwrap_or("git");
        tracing::debug!(target: "git", "({}) Executing command: git {}", label, full_args.join(" "));

        let mut cmd = Command::new(&git);
        cmd.args(&full_args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        cmd.kill_on_drop(true);

        let output_future = cmd.output();
        let output = if let Some(duration) = self.timeout_duration {
            if let Ok(result) = timeout(duration, output_future).await {
                result.with_context(|| format!("Failed to execute git {}", full_args.join(" ")))?
            } else {
                tracing::warn!(
                    target: "git",
                    "Command timed out after {} seconds: git {}",
                    duration.as_secs(),
                    full_args.join(" ")
                );
                return Err(KubedepsError::GitCommandError {
                    operation: self.operation(),
                    stderr: format!(
                        "Git command timed out after {} seconds. Check network access and credentials, \
                         or run it manually: git {}",
                        duration.as_secs(),
                        full_args.join(" ")
                    ),
                }
                .into());
            }
        } else {
            output_future.await.with_context(|| format!("Failed to execute git {}", full_args.join(" ")))?
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(target: "git", "({}) Command failed with exit code: {:?}", label, output.status.code());
            return Err(KubedepsError::GitCommandError {
                operation: self.operation(),
                stderr: if stderr.trim().is_empty() {
                    stdout.trim().to_string()
                } else {
                    stderr.trim().to_string()
                },
            }
            .into());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(
                target: "git::perf",
                "({}) Git {} took {:.2}s",
                label,
                self.operation(),
                elapsed.as_secs_f64()
            );
        }

        Ok(GitCommandOutput {
            stdout,
            stderr,
        })
    }

    /// Execute and return trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        let output = self.execute().await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

/// Captured output of a successful git command.
pub struct GitCommandOutput {
    pub stdout: String,
    pub stderr: String,
}

// Convenience builders for the operations dependency checkouts need

impl GitCommand {
    pub fn clone(url: &str, target: impl AsRef<Path>) -> Self {
        Self::new().args(["clone", "--quiet", "--no-checkout", url]).arg(target.as_ref().display().to_string())
    }

    pub fn fetch() -> Self {
        Self::new().args(["fetch", "--quiet", "--tags", "--force", "origin"])
    }

    pub fn rev_parse(reference: &str) -> Self {
        Self::new().args(["rev-parse", "--verify", "--quiet"]).arg(format!("{reference}^{{commit}}"))
    }

    pub fn current_commit() -> Self {
        Self::new().args(["rev-parse", "HEAD"])
    }

    pub fn remote_head() -> Self {
        Self::new().args(["rev-parse", "--abbrev-ref", "origin/HEAD"])
    }

    /// Detached worktree of `commit` at `path`, replacing a stale registration.
    pub fn worktree_add(path: impl AsRef<Path>, commit: &str) -> Self {
        Self::new()
            .args(["worktree", "add", "--quiet", "--detach", "--force"])
            .arg(path.as_ref().display().to_string())
            .arg(commit)
    }

    pub fn worktree_prune() -> Self {
        Self::new().args(["worktree", "prune"])
    }
}
