//! Local git repositories for exercising the git source resolver.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A throwaway repository driven through the system `git` binary.
pub struct TestGit {
    repo_path: PathBuf,
}

impl TestGit {
    fn run_git_command(&self, args: &[&str], action: &str) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .with_context(|| action.to_string())?;

        if !output.status.success() {
            bail!("{} failed: {}", action, String::from_utf8_lossy(&output.stderr));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Initialize a repository on branch `main` with a test identity.
    pub fn init(repo_path: impl Into<PathBuf>) -> Result<Self> {
        let repo = Self {
            repo_path: repo_path.into(),
        };
        fs::create_dir_all(&repo.repo_path)?;
        repo.run_git_command(&["init", "--quiet"], "Failed to initialize git repository")?;
        repo.run_git_command(&["symbolic-ref", "HEAD", "refs/heads/main"], "Failed to name branch")?;
        repo.run_git_command(&["config", "user.email", "test@kubedeps.example"], "Failed to set email")?;
        repo.run_git_command(&["config", "user.name", "Test User"], "Failed to set name")?;
        repo.run_git_command(&["config", "commit.gpgsign", "false"], "Failed to disable signing")?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        &self.repo_path
    }

    /// `file://` URL of the repository, usable as a dependency source.
    pub fn url(&self) -> String {
        format!("file://{}", self.repo_path.display())
    }

    /// Write `content` to `relative`, creating parent directories.
    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let file = self.repo_path.join(relative);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file, content).with_context(|| format!("Failed to write {}", file.display()))
    }

    /// Stage everything and commit, returning the new commit SHA.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        self.run_git_command(&["add", "."], "Failed to add files to git")?;
        self.run_git_command(&["commit", "--quiet", "-m", message], "Failed to create git commit")?;
        self.head()
    }

    pub fn tag(&self, tag_name: &str) -> Result<()> {
        self.run_git_command(&["tag", tag_name], &format!("Failed to create tag: {tag_name}"))?;
        Ok(())
    }

    pub fn head(&self) -> Result<String> {
        self.run_git_command(&["rev-parse", "HEAD"], "Failed to read HEAD")
    }
}
