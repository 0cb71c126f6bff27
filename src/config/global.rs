//! Global user configuration (`~/.kubedeps/config.toml`).
//!
//! Holds machine-wide defaults that do not belong in a project's
//! `kubedeps.yaml`: run concurrency, node timeout, where git dependencies are
//! checked out, and overrides for the tool binaries.
//!
//! # File Format
//!
//! ```toml
//! maxParallel = 4
//! nodeTimeoutSecs = 600
//! checkoutDir = "/var/cache/kubedeps"
//!
//! [tools]
//! kubectl = "/usr/local/bin/kubectl"
//! helm = "helm3"
//! ```
//!
//! The location can be overridden with `--config` or the `KUBEDEPS_CONFIG`
//! environment variable. A missing file yields the defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::constants::CONFIG_PATH_ENV;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Upper bound on concurrently running nodes within a wave.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Per-node operation timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_timeout_secs: Option<u64>,

    /// Directory where git dependencies are cloned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_dir: Option<PathBuf>,

    #[serde(default)]
    pub tools: ToolPaths,
}

/// Overrides for external tool binaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubectl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<String>,
}

impl ToolPaths {
    #[must_use]
    pub fn kubectl(&self) -> &str {
        self.kubectl.as_deref().unwrap_or("kubectl")
    }

    #[must_use]
    pub fn helm(&self) -> &str {
        self.helm.as_deref().unwrap_or("helm")
    }

    #[must_use]
    pub fn docker(&self) -> &str {
        self.docker.as_deref().unwrap_or("docker")
    }
}

impl GlobalConfig {
    /// Load from the explicit path, `KUBEDEPS_CONFIG`, or the default location.
    pub async fn load_with_optional(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => match std::env::var_os(CONFIG_PATH_ENV) {
                Some(env_path) => PathBuf::from(env_path),
                None => Self::default_path()?,
            },
        };

        if path.exists() {
            Self::load_from(&path).await
        } else {
            tracing::debug!("No global config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read global config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse global config from {}", path.display()))
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize global config")?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write global config to {}", path.display()))
    }

    /// `~/.kubedeps/config.toml` (`%LOCALAPPDATA%\kubedeps\config.toml` on Windows).
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join("config.toml"))
    }

    /// Checkout directory for git dependencies, defaulting under the home dir.
    pub fn checkout_dir(&self) -> Result<PathBuf> {
        match &self.checkout_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join("dependencies")),
        }
    }

    fn home_dir() -> Result<PathBuf> {
        let dir = if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine local data directory"))?
                .join("kubedeps")
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("Unable to determine home directory"))?
                .join(".kubedeps")
        };
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_round_trip_and_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");

        let missing = GlobalConfig::load_with_optional(Some(path.clone())).await.unwrap();
        assert_eq!(missing, GlobalConfig::default());
        assert_eq!(missing.tools.kubectl(), "kubectl");

        let config = GlobalConfig {
            max_parallel: Some(3),
            node_timeout_secs: Some(90),
            checkout_dir: Some(temp.path().join("checkouts")),
            tools: ToolPaths {
                helm: Some("helm3".into()),
                ..ToolPaths::default()
            },
        };
        config.save_to(&path).await.unwrap();

        let loaded = GlobalConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.tools.helm(), "helm3");
        assert_eq!(loaded.checkout_dir().unwrap(), temp.path().join("checkouts"));
    }

    #[tokio::test]
    async fn test_camel_case_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "maxParallel = 2\nnodeTimeoutSecs = 30\n").unwrap();

        let loaded = GlobalConfig::load_from(&path).await.unwrap();
        assert_eq!(loaded.max_parallel, Some(2));
        assert_eq!(loaded.node_timeout_secs, Some(30));
    }
}
