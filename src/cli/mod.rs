//! Command-line interface for kubedeps.
//!
//! # Available Commands
//!
//! - `deploy` - Deploy the project and its dependencies, dependencies first
//! - `purge` - Remove the project's deployments (and optionally its dependencies)
//! - `tree` - Print the resolved dependency tree
//! - `plan` - Print the execution waves without running anything
//!
//! # Global Options
//!
//! All commands support these global options:
//! - `--verbose` / `--quiet` - Log verbosity (`RUST_LOG` takes precedence)
//! - `--config` - Path to the global config file
//! - `--project-dir` - Project directory (defaults to the current directory)
//! - `--no-progress` - Disable progress bars and spinners
//! - `--namespace` / `--kube-context` - Cluster target passed to kubectl and helm
//!
//! # Example
//!
//! ```bash
//! kubedeps deploy --dependency backend
//! kubedeps purge --all --no-progress
//! kubedeps plan --direction purge
//! ```

pub mod common;
mod deploy;
mod plan;
mod purge;
mod tree;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::deploy::ClusterTarget;

/// Runtime configuration derived from the global flags.
///
/// Passed to every command instead of being written into the process
/// environment, so tests can drive commands without global state.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,

    /// Disable progress bars and spinners.
    pub no_progress: bool,

    /// Custom path to the global configuration file.
    pub config_path: Option<PathBuf>,

    /// Project directory; the current directory when `None`.
    pub project_dir: Option<PathBuf>,

    /// Namespace and kube context for cluster operations.
    pub target: ClusterTarget,
}

/// Main CLI structure for kubedeps.
#[derive(Parser, Debug)]
#[command(
    name = "kubedeps",
    about = "Deploy and purge Kubernetes projects together with their dependencies",
    version,
    author,
    long_about = "kubedeps resolves the dependency projects declared in kubedeps.yaml, \
                  deploys them dependencies-first in parallel waves and purges them in reverse."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging.
    ///
    /// Equivalent to `RUST_LOG=debug`. Mutually exclusive with `--quiet`.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a custom global configuration file.
    ///
    /// Overrides `~/.kubedeps/config.toml` and `KUBEDEPS_CONFIG`.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Project directory containing kubedeps.yaml.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Disable progress bars and spinners.
    ///
    /// Also disabled by `KUBEDEPS_NO_PROGRESS` or when stderr is not a terminal.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Kubernetes namespace for all deployments.
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Kubernetes context for all deployments.
    #[arg(long, global = true)]
    kube_context: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy the project and all (or selected) dependencies.
    ///
    /// See [`deploy::DeployCommand`].
    Deploy(deploy::DeployCommand),

    /// Purge the project's deployments, optionally with its dependencies.
    ///
    /// See [`purge::PurgeCommand`].
    Purge(purge::PurgeCommand),

    /// Print the resolved dependency tree.
    Tree(tree::TreeCommand),

    /// Print the execution waves for a deploy or purge without running them.
    Plan(plan::PlanCommand),
}

impl Cli {
    /// Execute the parsed command.
    pub async fn execute(self) -> Result<()> {
        let config = self.build_config();
        self.execute_with_config(config).await
    }

    /// Translate the global flags into a [`CliConfig`].
    #[must_use]
    pub fn build_config(&self) -> CliConfig {
        let log_level = if self.verbose {
            "kubedeps=debug,info"
        } else if self.quiet {
            "error"
        } else {
            "warn"
        };

        CliConfig {
            log_level: log_level.to_string(),
            no_progress: self.no_progress,
            config_path: self.config.clone(),
            project_dir: self.project_dir.clone(),
            target: ClusterTarget {
                namespace: self.namespace.clone(),
                kube_context: self.kube_context.clone(),
            },
        }
    }

    /// Execute with an explicit configuration.
    pub async fn execute_with_config(self, config: CliConfig) -> Result<()> {
        match self.command {
            Commands::Deploy(cmd) => cmd.execute(&config).await,
            Commands::Purge(cmd) => cmd.execute(&config).await,
            Commands::Tree(cmd) => cmd.execute(&config).await,
            Commands::Plan(cmd) => cmd.execute(&config).await,
        }
    }
}
