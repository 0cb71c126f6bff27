//! Shared plumbing for the CLI commands: locating and loading the project,
//! resolving its dependency graph, and driving a plan through the runner.

use anyhow::{Context, Result};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::CliConfig;
use crate::config::{ConfigLoader, GlobalConfig, ProjectConfig, ProjectConfigLoader};
use crate::graph::{BuildOptions, DependencyGraph, GraphBuilder};
use crate::planner::ExecutionPlan;
use crate::runner::{DependencyRunner, NodeExecutor, OutputHub, RunOptions, RunResult};
use crate::source::ProjectSourceResolver;
use crate::state::StateCache;
use crate::utils::{ProgressBar, normalize_path, spinner_with_message};

/// Project and configuration a command operates on.
#[derive(Debug)]
pub struct CommandContext {
    /// Root project directory (containing kubedeps.yaml).
    pub project_dir: PathBuf,
    /// Root project configuration.
    pub config: ProjectConfig,
    pub global: GlobalConfig,
    pub cli: CliConfig,
}

impl CommandContext {
    /// Load the root project and the global configuration.
    ///
    /// # Errors
    /// Returns an error if the project directory has no valid kubedeps.yaml
    /// or the global config cannot be parsed.
    pub async fn load(cli: &CliConfig) -> Result<Self> {
        let project_dir = match &cli.project_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to determine the current directory")?,
        };
        let project_dir = normalize_path(&std::path::absolute(&project_dir).with_context(|| {
            format!("Invalid project directory: {}", project_dir.display())
        })?);

        let config = ProjectConfigLoader::new().load(&project_dir, None)?;
        let global = GlobalConfig::load_with_optional(cli.config_path.clone()).await?;

        Ok(Self {
            project_dir,
            config,
            global,
            cli: cli.clone(),
        })
    }

    /// Resolve the dependency graph rooted at the project.
    ///
    /// With `include_dependencies` off the graph holds only the root, and no
    /// dependency source is fetched.
    pub async fn build_graph(&self, allow_cycles: bool, include_dependencies: bool) -> Result<DependencyGraph> {
        let mut root_config = self.config.clone();
        if !include_dependencies {
            root_config.dependencies.clear();
        }

        let resolver = ProjectSourceResolver::new(self.global.checkout_dir()?);
        let loader = ProjectConfigLoader::new();
        let spinner = self.spinner("Resolving dependencies");

        let graph = GraphBuilder::new(&loader, &resolver)
            .build(
                &self.project_dir,
                root_config,
                BuildOptions {
                    allow_cycles,
                },
            )
            .await;
        spinner.finish_and_clear();

        let graph = graph?;
        info!("Resolved {} projects", graph.len());
        Ok(graph)
    }

    pub fn state_path(&self) -> PathBuf {
        StateCache::default_path(&self.project_dir)
    }

    /// Node timeout from the global config.
    pub fn node_timeout(&self) -> Option<Duration> {
        self.global.node_timeout_secs.map(Duration::from_secs)
    }

    /// Concurrency limit: the flag wins over the global config.
    pub fn concurrency(&self, flag: Option<usize>) -> Option<usize> {
        flag.or(self.global.max_parallel)
    }

    /// Run `plan` with `executor`, persist the state cache and print the summary.
    ///
    /// Ctrl-C cancels the run: nodes already running finish, nothing new starts.
    pub async fn run_plan<E: NodeExecutor>(
        &self,
        executor: &E,
        plan: &ExecutionPlan<'_>,
        options: &RunOptions,
    ) -> Result<RunResult> {
        let state_path = self.state_path();
        let cache = StateCache::load(&state_path).await?;

        let progress = if self.cli.no_progress {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(plan.selected_count() as u64)
        };
        progress.set_prefix(match plan.direction() {
            crate::planner::Direction::Deploy => "Deploying",
            crate::planner::Direction::Purge => "Purging",
        });
        let output = OutputHub::stdout().with_progress(progress.clone());

        let token = CancellationToken::new();
        let interrupt = tokio::spawn(cancel_on_ctrl_c(token.clone()));

        let result = DependencyRunner::new(executor, &cache, &output)
            .with_cancellation(token)
            .with_progress(progress.clone())
            .run(plan, options)
            .await;

        interrupt.abort();
        progress.finish_and_clear();

        cache.save(&state_path).await.with_context(|| {
            format!("Failed to save dependency state to {}", state_path.display())
        })?;

        print_summary(&result, plan);
        Ok(result)
    }

    fn spinner(&self, message: &str) -> ProgressBar {
        if self.cli.no_progress {
            ProgressBar::hidden()
        } else {
            spinner_with_message(message)
        }
    }
}

async fn cancel_on_ctrl_c(token: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted: waiting for running dependencies to finish");
        token.cancel();
    }
}

fn print_summary(result: &RunResult, plan: &ExecutionPlan<'_>) {
    let summary = result.summary(plan.graph());
    if summary.is_empty() {
        return;
    }
    let header = if result.is_success() {
        format!("{} {}", "✓".green(), plan.direction()).bold()
    } else {
        format!("{} {}", "✗".red(), plan.direction()).bold()
    };
    println!("\n{header}");
    print!("{summary}");
}

/// Project directory for display, relative to the current directory when possible.
pub fn display_dir(dir: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| dir.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or_else(|| dir.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_for(dir: &Path) -> CliConfig {
        CliConfig {
            no_progress: true,
            config_path: Some(dir.join("missing-config.toml")),
            project_dir: Some(dir.to_path_buf()),
            ..CliConfig::default()
        }
    }

    #[tokio::test]
    async fn test_load_requires_project_config() {
        let temp = TempDir::new().unwrap();
        let err = CommandContext::load(&cli_for(temp.path())).await.unwrap_err();
        assert!(err.downcast_ref::<crate::core::KubedepsError>().is_some());
    }

    #[tokio::test]
    async fn test_build_graph_without_dependencies() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("kubedeps.yaml"),
            "name: app\ndependencies:\n  - name: db\n    source: { path: ../does-not-exist }\n",
        )
        .unwrap();

        let ctx = CommandContext::load(&cli_for(temp.path())).await.unwrap();
        let graph = ctx.build_graph(false, false).await.unwrap();
        assert_eq!(graph.len(), 1);
        assert!(ctx.build_graph(false, true).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrency_flag_overrides_global() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("kubedeps.yaml"), "name: app\n").unwrap();
        let mut ctx = CommandContext::load(&cli_for(temp.path())).await.unwrap();
        ctx.global.max_parallel = Some(2);

        assert_eq!(ctx.concurrency(None), Some(2));
        assert_eq!(ctx.concurrency(Some(8)), Some(8));
    }
}
