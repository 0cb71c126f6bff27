//! Purge the project's deployments.
//!
//! By default only the root project is purged. `--all` also purges every
//! dependency, dependents before their dependencies; `--dependency` purges
//! the named dependencies (and whatever only they use) while leaving the
//! root project's own deployments in place.
//!
//! Failures are reported but do not fail the command, so a partially
//! deployed environment can always be cleaned up as far as possible.
//!
//! # Examples
//!
//! ```bash
//! kubedeps purge                        # root project only
//! kubedeps purge --all                  # root and all dependencies
//! kubedeps purge --dependency backend   # backend subtree only
//! kubedeps purge --deployments api,web  # selected root deployments
//! ```

use anyhow::Result;
use clap::{ArgAction, Args};
use tracing::{error, warn};

use super::CliConfig;
use super::common::CommandContext;
use crate::deploy::ClusterExecutor;
use crate::planner::{Direction, ExecutionPlan, plan};
use crate::runner::RunOptions;

#[derive(Args, Debug)]
pub struct PurgeCommand {
    /// Purge all dependencies as well.
    #[arg(short, long)]
    all: bool,

    /// Deprecated alias of --all.
    #[arg(long, hide = true)]
    dependencies: bool,

    /// Purge only this dependency and what nothing else uses (repeatable).
    #[arg(long = "dependency", value_name = "NAME")]
    dependency: Vec<String>,

    /// Purge only these deployments of the root project (comma separated).
    #[arg(short = 'd', long, value_delimiter = ',', value_name = "NAMES", value_parser = trimmed)]
    deployments: Option<Vec<String>>,

    /// Stream each dependency's output live.
    #[arg(long, action = ArgAction::Set, default_value_t = true, value_name = "BOOL")]
    verbose_dependencies: bool,

    /// Maximum number of dependencies purged at the same time.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    max_parallel: Option<u64>,

    /// Purge each member of a dependency cycle once instead of failing.
    #[arg(long)]
    allow_cycles: bool,
}

impl PurgeCommand {
    pub async fn execute(mut self, cli: &CliConfig) -> Result<()> {
        if self.dependencies {
            warn!("--dependencies is deprecated, use --all instead");
            self.all = true;
        }

        let ctx = CommandContext::load(cli).await?;
        let include_dependencies = self.all || !self.dependency.is_empty();
        let graph = ctx.build_graph(self.allow_cycles, include_dependencies).await?;

        let plan = if self.dependency.is_empty() && !self.all {
            ExecutionPlan::root_only(&graph, Direction::Purge)
        } else {
            plan(&graph, Direction::Purge, &self.dependency)?
        };

        let mut executor = ClusterExecutor::new(ctx.global.tools.clone(), cli.target.clone());
        if let Some(mut names) = self.deployments {
            names.retain(|name| !name.is_empty());
            for name in names.iter().filter(|n| !ctx.config.deployments.iter().any(|d| d.name == **n)) {
                warn!("Deployment '{}' is not defined in the project", name);
            }
            executor = executor.with_root_deployments(names);
        }

        let options = RunOptions {
            verbose: self.verbose_dependencies,
            concurrency: ctx.concurrency(self.max_parallel.map(|n| n as usize)),
            force_build: false,
            node_timeout: ctx.node_timeout(),
            run_timeout: None,
        };

        let result = ctx.run_plan(&executor, &plan, &options).await?;
        if !result.is_success() {
            error!("Purge finished with errors; some deployments may still exist");
        }
        Ok(())
    }
}

fn trimmed(value: &str) -> Result<String, std::convert::Infallible> {
    Ok(value.trim().to_string())
}
