//! Deploy the project and its dependencies.
//!
//! Dependencies are deployed before the projects that declare them, wave by
//! wave, with the projects inside a wave running in parallel.
//!
//! # Examples
//!
//! ```bash
//! kubedeps deploy                          # everything, root last
//! kubedeps deploy --dependency backend     # backend and what it needs
//! kubedeps deploy --max-parallel 2 --verbose-dependencies
//! ```

use anyhow::{Result, bail};
use clap::Args;
use std::time::Duration;

use super::CliConfig;
use super::common::CommandContext;
use crate::deploy::ClusterExecutor;
use crate::planner::{Direction, plan};
use crate::runner::RunOptions;

#[derive(Args, Debug)]
pub struct DeployCommand {
    /// Deploy only this dependency and its own dependencies (repeatable).
    ///
    /// Projects that depend on a selected dependency are not deployed.
    #[arg(long = "dependency", value_name = "NAME")]
    dependencies: Vec<String>,

    /// Deploy each member of a dependency cycle once instead of failing.
    #[arg(long)]
    allow_cycles: bool,

    /// Rebuild images even when a dependency is unchanged since its last deploy.
    #[arg(long)]
    force_build: bool,

    /// Maximum number of dependencies deployed at the same time.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    max_parallel: Option<u64>,

    /// Abort dependencies still running after this many seconds.
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Stream each dependency's output live instead of one block per dependency.
    #[arg(long)]
    verbose_dependencies: bool,
}

impl DeployCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let ctx = CommandContext::load(cli).await?;
        let graph = ctx.build_graph(self.allow_cycles, true).await?;
        let plan = plan(&graph, Direction::Deploy, &self.dependencies)?;

        let options = RunOptions {
            verbose: self.verbose_dependencies,
            concurrency: ctx.concurrency(self.max_parallel.map(|n| n as usize)),
            force_build: self.force_build,
            node_timeout: ctx.node_timeout(),
            run_timeout: self.timeout.map(Duration::from_secs),
        };
        let executor = ClusterExecutor::new(ctx.global.tools.clone(), cli.target.clone());

        let result = ctx.run_plan(&executor, &plan, &options).await?;
        if !result.is_success() {
            let unfinished = result.failed.len() + result.skipped.len() + result.cancelled.len();
            bail!("Deploy incomplete: {unfinished} of {} projects were not deployed", plan.selected_count());
        }
        Ok(())
    }
}
