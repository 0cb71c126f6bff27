//! Print the execution plan without running it.
//!
//! ```text
//! Wave 1: db, cache
//! Wave 2: api, web
//! Wave 3: app
//! ```

use anyhow::Result;
use clap::Args;

use super::CliConfig;
use super::common::CommandContext;
use crate::planner::{Direction, plan};

#[derive(Args, Debug)]
pub struct PlanCommand {
    /// Which operation to plan.
    #[arg(long, value_enum, default_value_t = Direction::Deploy)]
    direction: Direction,

    /// Restrict the plan to these dependencies (repeatable).
    #[arg(long = "dependency", value_name = "NAME")]
    dependencies: Vec<String>,

    /// Plan each member of a dependency cycle once instead of failing.
    #[arg(long)]
    allow_cycles: bool,
}

impl PlanCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let ctx = CommandContext::load(cli).await?;
        let graph = ctx.build_graph(self.allow_cycles, true).await?;
        let plan = plan(&graph, self.direction, &self.dependencies)?;

        print!("{}", plan.render());
        Ok(())
    }
}
