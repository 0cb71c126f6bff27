//! Display the resolved dependency tree.
//!
//! ```text
//! app
//! ├── api
//! │   └── db
//! └── web
//!     └── db (shared)
//! ```
//!
//! Projects reached through more than one parent are expanded once and marked
//! `(shared)` afterwards; a tolerated cycle is shown as `(circular reference)`.

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use super::CliConfig;
use super::common::{CommandContext, display_dir};

#[derive(Args, Debug)]
pub struct TreeCommand {
    /// Show cycles as circular references instead of failing.
    #[arg(long)]
    allow_cycles: bool,
}

impl TreeCommand {
    pub async fn execute(self, cli: &CliConfig) -> Result<()> {
        let ctx = CommandContext::load(cli).await?;
        let graph = ctx.build_graph(self.allow_cycles, true).await?;

        print!("{}", graph.to_tree_string());

        let cycles = graph.cycle_edges().len();
        println!(
            "\n{} projects in {}{}",
            graph.len(),
            display_dir(&ctx.project_dir).cyan(),
            if cycles > 0 {
                format!(", {} circular references", cycles).yellow().to_string()
            } else {
                String::new()
            }
        );
        Ok(())
    }
}
