//! Executes an [`ExecutionPlan`] wave by wave.
//!
//! Nodes of one wave run concurrently (optionally bounded), and every node
//! of a wave reaches a terminal state before the next wave starts. A failed
//! node never aborts its siblings; nodes whose prerequisites failed are
//! skipped and reported with the failure that blocked them. The aggregated
//! [`RunResult`] is returned to the caller, which decides what is fatal.
//!
//! - [`executor`]: the [`NodeExecutor`] capability and its context
//! - [`output`]: live or buffered per-node output

pub mod executor;
pub mod output;

pub use executor::{NodeContext, NodeExecutor};
pub use output::{NodeOutput, OutputHub};

use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::NodeOperationError;
use crate::graph::{DependencyGraph, NodeId};
use crate::planner::{ExecutionPlan, NodeRole};
use crate::state::{RunStatus, StateCache, StateEntry};
use crate::utils::ProgressBar;

/// A lifecycle operation on one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Deploy,
    Purge,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => f.write_str("deploy"),
            Self::Purge => f.write_str("purge"),
        }
    }
}

/// Knobs for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stream node output live instead of buffering it per node.
    pub verbose: bool,
    /// Maximum concurrently running nodes per wave; `None` or `0` is unbounded.
    pub concurrency: Option<usize>,
    /// Ignore the state cache and always rebuild.
    pub force_build: bool,
    /// Time budget for one node's operation.
    pub node_timeout: Option<Duration>,
    /// Time budget for the whole run.
    pub run_timeout: Option<Duration>,
}

/// Aggregated outcome of a run.
#[derive(Debug, Default)]
pub struct RunResult {
    /// Executed successfully, in plan order.
    pub succeeded: Vec<NodeId>,
    pub failed: BTreeMap<NodeId, NodeOperationError>,
    /// Skipped node → the failed node that blocked it.
    pub skipped: BTreeMap<NodeId, NodeId>,
    /// Not dispatched because the run was cancelled.
    pub cancelled: Vec<NodeId>,
    /// Kept for ordering only, not executed.
    pub passed_through: Vec<NodeId>,
    /// Deployed without an image rebuild.
    pub build_skipped: Vec<NodeId>,
}

impl RunResult {
    /// `true` when every executed node succeeded and nothing was skipped or cancelled.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.cancelled.is_empty()
    }

    /// Plain-text summary naming succeeded, failed (with cause) and skipped nodes.
    #[must_use]
    pub fn summary(&self, graph: &DependencyGraph) -> String {
        let mut out = String::new();
        let names = |ids: &[NodeId]| ids.iter().map(|id| graph.name_of(id)).collect::<Vec<_>>().join(", ");

        if !self.succeeded.is_empty() {
            let _ = writeln!(out, "Succeeded ({}): {}", self.succeeded.len(), names(&self.succeeded));
        }
        if !self.failed.is_empty() {
            let _ = writeln!(out, "Failed ({}):", self.failed.len());
            for (id, error) in &self.failed {
                let _ = writeln!(out, "  {}: {}", graph.name_of(id), error);
            }
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out, "Skipped ({}):", self.skipped.len());
            for (id, blocker) in &self.skipped {
                let _ =
                    writeln!(out, "  {}: dependency '{}' failed", graph.name_of(id), graph.name_of(blocker));
            }
        }
        if !self.cancelled.is_empty() {
            let _ = writeln!(out, "Cancelled ({}): {}", self.cancelled.len(), names(&self.cancelled));
        }
        out
    }
}

/// Terminal state of a node within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    /// Blocked; carries the failed node at the root of the chain.
    Skipped(NodeId),
    Cancelled,
    PassedThrough,
}

/// What came back from dispatching one node.
enum Dispatched {
    Finished {
        result: Result<(), NodeOperationError>,
        skip_build: bool,
    },
    Cancelled,
}

/// Drives a plan through a [`NodeExecutor`].
pub struct DependencyRunner<'a, E> {
    executor: &'a E,
    cache: &'a StateCache,
    output: &'a OutputHub,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
}

impl<'a, E: NodeExecutor> DependencyRunner<'a, E> {
    pub fn new(executor: &'a E, cache: &'a StateCache, output: &'a OutputHub) -> Self {
        Self {
            executor,
            cache,
            output,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    /// Stop dispatching new nodes once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Execute every wave of `plan` in order.
    pub async fn run(&self, plan: &ExecutionPlan<'_>, options: &RunOptions) -> RunResult {
        let deadline = options.run_timeout.map(|budget| Instant::now() + budget);
        let limit = options.concurrency.filter(|n| *n > 0).unwrap_or(usize::MAX);
        let mut outcomes: HashMap<NodeId, Outcome> = HashMap::new();
        let mut result = RunResult::default();

        info!(
            "Starting {} of {} nodes in {} waves",
            plan.direction(),
            plan.selected_count(),
            plan.waves().len()
        );

        for (index, wave) in plan.waves().iter().enumerate() {
            let mut dispatch = Vec::new();
            for id in wave {
                let outcome = match self.blocked_by(plan, id, &outcomes) {
                    Some(outcome) => outcome,
                    None if plan.role(id) == Some(NodeRole::Ancestor) => Outcome::PassedThrough,
                    None if self.cancel.is_cancelled() => Outcome::Cancelled,
                    None => {
                        dispatch.push(id);
                        continue;
                    }
                };
                self.settle(plan, id, outcome, &mut outcomes, &mut result);
            }

            debug!("Wave {}: dispatching {} of {} nodes", index + 1, dispatch.len(), wave.len());
            let finished: HashMap<NodeId, Dispatched> = stream::iter(dispatch.into_iter().map(|id| async move {
                let dispatched = self.dispatch(plan, id, options, deadline).await;
                (id.clone(), dispatched)
            }))
            .buffer_unordered(limit)
            .collect()
            .await;

            // Record in plan order, not completion order.
            for id in wave {
                let Some(dispatched) = finished.get(id) else {
                    continue;
                };
                let outcome = match dispatched {
                    Dispatched::Cancelled => Outcome::Cancelled,
                    Dispatched::Finished {
                        result: Ok(()),
                        skip_build,
                    } => {
                        if *skip_build {
                            result.build_skipped.push(id.clone());
                        }
                        Outcome::Succeeded
                    }
                    Dispatched::Finished {
                        result: Err(_),
                        ..
                    } => Outcome::Failed,
                };
                self.settle(plan, id, outcome, &mut outcomes, &mut result);
            }
            for (id, dispatched) in finished {
                if let Dispatched::Finished {
                    result: Err(error),
                    ..
                } = dispatched
                {
                    result.failed.insert(id, error);
                }
            }
        }

        info!(
            "{} finished: {} succeeded, {} failed, {} skipped, {} cancelled",
            plan.direction(),
            result.succeeded.len(),
            result.failed.len(),
            result.skipped.len(),
            result.cancelled.len()
        );
        result
    }

    /// Outcome forced on `id` by a prerequisite that did not succeed.
    fn blocked_by(
        &self,
        plan: &ExecutionPlan<'_>,
        id: &NodeId,
        outcomes: &HashMap<NodeId, Outcome>,
    ) -> Option<Outcome> {
        let mut cancelled = false;
        for prerequisite in plan.prerequisites(id) {
            match outcomes.get(&prerequisite) {
                Some(Outcome::Failed) => return Some(Outcome::Skipped(prerequisite)),
                Some(Outcome::Skipped(root_cause)) => return Some(Outcome::Skipped(root_cause.clone())),
                Some(Outcome::Cancelled) => cancelled = true,
                _ => {}
            }
        }
        cancelled.then_some(Outcome::Cancelled)
    }

    fn settle(
        &self,
        plan: &ExecutionPlan<'_>,
        id: &NodeId,
        outcome: Outcome,
        outcomes: &mut HashMap<NodeId, Outcome>,
        result: &mut RunResult,
    ) {
        let name = plan.graph().name_of(id);
        match &outcome {
            Outcome::Succeeded => result.succeeded.push(id.clone()),
            Outcome::Failed => {}
            Outcome::Skipped(blocker) => {
                warn!("Skipping '{}': dependency '{}' failed", name, plan.graph().name_of(blocker));
                result.skipped.insert(id.clone(), blocker.clone());
            }
            Outcome::Cancelled => {
                debug!("Not dispatching '{}': run cancelled", name);
                result.cancelled.push(id.clone());
            }
            Outcome::PassedThrough => {
                debug!("Passing through '{}' (not selected)", name);
                result.passed_through.push(id.clone());
            }
        }
        if outcome != Outcome::PassedThrough
            && let Some(bar) = &self.progress
        {
            bar.inc(1);
        }
        outcomes.insert(id.clone(), outcome);
    }

    /// Run one node's operation and record its outcome in the state cache.
    async fn dispatch(
        &self,
        plan: &ExecutionPlan<'_>,
        id: &NodeId,
        options: &RunOptions,
        deadline: Option<Instant>,
    ) -> Dispatched {
        if self.cancel.is_cancelled() {
            return Dispatched::Cancelled;
        }
        let operation = plan.direction().operation();
        let Some(node) = plan.graph().node(id) else {
            return Dispatched::Finished {
                result: Err(NodeOperationError::Failed {
                    operation,
                    source: anyhow::anyhow!("node {id} is not part of the graph"),
                }),
                skip_build: false,
            };
        };

        let skip_build = operation == Operation::Deploy
            && (node.skip_build()
                || (!options.force_build
                    && self.cache.get(id).is_some_and(|entry| entry.is_deployed_at(&node.fingerprint))));
        if skip_build {
            debug!("Skipping image build for '{}': source unchanged or skipBuild set", node.name);
        }

        if let Some(bar) = &self.progress {
            bar.set_message(format!("{operation} {}", node.name));
        }

        let output = self.output.node(&node.name, operation, options.verbose);
        let ctx = NodeContext {
            node,
            operation,
            skip_build,
            output: &output,
            cancel: &self.cancel,
        };

        let budget = match (options.node_timeout, deadline) {
            (node_budget, Some(deadline)) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                Some(node_budget.map_or(remaining, |b| b.min(remaining)))
            }
            (node_budget, None) => node_budget,
        };

        let started = Instant::now();
        let result = if budget.is_some_and(|b| b.is_zero()) {
            Err(NodeOperationError::Timeout {
                operation,
                after: options.run_timeout.unwrap_or_default(),
            })
        } else {
            match operation {
                Operation::Deploy => bounded(operation, budget, self.executor.deploy(&ctx)).await,
                Operation::Purge => bounded(operation, budget, self.executor.purge(&ctx)).await,
            }
        };
        output.flush();

        let status = match &result {
            Ok(()) => {
                info!("{} of '{}' succeeded in {:.1}s", operation, node.name, started.elapsed().as_secs_f64());
                RunStatus::Succeeded
            }
            Err(error) => {
                warn!("{} of '{}': {}", operation, node.name, error);
                RunStatus::Failed
            }
        };
        self.cache.put(id.clone(), StateEntry::new(&node.name, &node.fingerprint, operation, status));

        Dispatched::Finished {
            result,
            skip_build,
        }
    }
}

/// Await `operation` within `budget`, mapping errors and timeouts.
async fn bounded(
    operation: Operation,
    budget: Option<Duration>,
    future: impl Future<Output = anyhow::Result<()>>,
) -> Result<(), NodeOperationError> {
    let failed = |source| NodeOperationError::Failed {
        operation,
        source,
    };
    match budget {
        Some(after) => match tokio::time::timeout(after, future).await {
            Ok(result) => result.map_err(failed),
            Err(_) => Err(NodeOperationError::Timeout {
                operation,
                after,
            }),
        },
        None => future.await.map_err(failed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Deploy.to_string(), "deploy");
        assert_eq!(Operation::Purge.to_string(), "purge");
        assert_eq!(serde_json::to_string(&Operation::Purge).unwrap(), "\"purge\"");
    }

    #[test]
    fn test_empty_result_is_success() {
        let result = RunResult::default();
        assert!(result.is_success());
    }
}
