//! The per-node operation interface the runner drives.

use anyhow::Result;
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::Operation;
use super::output::NodeOutput;
use crate::graph::DependencyNode;

/// Everything an executor gets to know about one node's operation.
pub struct NodeContext<'a> {
    pub node: &'a DependencyNode,
    pub operation: Operation,
    /// Deploy without rebuilding images (declared `skipBuild` or unchanged source).
    pub skip_build: bool,
    pub output: &'a NodeOutput,
    /// Fired when the run is cancelled. The runner lets dispatched operations
    /// run to completion.
    pub cancel: &'a CancellationToken,
}

/// Performs the actual lifecycle operations for a node.
///
/// Implemented by the cluster executor in production and by recording
/// executors in tests.
pub trait NodeExecutor: Sync {
    fn deploy(&self, ctx: &NodeContext<'_>) -> impl Future<Output = Result<()>> + Send;

    fn purge(&self, ctx: &NodeContext<'_>) -> impl Future<Output = Result<()>> + Send;
}
