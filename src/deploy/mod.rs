//! Cluster-facing node executor.
//!
//! [`ClusterExecutor`] turns a node's project configuration into tool
//! invocations: image builds with `docker`, then each deployment with
//! `kubectl` or `helm` in declaration order. Purging runs the deployments'
//! delete commands in reverse order and never builds.
//!
//! All tool output is streamed into the node's [`NodeOutput`], so the runner
//! decides whether it is shown live or as one block per node.

pub mod helm;
pub mod image;
pub mod kubectl;
pub mod process;

use anyhow::{Result, bail};
use std::future::Future;
use tracing::debug;

pub use process::{ToolCommand, resolve_tool};

use crate::config::{DeploymentBackend, DeploymentConfig, ToolPaths};
use crate::graph::DependencyNode;
use crate::runner::{NodeContext, NodeExecutor, NodeOutput};

/// Where deployments go. Unset fields fall back to the tools' own defaults
/// (current kube context, namespace from the manifest or context).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterTarget {
    pub namespace: Option<String>,
    pub kube_context: Option<String>,
}

/// Deploys and purges projects on a Kubernetes cluster.
#[derive(Debug, Clone, Default)]
pub struct ClusterExecutor {
    tools: ToolPaths,
    target: ClusterTarget,
    root_deployments: Option<Vec<String>>,
}

impl ClusterExecutor {
    pub const fn new(tools: ToolPaths, target: ClusterTarget) -> Self {
        Self {
            tools,
            target,
            root_deployments: None,
        }
    }

    /// Restrict the root project's operation to the named deployments.
    /// Dependencies always run all of theirs.
    #[must_use]
    pub fn with_root_deployments(mut self, names: Vec<String>) -> Self {
        self.root_deployments = Some(names);
        self
    }

    fn deployments<'n>(&self, node: &'n DependencyNode) -> Vec<&'n DeploymentConfig> {
        let filter = self.root_deployments.as_ref().filter(|_| node.is_root());
        node.config
            .deployments
            .iter()
            .filter(|d| filter.is_none_or(|names| names.iter().any(|n| *n == d.name)))
            .collect()
    }

    /// Commands a deploy of `node` runs, in order.
    pub fn deploy_commands(&self, node: &DependencyNode, skip_build: bool) -> Result<Vec<ToolCommand>> {
        let dir = &node.resolved_path;
        let mut commands = Vec::new();

        if !skip_build {
            commands.extend(
                node.config.images.iter().map(|image| image::build_command(self.tools.docker(), dir, image)),
            );
        }

        for deployment in self.deployments(node) {
            match backend(deployment)? {
                DeploymentBackend::Kubectl(k) => {
                    commands.extend(kubectl::apply_commands(self.tools.kubectl(), &self.target, dir, k));
                }
                DeploymentBackend::Helm(h) => {
                    commands.push(helm::install_command(self.tools.helm(), &self.target, dir, &deployment.name, h));
                }
            }
        }
        Ok(commands)
    }

    /// Commands a purge of `node` runs, in order.
    pub fn purge_commands(&self, node: &DependencyNode) -> Result<Vec<ToolCommand>> {
        let dir = &node.resolved_path;
        let mut commands = Vec::new();

        for deployment in self.deployments(node).into_iter().rev() {
            match backend(deployment)? {
                DeploymentBackend::Kubectl(k) => {
                    commands.extend(kubectl::delete_commands(self.tools.kubectl(), &self.target, dir, k));
                }
                DeploymentBackend::Helm(h) => {
                    commands.push(helm::uninstall_command(self.tools.helm(), &self.target, dir, &deployment.name, h));
                }
            }
        }
        Ok(commands)
    }

    async fn run_all(commands: Vec<ToolCommand>, output: &NodeOutput) -> Result<()> {
        if commands.is_empty() {
            output.line("nothing to do");
            return Ok(());
        }
        for command in commands {
            output.line(format!("$ {}", command.display()));
            command.run(output).await?;
        }
        Ok(())
    }
}

fn backend(deployment: &DeploymentConfig) -> Result<DeploymentBackend<'_>> {
    match deployment.backend() {
        Some(backend) => Ok(backend),
        None => bail!("Deployment '{}' must configure exactly one of 'kubectl' or 'helm'", deployment.name),
    }
}

impl NodeExecutor for ClusterExecutor {
    fn deploy(&self, ctx: &NodeContext<'_>) -> impl Future<Output = Result<()>> + Send {
        let commands = self.deploy_commands(ctx.node, ctx.skip_build);
        let output = ctx.output;
        let name = ctx.node.name.clone();
        async move {
            let commands = commands?;
            debug!("Deploying '{}' with {} commands", name, commands.len());
            Self::run_all(commands, output).await
        }
    }

    fn purge(&self, ctx: &NodeContext<'_>) -> impl Future<Output = Result<()>> + Send {
        let commands = self.purge_commands(ctx.node);
        let output = ctx.output;
        let name = ctx.node.name.clone();
        async move {
            let commands = commands?;
            debug!("Purging '{}' with {} commands", name, commands.len());
            Self::run_all(commands, output).await
        }
    }
}
