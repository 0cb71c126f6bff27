//! Depth-first discovery of the dependency graph.
//!
//! Starting at the root project, each enabled declaration is resolved to a
//! local checkout, its configuration is loaded (with the declared profile)
//! and its own declarations are visited in order. Node ids are derived from
//! the declaration before anything is fetched, so a project shared by several
//! parents is resolved and loaded exactly once per build.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tracing::{debug, warn};

use super::node::{DependencyNode, NodeId};
use super::{DependencyGraph, EdgeKind};
use crate::config::{ConfigLoader, DependencyDeclaration, DependencySource, ProjectConfig, project_label};
use crate::core::KubedepsError;
use crate::source::{SourceResolver, identity_key};
use crate::utils::normalize_path;

/// Options for [`GraphBuilder::build`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Tolerate cycles: deploy each member once and stop descending at the
    /// first repeated node instead of failing the build.
    pub allow_cycles: bool,
}

/// Builds a [`DependencyGraph`] from a root project.
pub struct GraphBuilder<'a, L, R> {
    loader: &'a L,
    resolver: &'a R,
}

/// Mutable state threaded through the traversal.
struct Traversal {
    graph: DependencyGraph,
    /// Ids and names of the nodes on the current path from the root.
    stack: Vec<(NodeId, String)>,
    resolved: usize,
}

type VisitFuture<'s> = Pin<Box<dyn Future<Output = Result<(), KubedepsError>> + Send + 's>>;

impl<'a, L, R> GraphBuilder<'a, L, R>
where
    L: ConfigLoader + Sync,
    R: SourceResolver + Sync,
{
    pub const fn new(loader: &'a L, resolver: &'a R) -> Self {
        Self {
            loader,
            resolver,
        }
    }

    /// Resolve every transitive dependency of the project in `root_dir`.
    ///
    /// # Errors
    ///
    /// - [`KubedepsError::CycleDetected`] when a declaration leads back to a
    ///   node on the current path and cycles are not allowed
    /// - [`KubedepsError::SourceResolution`] when a source cannot be fetched
    ///   or its configuration cannot be loaded
    pub async fn build(
        &self,
        root_dir: &Path,
        root_config: ProjectConfig,
        options: BuildOptions,
    ) -> Result<DependencyGraph, KubedepsError> {
        let root_dir = normalize_path(root_dir);
        let root_source = DependencySource::Path {
            path: root_dir.clone(),
        };
        let root_name = project_label(&root_config, &root_dir);
        let resolution_error = |reason: String| KubedepsError::SourceResolution {
            name: root_name.clone(),
            source_desc: root_source.to_string(),
            reason,
        };

        let key = identity_key(&root_source, &root_dir).map_err(|e| resolution_error(format!("{e:#}")))?;
        let resolved = self
            .resolver
            .resolve(&root_source, &root_dir)
            .await
            .map_err(|e| resolution_error(format!("{e:#}")))?;

        let root_id = NodeId::derive(&key, None);
        let declarations = root_config.dependencies.clone();
        let root = DependencyNode {
            id: root_id.clone(),
            name: root_name.clone(),
            declaration: None,
            resolved_path: root_dir.clone(),
            config: root_config,
            children: Vec::new(),
            fingerprint: resolved.fingerprint,
        };

        let mut state = Traversal {
            graph: DependencyGraph::new(root),
            stack: vec![(root_id.clone(), root_name)],
            resolved: 0,
        };
        self.visit(&mut state, root_id, root_dir, declarations, options).await?;

        debug!(
            "Resolved dependency graph: {} nodes, {} sources fetched, {} cycle edges",
            state.graph.len(),
            state.resolved,
            state.graph.cycle_edges().len()
        );
        Ok(state.graph)
    }

    fn visit<'s>(
        &'s self,
        state: &'s mut Traversal,
        parent: NodeId,
        parent_dir: PathBuf,
        declarations: Vec<DependencyDeclaration>,
        options: BuildOptions,
    ) -> VisitFuture<'s> {
        Box::pin(async move {
            for declaration in declarations {
                if declaration.disabled {
                    debug!("Skipping disabled dependency '{}'", declaration.name);
                    continue;
                }

                let resolution_error = |reason: String| KubedepsError::SourceResolution {
                    name: declaration.name.clone(),
                    source_desc: declaration.source.to_string(),
                    reason,
                };

                let key = identity_key(&declaration.source, &parent_dir)
                    .map_err(|e| resolution_error(format!("{e:#}")))?;
                let id = NodeId::derive(&key, declaration.profile.as_deref());

                if let Some(position) = state.stack.iter().position(|(ancestor, _)| *ancestor == id) {
                    let mut path: Vec<String> = state.stack.iter().map(|(_, name)| name.clone()).collect();
                    path.push(state.stack[position].1.clone());
                    if !options.allow_cycles {
                        return Err(KubedepsError::CycleDetected {
                            path,
                        });
                    }
                    warn!(
                        "Dependency cycle tolerated: {}. '{}' is deployed once and not revisited",
                        path.join(" → "),
                        state.stack[position].1
                    );
                    state.graph.add_edge(&parent, &id, EdgeKind::CycleBreak);
                    continue;
                }

                if state.graph.contains(&id) {
                    debug!("Reusing already resolved dependency '{}'", declaration.name);
                    state.graph.add_edge(&parent, &id, EdgeKind::Dependency);
                    continue;
                }

                debug!("Resolving dependency '{}' from {}", declaration.name, declaration.source);
                let resolved = self
                    .resolver
                    .resolve(&declaration.source, &parent_dir)
                    .await
                    .map_err(|e| resolution_error(format!("{e:#}")))?;
                let config = self
                    .loader
                    .load(&resolved.path, declaration.profile.as_deref())
                    .map_err(|e| resolution_error(format!("{e:#}")))?;
                state.resolved += 1;

                let children = config.dependencies.clone();
                let name = declaration.name.clone();
                let node = DependencyNode {
                    id: id.clone(),
                    name: name.clone(),
                    declaration: Some(declaration),
                    resolved_path: resolved.path.clone(),
                    config,
                    children: Vec::new(),
                    fingerprint: resolved.fingerprint,
                };
                state.graph.insert_node(node);

                state.stack.push((id.clone(), name));
                self.visit(state, id.clone(), resolved.path, children, options).await?;
                state.stack.pop();

                state.graph.add_edge(&parent, &id, EdgeKind::Dependency);
            }
            Ok(())
        })
    }
}
