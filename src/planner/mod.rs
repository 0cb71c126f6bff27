//! Turns a dependency graph into ordered waves of work.
//!
//! A wave is a set of nodes with no ordering constraint between them; the
//! runner executes a wave concurrently and waits for it to finish before the
//! next one starts.
//!
//! - Deploy: a node enters a wave once every dependency of it is in an
//!   earlier wave, so leaves come first and the root last.
//! - Purge: the deploy waves reversed, so nothing is removed while a
//!   dependent still exists.
//!
//! Within a wave, nodes are ordered by their breadth-first position from the
//! root (declaration order at each level), which keeps plans reproducible.
//!
//! # Scoping
//!
//! With target names, the plan covers each target, its dependencies, and the
//! nodes that (transitively) depend on a target. The latter only carry
//! ordering and are not executed ([`NodeRole::Ancestor`]). When purging a
//! target, a dependency still needed by a project outside the purge set is
//! left alone.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fmt::Write as _;
use strsim::levenshtein;

use crate::core::KubedepsError;
use crate::graph::{DependencyGraph, NodeId};
use crate::runner::Operation;

/// Maximum edit distance, as a percentage of the name length, for suggestions.
const SIMILARITY_THRESHOLD_PERCENT: usize = 50;

/// Which way precedence flows through the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Dependencies before dependents.
    Deploy,
    /// Dependents before dependencies.
    Purge,
}

impl Direction {
    #[must_use]
    pub const fn operation(self) -> Operation {
        match self {
            Self::Deploy => Operation::Deploy,
            Self::Purge => Operation::Purge,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.operation(), f)
    }
}

/// Why a node is part of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// Executed.
    Selected,
    /// Depends on a target; kept for ordering only.
    Ancestor,
}

/// Ordered waves over a read-only graph.
#[derive(Debug, Clone)]
pub struct ExecutionPlan<'g> {
    graph: &'g DependencyGraph,
    direction: Direction,
    waves: Vec<Vec<NodeId>>,
    roles: HashMap<NodeId, NodeRole>,
    scoped: bool,
}

/// Build the plan for `direction`, optionally restricted to `targets`.
///
/// Targets match a declared dependency name or a node id. A name declared in
/// several places selects every matching node.
///
/// # Errors
///
/// [`KubedepsError::UnknownDependency`] when a target matches no node.
pub fn plan<'g>(
    graph: &'g DependencyGraph,
    direction: Direction,
    targets: &[String],
) -> Result<ExecutionPlan<'g>, KubedepsError> {
    let roles = if targets.is_empty() {
        graph.nodes().map(|n| (n.id.clone(), NodeRole::Selected)).collect()
    } else {
        let selected = resolve_targets(graph, targets)?;
        scoped_roles(graph, direction, &selected)
    };

    let waves = compute_waves(graph, direction, &roles)?;
    tracing::debug!(
        "Planned {} of {} nodes into {} waves ({})",
        roles.len(),
        graph.len(),
        waves.len(),
        direction
    );

    Ok(ExecutionPlan {
        graph,
        direction,
        waves,
        roles,
        scoped: !targets.is_empty(),
    })
}

fn resolve_targets(graph: &DependencyGraph, targets: &[String]) -> Result<Vec<NodeId>, KubedepsError> {
    let mut resolved = Vec::new();
    for target in targets {
        let mut matches = graph.find_by_name(target);
        if matches.is_empty() {
            matches.extend(graph.nodes().filter(|n| n.id.as_str() == target).map(|n| n.id.clone()));
        }
        if matches.is_empty() {
            return Err(KubedepsError::UnknownDependency {
                name: target.clone(),
                suggestion: closest_name(graph, target),
            });
        }
        for id in matches {
            if !resolved.contains(&id) {
                resolved.push(id);
            }
        }
    }
    Ok(resolved)
}

fn closest_name(graph: &DependencyGraph, target: &str) -> Option<String> {
    graph
        .nodes()
        .filter(|n| !n.is_root())
        .map(|n| (levenshtein(target, &n.name), n.name.clone()))
        .filter(|(distance, _)| *distance <= target.len() * SIMILARITY_THRESHOLD_PERCENT / 100)
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, name)| name)
}

fn scoped_roles(
    graph: &DependencyGraph,
    direction: Direction,
    targets: &[NodeId],
) -> HashMap<NodeId, NodeRole> {
    let mut selected: HashSet<NodeId> = targets.iter().cloned().collect();
    let mut candidates: HashSet<NodeId> = targets.iter().flat_map(|t| graph.descendants(t)).collect();

    match direction {
        Direction::Deploy => selected.extend(candidates),
        Direction::Purge => {
            // A dependency joins the purge set only once every project using it does.
            let order = graph.breadth_first_order();
            loop {
                let admitted: Vec<NodeId> = order
                    .iter()
                    .filter(|id| candidates.contains(*id))
                    .filter(|id| graph.parents(id).iter().all(|p| selected.contains(p)))
                    .cloned()
                    .collect();
                if admitted.is_empty() {
                    break;
                }
                for id in admitted {
                    candidates.remove(&id);
                    selected.insert(id);
                }
            }
            for kept in &candidates {
                tracing::debug!("Keeping '{}': still required outside the purge set", graph.name_of(kept));
            }
        }
    }

    let mut roles: HashMap<NodeId, NodeRole> =
        selected.iter().map(|id| (id.clone(), NodeRole::Selected)).collect();
    for target in targets {
        for ancestor in graph.ancestors(target) {
            roles.entry(ancestor).or_insert(NodeRole::Ancestor);
        }
    }
    roles
}

/// Kahn levels over dependency edges restricted to the plan's nodes.
fn compute_waves(
    graph: &DependencyGraph,
    direction: Direction,
    roles: &HashMap<NodeId, NodeRole>,
) -> Result<Vec<Vec<NodeId>>, KubedepsError> {
    let rank: HashMap<NodeId, usize> =
        graph.breadth_first_order().into_iter().enumerate().map(|(i, id)| (id, i)).collect();

    let mut remaining: HashMap<&NodeId, usize> = roles
        .keys()
        .map(|id| (id, graph.dependencies_of(id).filter(|c| roles.contains_key(*c)).count()))
        .collect();

    let mut waves = Vec::new();
    while !remaining.is_empty() {
        let mut wave: Vec<NodeId> =
            remaining.iter().filter(|(_, pending)| **pending == 0).map(|(id, _)| (*id).clone()).collect();

        if wave.is_empty() {
            // Only reachable if non-tolerated edges form a cycle.
            graph.detect_cycles()?;
            return Err(KubedepsError::CycleDetected {
                path: remaining.keys().map(|id| graph.name_of(id)).collect(),
            });
        }

        wave.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
        for id in &wave {
            remaining.remove(id);
            for parent in graph.parents(id) {
                if let Some(pending) = remaining.get_mut(&parent) {
                    *pending = pending.saturating_sub(1);
                }
            }
        }
        waves.push(wave);
    }

    if direction == Direction::Purge {
        waves.reverse();
    }
    Ok(waves)
}

impl<'g> ExecutionPlan<'g> {
    /// A plan covering only the root project.
    #[must_use]
    pub fn root_only(graph: &'g DependencyGraph, direction: Direction) -> Self {
        let root = graph.root().clone();
        Self {
            graph,
            direction,
            waves: vec![vec![root.clone()]],
            roles: HashMap::from([(root, NodeRole::Selected)]),
            scoped: true,
        }
    }

    #[must_use]
    pub const fn graph(&self) -> &'g DependencyGraph {
        self.graph
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn waves(&self) -> &[Vec<NodeId>] {
        &self.waves
    }

    /// Role of a node, `None` when the node is outside the plan.
    #[must_use]
    pub fn role(&self, id: &NodeId) -> Option<NodeRole> {
        self.roles.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.roles.contains_key(id)
    }

    /// In-plan nodes that must finish before `id` may start.
    #[must_use]
    pub fn prerequisites(&self, id: &NodeId) -> Vec<NodeId> {
        match self.direction {
            Direction::Deploy => {
                self.graph.dependencies_of(id).filter(|c| self.contains(c)).cloned().collect()
            }
            Direction::Purge => self.graph.parents(id).into_iter().filter(|p| self.contains(p)).collect(),
        }
    }

    /// Number of nodes in the plan, pass-through nodes included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Number of nodes that will be executed.
    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.roles.values().filter(|r| **r == NodeRole::Selected).count()
    }

    /// Waves concatenated into one execution order.
    #[must_use]
    pub fn flatten(&self) -> Vec<NodeId> {
        self.waves.iter().flatten().cloned().collect()
    }

    #[must_use]
    pub const fn is_scoped(&self) -> bool {
        self.scoped
    }

    /// Waves as human-readable text.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, wave) in self.waves.iter().enumerate() {
            let names: Vec<String> = wave
                .iter()
                .map(|id| {
                    let name = self.graph.name_of(id);
                    if self.role(id) == Some(NodeRole::Ancestor) {
                        format!("{name} (pass-through)")
                    } else {
                        name
                    }
                })
                .collect();
            let _ = writeln!(out, "Wave {}: {}", i + 1, names.join(", "));
        }
        out
    }
}
