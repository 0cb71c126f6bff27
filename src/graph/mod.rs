//! The resolved dependency graph of a project.
//!
//! Nodes live in an id-keyed arena; edges are mirrored into a petgraph
//! [`DiGraph`] for reverse lookups. An edge `A -> B` means "A depends on B",
//! so B must be deployed before A.
//!
//! - [`node`]: node identities and payloads
//! - [`builder`]: depth-first discovery from the root project

pub mod builder;
pub mod node;

pub use builder::{BuildOptions, GraphBuilder};
pub use node::{DependencyNode, NodeId};

use petgraph::Direction as EdgeDirection;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

use crate::core::KubedepsError;

/// Kind of a parent-to-child edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Regular dependency edge, constrains ordering.
    Dependency,
    /// A tolerated back edge closing a cycle. Shown in trees, ignored for ordering.
    CycleBreak,
}

/// DFS colors for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A rooted graph of resolved projects.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    root: NodeId,
    nodes: HashMap<NodeId, DependencyNode>,
    /// Discovery order (depth-first, pre-order).
    order: Vec<NodeId>,
    edges: DiGraph<NodeId, EdgeKind>,
    indices: HashMap<NodeId, NodeIndex>,
}

impl DependencyGraph {
    pub(crate) fn new(root: DependencyNode) -> Self {
        let mut graph = Self {
            root: root.id.clone(),
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: DiGraph::new(),
            indices: HashMap::new(),
        };
        graph.insert_node(root);
        graph
    }

    pub(crate) fn insert_node(&mut self, node: DependencyNode) {
        if self.nodes.contains_key(&node.id) {
            return;
        }
        let index = self.edges.add_node(node.id.clone());
        self.indices.insert(node.id.clone(), index);
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Record that `from` depends on `to`. Duplicate edges are ignored.
    pub(crate) fn add_edge(&mut self, from: &NodeId, to: &NodeId, kind: EdgeKind) {
        let (Some(&from_idx), Some(&to_idx)) = (self.indices.get(from), self.indices.get(to)) else {
            return;
        };
        if self.edges.contains_edge(from_idx, to_idx) {
            return;
        }
        self.edges.add_edge(from_idx, to_idx, kind);
        if let Some(node) = self.nodes.get_mut(from) {
            node.children.push(to.clone());
        }
    }

    #[must_use]
    pub fn root(&self) -> &NodeId {
        &self.root
    }

    /// The root project node. Always present.
    #[must_use]
    pub fn root_node(&self) -> &DependencyNode {
        &self.nodes[&self.root]
    }

    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Number of nodes, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Display name of a node, falling back to its id.
    #[must_use]
    pub fn name_of(&self, id: &NodeId) -> String {
        self.nodes.get(id).map_or_else(|| id.to_string(), |n| n.name.clone())
    }

    /// All children of `id` in declaration order, tolerated cycle edges included.
    #[must_use]
    pub fn children(&self, id: &NodeId) -> &[NodeId] {
        self.nodes.get(id).map(|n| n.children.as_slice()).unwrap_or_default()
    }

    /// Children that constrain ordering, in declaration order.
    pub fn dependencies_of<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a NodeId> + 'a {
        self.children(id).iter().filter(move |child| !self.is_cycle_edge(id, child))
    }

    /// Nodes that depend directly on `id`, in discovery order.
    #[must_use]
    pub fn parents(&self, id: &NodeId) -> Vec<NodeId> {
        let Some(&index) = self.indices.get(id) else {
            return Vec::new();
        };
        let parents: HashSet<&NodeId> = self
            .edges
            .edges_directed(index, EdgeDirection::Incoming)
            .filter(|edge| *edge.weight() == EdgeKind::Dependency)
            .map(|edge| &self.edges[edge.source()])
            .collect();
        self.order.iter().filter(|n| parents.contains(n)).cloned().collect()
    }

    /// Whether `from -> to` is a tolerated cycle edge.
    #[must_use]
    pub fn is_cycle_edge(&self, from: &NodeId, to: &NodeId) -> bool {
        let (Some(&a), Some(&b)) = (self.indices.get(from), self.indices.get(to)) else {
            return false;
        };
        self.edges.find_edge(a, b).is_some_and(|e| self.edges[e] == EdgeKind::CycleBreak)
    }

    /// All tolerated cycle edges as `(from, to)` pairs.
    #[must_use]
    pub fn cycle_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.edges
            .edge_references()
            .filter(|edge| *edge.weight() == EdgeKind::CycleBreak)
            .map(|edge| (self.edges[edge.source()].clone(), self.edges[edge.target()].clone()))
            .collect()
    }

    /// Ids of every node declared under `name`, in discovery order.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Vec<NodeId> {
        self.nodes().filter(|n| n.name == name).map(|n| n.id.clone()).collect()
    }

    /// Every node reachable from `id` over dependency edges, excluding `id`.
    #[must_use]
    pub fn descendants(&self, id: &NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&NodeId> = self.dependencies_of(id).collect();
        while let Some(current) = queue.pop_front() {
            if current != id && seen.insert(current.clone()) {
                queue.extend(self.dependencies_of(current));
            }
        }
        seen
    }

    /// Every node that reaches `id` over dependency edges, excluding `id`.
    #[must_use]
    pub fn ancestors(&self, id: &NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.parents(id).into();
        while let Some(current) = queue.pop_front() {
            if &current != id && seen.insert(current.clone()) {
                queue.extend(self.parents(&current));
            }
        }
        seen
    }

    /// Breadth-first order from the root following children in declaration order.
    ///
    /// Used to break ties between nodes that become ready together.
    #[must_use]
    pub fn breadth_first_order(&self) -> Vec<NodeId> {
        let mut seen = HashSet::from([self.root.clone()]);
        let mut order = vec![self.root.clone()];
        let mut queue = VecDeque::from([&self.root]);
        while let Some(current) = queue.pop_front() {
            for child in self.dependencies_of(current) {
                if seen.insert(child.clone()) {
                    order.push(child.clone());
                    queue.push_back(child);
                }
            }
        }
        order
    }

    /// Check the dependency edges for cycles using DFS with colors.
    ///
    /// Tolerated cycle edges are excluded, so a graph built with cycles
    /// allowed always passes.
    pub fn detect_cycles(&self) -> Result<(), KubedepsError> {
        let mut colors: HashMap<&NodeId, Color> =
            self.order.iter().map(|id| (id, Color::White)).collect();
        let mut path: Vec<&NodeId> = Vec::new();

        for id in &self.order {
            if colors.get(id) == Some(&Color::White)
                && let Some(cycle) = self.dfs_visit(id, &mut colors, &mut path)
            {
                return Err(KubedepsError::CycleDetected {
                    path: cycle.iter().map(|id| self.name_of(id)).collect(),
                });
            }
        }
        Ok(())
    }

    fn dfs_visit<'a>(
        &'a self,
        id: &'a NodeId,
        colors: &mut HashMap<&'a NodeId, Color>,
        path: &mut Vec<&'a NodeId>,
    ) -> Option<Vec<&'a NodeId>> {
        colors.insert(id, Color::Gray);
        path.push(id);

        for child in self.dependencies_of(id) {
            match colors.get(child) {
                Some(Color::Gray) => {
                    let start = path.iter().position(|n| *n == child).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(child);
                    return Some(cycle);
                }
                Some(Color::White) => {
                    if let Some(cycle) = self.dfs_visit(child, colors, path) {
                        return Some(cycle);
                    }
                }
                _ => {}
            }
        }

        path.pop();
        colors.insert(id, Color::Black);
        None
    }

    /// Human-readable tree of the graph rooted at the root project.
    ///
    /// Shared nodes are expanded once and marked on later occurrences;
    /// tolerated cycle edges are marked and not followed.
    #[must_use]
    pub fn to_tree_string(&self) -> String {
        let mut result = String::new();
        let root = self.root_node();
        let _ = writeln!(result, "{}", root.name);

        let mut expanded = HashSet::from([self.root.clone()]);
        self.build_tree_string(&self.root, &mut result, "", &mut expanded);
        result
    }

    fn build_tree_string(
        &self,
        id: &NodeId,
        result: &mut String,
        prefix: &str,
        expanded: &mut HashSet<NodeId>,
    ) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };

        for (i, child) in node.children.iter().enumerate() {
            let is_last = i == node.children.len() - 1;
            let connector = if is_last {
                "└── "
            } else {
                "├── "
            };
            let child_prefix = if is_last {
                format!("{prefix}    ")
            } else {
                format!("{prefix}│   ")
            };
            let name = self.name_of(child);
            let profile = self
                .nodes
                .get(child)
                .and_then(DependencyNode::profile)
                .map(|p| format!(" [profile: {p}]"))
                .unwrap_or_default();

            if self.is_cycle_edge(id, child) {
                let _ = writeln!(result, "{prefix}{connector}{name}{profile} (circular reference)");
            } else if !expanded.insert(child.clone()) {
                let _ = writeln!(result, "{prefix}{connector}{name}{profile} (shared)");
            } else {
                let _ = writeln!(result, "{prefix}{connector}{name}{profile}");
                self.build_tree_string(child, result, &child_prefix, expanded);
            }
        }
    }
}
