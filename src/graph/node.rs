//! Resolved dependency nodes and their stable identities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

use crate::config::{DependencyDeclaration, ProjectConfig};
use crate::constants::NODE_ID_LEN;

/// Stable identity of a resolved dependency.
///
/// Derived from the normalized source and the profile, so the same project
/// referenced twice with the same profile collapses into one node, while the
/// same project loaded under two profiles yields two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Hash an identity key and optional profile into an id.
    #[must_use]
    pub fn derive(identity_key: &str, profile: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(identity_key.as_bytes());
        hasher.update([0u8]);
        hasher.update(profile.unwrap_or_default().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..NODE_ID_LEN].to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One resolved project in the dependency graph.
///
/// Constructed only by the graph builder; read-only afterwards.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    pub id: NodeId,
    /// Declared name, or the project label for the root.
    pub name: String,
    /// `None` for the root project.
    pub declaration: Option<DependencyDeclaration>,
    /// Local checkout the project was loaded from.
    pub resolved_path: PathBuf,
    /// Fully loaded configuration of this project.
    pub config: ProjectConfig,
    /// Child ids in declaration order, including tolerated cycle edges.
    pub children: Vec<NodeId>,
    /// Content hash of the resolved source tree.
    pub fingerprint: String,
}

impl DependencyNode {
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.declaration.is_none()
    }

    /// Whether the declaration asks to deploy without rebuilding images.
    #[must_use]
    pub fn skip_build(&self) -> bool {
        self.declaration.as_ref().is_some_and(|d| d.skip_build)
    }

    #[must_use]
    pub fn profile(&self) -> Option<&str> {
        self.declaration.as_ref().and_then(|d| d.profile.as_deref())
    }
}
