//! kubedeps - dependency orchestration for Kubernetes development projects
//!
//! A project declares, in `kubedeps.yaml`, the other projects it needs
//! running in the cluster before it can be deployed. kubedeps resolves that
//! declaration recursively into a dependency graph, turns the graph into
//! ordered waves of independent projects, and deploys (or purges) them wave
//! by wave, running the projects of a wave in parallel.
//!
//! # Architecture Overview
//!
//! ```text
//! kubedeps.yaml ──► GraphBuilder ──► DependencyGraph ──► plan() ──► ExecutionPlan
//!                        │                                              │
//!                 SourceResolver                                DependencyRunner ──► NodeExecutor
//!                 (path / git)                                         │            (kubectl, helm)
//!                                                                 StateCache
//! ```
//!
//! - Shared dependencies are resolved, fetched and deployed once.
//! - Cycles are rejected with the full path, or tolerated on request.
//! - A failed project skips everything that depends on it; unrelated
//!   projects keep going.
//! - Unchanged projects are redeployed without rebuilding their images.
//!
//! # Core Modules
//!
//! - [`config`] - Project (`kubedeps.yaml`) and global (`~/.kubedeps/config.toml`) configuration
//! - [`graph`] - Dependency graph and its builder
//! - [`planner`] - Wave planning for deploy and purge, target scoping
//! - [`runner`] - Wave execution, failure isolation, output handling
//! - [`state`] - Persisted per-project fingerprints of the last run
//! - [`source`] - Resolution of local and git dependency sources
//! - [`git`] - Git operations using the system git command
//! - [`deploy`] - Cluster executor driving docker, kubectl and helm
//! - [`cli`] - Command-line interface
//! - [`core`] - Error types and user-facing error formatting
//! - [`utils`] - File system helpers, locking, progress indicators
//!
//! # Project Config Example
//!
//! ```yaml
//! name: frontend
//! dependencies:
//!   - name: backend
//!     source: { path: ../backend }
//!   - name: database
//!     source: { git: https://example.com/db.git, revision: v1.2.0 }
//! deployments:
//!   - name: web
//!     kubectl: { manifests: [k8s/] }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;

pub mod git;
pub mod source;

pub mod graph;
pub mod planner;
pub mod runner;
pub mod state;

pub mod deploy;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
