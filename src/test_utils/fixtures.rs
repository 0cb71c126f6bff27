//! In-memory fixtures for graph, planner and runner tests.

use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::loader::apply_profile;
use crate::config::{
    ConfigLoader, DependencyDeclaration, DependencySource, DeploymentConfig, KubectlDeployment,
    ProfileConfig, ProjectConfig,
};
use crate::core::KubedepsError;
use crate::graph::{BuildOptions, DependencyGraph, GraphBuilder};
use crate::runner::{NodeContext, NodeExecutor, Operation};
use crate::source::{ResolvedSource, SourceResolver};
use crate::utils::resolve_relative;

/// Fluent builder for a [`ProjectConfig`].
#[derive(Debug, Clone, Default)]
pub struct ProjectBuilder {
    config: ProjectConfig,
}

/// Start a project named `name`.
pub fn project(name: &str) -> ProjectBuilder {
    ProjectBuilder {
        config: ProjectConfig {
            name: Some(name.to_string()),
            ..ProjectConfig::default()
        },
    }
}

impl ProjectBuilder {
    /// Declare a local dependency at `path` (relative to this project).
    #[must_use]
    pub fn depends_on(self, name: &str, path: &str) -> Self {
        self.with_dependency(DependencyDeclaration::local(name, path))
    }

    #[must_use]
    pub fn with_dependency(mut self, declaration: DependencyDeclaration) -> Self {
        self.config.dependencies.push(declaration);
        self
    }

    /// Add an empty profile named `name`.
    #[must_use]
    pub fn profile(mut self, name: &str) -> Self {
        self.config.profiles.push(ProfileConfig {
            name: name.to_string(),
            dependencies: None,
            images: None,
            deployments: None,
        });
        self
    }

    /// Add a kubectl deployment applying `k8s/`.
    #[must_use]
    pub fn deploys(mut self, name: &str) -> Self {
        self.config.deployments.push(DeploymentConfig {
            name: name.to_string(),
            kubectl: Some(KubectlDeployment {
                manifests: vec![PathBuf::from("k8s")],
            }),
            helm: None,
        });
        self
    }

    #[must_use]
    pub fn build(self) -> ProjectConfig {
        self.config
    }
}

impl From<ProjectBuilder> for ProjectConfig {
    fn from(builder: ProjectBuilder) -> Self {
        builder.config
    }
}

/// Projects keyed by absolute directory, acting as both config loader and
/// source resolver. Counts every resolve and load per directory.
#[derive(Debug, Default)]
pub struct VirtualProjects {
    projects: HashMap<PathBuf, ProjectConfig>,
    fingerprints: Mutex<HashMap<PathBuf, String>>,
    resolves: Mutex<HashMap<PathBuf, usize>>,
    loads: Mutex<HashMap<PathBuf, usize>>,
}

impl VirtualProjects {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, dir: &str, config: impl Into<ProjectConfig>) -> Self {
        self.projects.insert(PathBuf::from(dir), config.into());
        self
    }

    /// Change the content fingerprint reported for `dir`.
    pub fn set_fingerprint(&self, dir: &str, fingerprint: &str) {
        self.fingerprints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(PathBuf::from(dir), fingerprint.to_string());
    }

    #[must_use]
    pub fn resolve_count(&self, dir: &str) -> usize {
        count(&self.resolves, Path::new(dir))
    }

    #[must_use]
    pub fn load_count(&self, dir: &str) -> usize {
        count(&self.loads, Path::new(dir))
    }

    /// Build the graph rooted at `root`.
    pub async fn build(&self, root: &str, options: BuildOptions) -> Result<DependencyGraph, KubedepsError> {
        let config = self.projects.get(Path::new(root)).cloned().unwrap_or_default();
        GraphBuilder::new(self, self).build(Path::new(root), config, options).await
    }

    fn resolve_now(&self, source: &DependencySource, base_dir: &Path) -> Result<ResolvedSource> {
        let DependencySource::Path {
            path,
        } = source
        else {
            bail!("virtual projects only support local paths");
        };
        let dir = resolve_relative(base_dir, path)?;
        if !self.projects.contains_key(&dir) {
            bail!("directory {} does not exist", dir.display());
        }
        *self.resolves.lock().unwrap_or_else(PoisonError::into_inner).entry(dir.clone()).or_default() += 1;

        let fingerprint = self
            .fingerprints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&dir)
            .cloned()
            .unwrap_or_else(|| format!("sha256:{}", dir.display()));
        Ok(ResolvedSource {
            path: dir,
            fingerprint,
        })
    }
}

fn count(counter: &Mutex<HashMap<PathBuf, usize>>, dir: &Path) -> usize {
    counter.lock().unwrap_or_else(PoisonError::into_inner).get(dir).copied().unwrap_or_default()
}

impl ConfigLoader for VirtualProjects {
    fn load(&self, dir: &Path, profile: Option<&str>) -> Result<ProjectConfig> {
        let Some(config) = self.projects.get(dir) else {
            return Err(KubedepsError::ConfigNotFound {
                path: dir.display().to_string(),
            }
            .into());
        };
        *self.loads.lock().unwrap_or_else(PoisonError::into_inner).entry(dir.to_path_buf()).or_default() += 1;
        Ok(apply_profile(config.clone(), profile, dir)?)
    }
}

impl SourceResolver for VirtualProjects {
    fn resolve(
        &self,
        source: &DependencySource,
        base_dir: &Path,
    ) -> impl Future<Output = Result<ResolvedSource>> + Send {
        std::future::ready(self.resolve_now(source, base_dir))
    }
}

/// One executor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub name: String,
    pub operation: Operation,
    pub skip_build: bool,
}

/// Executor that records calls instead of touching a cluster.
///
/// Each call writes a few output lines (yielding between them so concurrent
/// nodes interleave), optionally sleeps, and fails for configured names.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    failures: HashSet<String>,
    delays: HashMap<String, Duration>,
    lines_per_call: usize,
    calls: Mutex<Vec<Call>>,
    events: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl RecordingExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            lines_per_call: 3,
            ..Self::default()
        }
    }

    /// Fail every operation on nodes named `name`.
    #[must_use]
    pub fn failing(mut self, name: &str) -> Self {
        self.failures.insert(name.to_string());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Names in the order their operations started.
    #[must_use]
    pub fn started(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.name).collect()
    }

    #[must_use]
    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.name == name).count()
    }

    /// `start:<name>` / `end:<name>` events in the order they happened.
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Index of `event` in [`Self::events`].
    #[must_use]
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }

    /// Highest number of operations that were in flight at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn event(&self, event: String) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }

    async fn record(&self, ctx: &NodeContext<'_>) -> Result<()> {
        let name = ctx.node.name.clone();
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).push(Call {
            name: name.clone(),
            operation: ctx.operation,
            skip_build: ctx.skip_build,
        });
        self.event(format!("start:{name}"));

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        for i in 0..self.lines_per_call {
            ctx.output.line(format!("{name} {} step {i}", ctx.operation));
            tokio::task::yield_now().await;
        }
        if let Some(delay) = self.delays.get(&name) {
            tokio::time::sleep(*delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.event(format!("end:{name}"));

        if self.failures.contains(&name) {
            bail!("{name} exploded");
        }
        Ok(())
    }
}

impl NodeExecutor for RecordingExecutor {
    fn deploy(&self, ctx: &NodeContext<'_>) -> impl Future<Output = Result<()>> + Send {
        self.record(ctx)
    }

    fn purge(&self, ctx: &NodeContext<'_>) -> impl Future<Output = Result<()>> + Send {
        self.record(ctx)
    }
}

/// Cloneable in-memory writer for capturing node output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
