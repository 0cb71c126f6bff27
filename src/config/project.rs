//! Project configuration model (`kubedeps.yaml`).
//!
//! The orchestration core treats a loaded [`ProjectConfig`] as opaque except
//! for its declared [`DependencyDeclaration`]s. Deployments and images are
//! consumed only by the cluster executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A fully loaded project configuration, after migration and profile application.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Schema version. `None` means the current version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Project name, used for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Other projects that must be deployed before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<DependencyDeclaration>,

    /// Container images built before deploying.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageConfig>,

    /// Cluster deployments owned by this project, in apply order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<DeploymentConfig>,

    /// Named configuration variants.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<ProfileConfig>,
}

impl ProjectConfig {
    /// Dependencies that participate in the graph (disabled ones filtered out).
    pub fn enabled_dependencies(&self) -> impl Iterator<Item = &DependencyDeclaration> {
        self.dependencies.iter().filter(|d| !d.disabled)
    }

    /// Look up a profile by name.
    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

/// A dependency as authored in a project's configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDeclaration {
    /// Unique within the declaring project.
    pub name: String,

    /// Where the dependency project lives.
    pub source: DependencySource,

    /// Profile applied when loading the dependency's configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    /// Excluded from the graph entirely when set.
    #[serde(default)]
    pub disabled: bool,

    /// Deploy without rebuilding images.
    #[serde(default)]
    pub skip_build: bool,
}

impl DependencyDeclaration {
    /// Declaration pointing at a local directory.
    pub fn local(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: DependencySource::Path {
                path: path.into(),
            },
            profile: None,
            disabled: false,
            skip_build: false,
        }
    }

    /// Declaration pointing at a git repository.
    pub fn git(name: impl Into<String>, url: impl Into<String>, revision: Option<&str>) -> Self {
        Self {
            name: name.into(),
            source: DependencySource::Git {
                url: url.into(),
                revision: revision.map(str::to_string),
                sub_path: None,
            },
            profile: None,
            disabled: false,
            skip_build: false,
        }
    }

    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub const fn with_skip_build(mut self, skip_build: bool) -> Self {
        self.skip_build = skip_build;
        self
    }

    #[must_use]
    pub const fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

/// Location of a dependency project.
///
/// Serialized as a mapping with exactly one of `path` or `git`:
///
/// ```yaml
/// source: { path: ../backend }
/// source: { git: https://example.com/db.git, revision: v1.2.0, subPath: deploy }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSource", into = "RawSource")]
pub enum DependencySource {
    /// Local directory, relative paths resolved against the declaring project.
    Path {
        path: PathBuf,
    },
    /// Remote repository checked out at `revision` (remote HEAD when absent).
    Git {
        url: String,
        revision: Option<String>,
        sub_path: Option<PathBuf>,
    },
}

impl fmt::Display for DependencySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path {
                path,
            } => write!(f, "path {}", path.display()),
            Self::Git {
                url,
                revision,
                sub_path,
            } => {
                write!(f, "git {url}")?;
                if let Some(rev) = revision {
                    write!(f, "@{rev}")?;
                }
                if let Some(sub) = sub_path {
                    write!(f, " ({})", sub.display())?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    git: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub_path: Option<PathBuf>,
}

impl TryFrom<RawSource> for DependencySource {
    type Error = String;

    fn try_from(raw: RawSource) -> Result<Self, Self::Error> {
        match (raw.path, raw.git) {
            (Some(path), None) => {
                if raw.revision.is_some() || raw.sub_path.is_some() {
                    return Err("'revision' and 'subPath' are only valid for git sources".into());
                }
                Ok(Self::Path {
                    path,
                })
            }
            (None, Some(url)) => Ok(Self::Git {
                url,
                revision: raw.revision,
                sub_path: raw.sub_path,
            }),
            (Some(_), Some(_)) => Err("a source declares both 'path' and 'git'".into()),
            (None, None) => Err("a source must declare either 'path' or 'git'".into()),
        }
    }
}

impl From<DependencySource> for RawSource {
    fn from(source: DependencySource) -> Self {
        match source {
            DependencySource::Path {
                path,
            } => Self {
                path: Some(path),
                ..Self::default()
            },
            DependencySource::Git {
                url,
                revision,
                sub_path,
            } => Self {
                path: None,
                git: Some(url),
                revision,
                sub_path,
            },
        }
    }
}

/// An image built before the project's deployments are applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageConfig {
    /// Image reference, e.g. `registry.local/api:dev`.
    pub image: String,
    /// Build context relative to the project directory.
    #[serde(default = "default_context")]
    pub context: PathBuf,
    /// Dockerfile relative to the project directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<PathBuf>,
}

fn default_context() -> PathBuf {
    PathBuf::from(".")
}

/// One deployment owned by a project. Exactly one backend must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubectl: Option<KubectlDeployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm: Option<HelmDeployment>,
}

/// Backend view of a [`DeploymentConfig`].
#[derive(Debug, Clone, Copy)]
pub enum DeploymentBackend<'a> {
    Kubectl(&'a KubectlDeployment),
    Helm(&'a HelmDeployment),
}

impl DeploymentConfig {
    /// The single configured backend, or `None` when zero or both are set.
    #[must_use]
    pub fn backend(&self) -> Option<DeploymentBackend<'_>> {
        match (&self.kubectl, &self.helm) {
            (Some(k), None) => Some(DeploymentBackend::Kubectl(k)),
            (None, Some(h)) => Some(DeploymentBackend::Helm(h)),
            _ => None,
        }
    }
}

/// Plain manifests applied with `kubectl`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubectlDeployment {
    /// Files or directories, relative to the project directory.
    pub manifests: Vec<PathBuf>,
}

/// A Helm release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelmDeployment {
    /// Chart reference or local chart path.
    pub chart: String,
    /// Release name; defaults to the deployment name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    /// Chart version constraint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Values files relative to the project directory.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<PathBuf>,
}

/// A named variant replacing parts of the base configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<DependencyDeclaration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageConfig>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<Vec<DeploymentConfig>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
version: v1
name: frontend
dependencies:
  - name: backend
    source:
      path: ../backend
    profile: staging
    skipBuild: true
  - name: database
    source:
      git: https://example.com/db.git
      revision: v1.2.0
      subPath: deploy
    disabled: true
deployments:
  - name: api
    kubectl:
      manifests: [k8s/]
  - name: cache
    helm:
      chart: bitnami/redis
      values: [redis-values.yaml]
"#;
        let config: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.name.as_deref(), Some("frontend"));
        assert_eq!(config.dependencies.len(), 2);

        let backend = &config.dependencies[0];
        assert!(backend.skip_build);
        assert_eq!(backend.profile.as_deref(), Some("staging"));
        assert_eq!(
            backend.source,
            DependencySource::Path {
                path: PathBuf::from("../backend")
            }
        );

        let database = &config.dependencies[1];
        assert!(database.disabled);
        assert_eq!(
            database.source,
            DependencySource::Git {
                url: "https://example.com/db.git".into(),
                revision: Some("v1.2.0".into()),
                sub_path: Some(PathBuf::from("deploy")),
            }
        );

        assert_eq!(config.enabled_dependencies().count(), 1);
        assert!(matches!(config.deployments[0].backend(), Some(DeploymentBackend::Kubectl(_))));
        assert!(matches!(config.deployments[1].backend(), Some(DeploymentBackend::Helm(_))));
    }

    #[test]
    fn test_source_requires_exactly_one_kind() {
        let both = "name: x\nsource: { path: a, git: https://e.com/r.git }\n";
        let err = serde_yaml::from_str::<DependencyDeclaration>(both).unwrap_err();
        assert!(err.to_string().contains("both"));

        let neither = "name: x\nsource: { revision: main }\n";
        assert!(serde_yaml::from_str::<DependencyDeclaration>(neither).is_err());
    }

    #[test]
    fn test_deployment_without_backend() {
        let deployment = DeploymentConfig {
            name: "empty".into(),
            kubectl: None,
            helm: None,
        };
        assert!(deployment.backend().is_none());
    }
}
