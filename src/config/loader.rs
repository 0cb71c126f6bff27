//! Loading, upgrading and validating project configurations.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use super::migrate;
use super::project::{DependencyDeclaration, ProjectConfig};
use crate::constants::PROJECT_CONFIG_FILE;
use crate::core::KubedepsError;

static DEPENDENCY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").expect("dependency name pattern is valid")
});

/// Loads the configuration of a project directory.
///
/// The graph builder only needs the declared dependencies of the returned
/// config; everything else is carried through to the executor untouched.
pub trait ConfigLoader {
    /// Load the project in `dir`, applying `profile` when given.
    fn load(&self, dir: &Path, profile: Option<&str>) -> Result<ProjectConfig>;
}

/// Reads `kubedeps.yaml` from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectConfigLoader;

impl ProjectConfigLoader {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ConfigLoader for ProjectConfigLoader {
    fn load(&self, dir: &Path, profile: Option<&str>) -> Result<ProjectConfig> {
        let file = dir.join(PROJECT_CONFIG_FILE);
        if !file.is_file() {
            return Err(KubedepsError::ConfigNotFound {
                path: file.display().to_string(),
            }
            .into());
        }

        let content = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let config = parse_config(&content, &file.display().to_string())?;
        let config = apply_profile(config, profile, dir)?;
        validate(&config, dir)?;

        tracing::debug!(
            "Loaded {} ({} dependencies, {} deployments)",
            file.display(),
            config.dependencies.len(),
            config.deployments.len()
        );
        Ok(config)
    }
}

/// Parse and upgrade a configuration document.
pub fn parse_config(content: &str, file: &str) -> Result<ProjectConfig, KubedepsError> {
    let parse_error = |e: serde_yaml::Error| KubedepsError::ConfigParse {
        file: file.to_string(),
        reason: e.to_string(),
    };

    let mut document: serde_yaml::Value = serde_yaml::from_str(content).map_err(parse_error)?;
    if document.is_null() {
        return Ok(ProjectConfig::default());
    }
    migrate::upgrade(&mut document)?;
    serde_yaml::from_value(document).map_err(parse_error)
}

/// Replace the base lists with the selected profile's lists.
pub fn apply_profile(
    mut config: ProjectConfig,
    profile: Option<&str>,
    dir: &Path,
) -> Result<ProjectConfig, KubedepsError> {
    let Some(name) = profile else {
        return Ok(config);
    };

    let selected = config.profile(name).cloned().ok_or_else(|| KubedepsError::ProfileNotFound {
        profile: name.to_string(),
        project: project_label(&config, dir),
    })?;

    if let Some(dependencies) = selected.dependencies {
        config.dependencies = dependencies;
    }
    if let Some(images) = selected.images {
        config.images = images;
    }
    if let Some(deployments) = selected.deployments {
        config.deployments = deployments;
    }
    Ok(config)
}

/// Check declaration names and deployment backends.
pub fn validate(config: &ProjectConfig, dir: &Path) -> Result<(), KubedepsError> {
    let mut seen = HashSet::new();
    for dependency in &config.dependencies {
        validate_declaration(dependency)?;
        if !seen.insert(dependency.name.as_str()) {
            return Err(KubedepsError::DuplicateDependency {
                project: project_label(config, dir),
                name: dependency.name.clone(),
            });
        }
    }

    for deployment in &config.deployments {
        if deployment.backend().is_none() {
            return Err(KubedepsError::ConfigParse {
                file: dir.join(PROJECT_CONFIG_FILE).display().to_string(),
                reason: format!(
                    "deployment '{}' must configure exactly one of 'kubectl' or 'helm'",
                    deployment.name
                ),
            });
        }
    }
    Ok(())
}

fn validate_declaration(dependency: &DependencyDeclaration) -> Result<(), KubedepsError> {
    if !DEPENDENCY_NAME.is_match(&dependency.name) {
        return Err(KubedepsError::InvalidDependency {
            name: dependency.name.clone(),
            reason: "names may only contain letters, digits, '.', '_' and '-'".to_string(),
        });
    }
    Ok(())
}

/// Display label for a project: its declared name, else its directory.
#[must_use]
pub fn project_label(config: &ProjectConfig, dir: &Path) -> String {
    config.name.clone().unwrap_or_else(|| {
        dir.file_name().map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned())
    })
}
