//! Project and global configuration.
//!
//! - [`project`]: the `kubedeps.yaml` model (dependencies, images, deployments, profiles)
//! - [`loader`]: reading, upgrading, profile application and validation
//! - [`migrate`]: schema upgrades for older files
//! - [`global`]: user-wide defaults in `~/.kubedeps/config.toml`

pub mod global;
pub mod loader;
pub mod migrate;
pub mod project;

pub use global::{GlobalConfig, ToolPaths};
pub use loader::{ConfigLoader, ProjectConfigLoader, project_label};
pub use project::{
    DependencyDeclaration, DependencySource, DeploymentBackend, DeploymentConfig,
    HelmDeployment, ImageConfig, KubectlDeployment, ProfileConfig, ProjectConfig,
};
