//! Helm release deployments.

use std::path::Path;

use super::ClusterTarget;
use super::process::ToolCommand;
use crate::config::HelmDeployment;

/// Release name, defaulting to the deployment name.
pub fn release_name<'a>(deployment_name: &'a str, helm: &'a HelmDeployment) -> &'a str {
    helm.release.as_deref().unwrap_or(deployment_name)
}

/// `helm upgrade --install`, waiting for the release to become ready.
///
/// A chart that exists as a directory inside the project is passed by
/// absolute path; anything else is treated as a repository reference.
pub fn install_command(
    program: &str,
    target: &ClusterTarget,
    project_dir: &Path,
    deployment_name: &str,
    helm: &HelmDeployment,
) -> ToolCommand {
    let local_chart = project_dir.join(&helm.chart);
    let chart = if local_chart.is_dir() {
        local_chart.display().to_string()
    } else {
        helm.chart.clone()
    };

    let mut cmd = ToolCommand::new(program, project_dir)
        .args(["upgrade", "--install", "--wait"])
        .arg(release_name(deployment_name, helm))
        .arg(chart);
    if let Some(version) = &helm.version {
        cmd = cmd.args(["--version", version.as_str()]);
    }
    for values in &helm.values {
        cmd = cmd.arg("--values").arg(project_dir.join(values).display().to_string());
    }
    cmd.args(target_args(target))
}

/// `helm uninstall` for the release.
pub fn uninstall_command(
    program: &str,
    target: &ClusterTarget,
    project_dir: &Path,
    deployment_name: &str,
    helm: &HelmDeployment,
) -> ToolCommand {
    ToolCommand::new(program, project_dir)
        .arg("uninstall")
        .arg(release_name(deployment_name, helm))
        .args(target_args(target))
}

fn target_args(target: &ClusterTarget) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(namespace) = &target.namespace {
        args.extend(["--namespace".to_string(), namespace.clone()]);
    }
    if let Some(context) = &target.kube_context {
        args.extend(["--kube-context".to_string(), context.clone()]);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn redis() -> HelmDeployment {
        HelmDeployment {
            chart: "bitnami/redis".into(),
            release: None,
            version: Some("18.1.0".into()),
            values: vec![PathBuf::from("redis-values.yaml")],
        }
    }

    #[test]
    fn test_install_remote_chart() {
        let target = ClusterTarget {
            namespace: Some("dev".into()),
            kube_context: None,
        };
        let cmd = install_command("helm", &target, Path::new("/w/cache"), "cache", &redis());
        assert_eq!(
            cmd.display(),
            "helm upgrade --install --wait cache bitnami/redis --version 18.1.0 \
             --values /w/cache/redis-values.yaml --namespace dev"
        );
    }

    #[test]
    fn test_install_local_chart_uses_absolute_path() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("chart")).unwrap();
        let helm = HelmDeployment {
            chart: "chart".into(),
            release: Some("api-release".into()),
            version: None,
            values: Vec::new(),
        };

        let cmd = install_command("helm", &ClusterTarget::default(), temp.path(), "api", &helm);
        assert_eq!(cmd.args[3], "api-release");
        assert_eq!(cmd.args[4], temp.path().join("chart").display().to_string());
    }

    #[test]
    fn test_uninstall() {
        let target = ClusterTarget {
            namespace: None,
            kube_context: Some("kind".into()),
        };
        let cmd = uninstall_command("helm", &target, Path::new("/w/cache"), "cache", &redis());
        assert_eq!(cmd.display(), "helm uninstall cache --kube-context kind");
    }
}
