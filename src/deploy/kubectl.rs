//! Plain manifest deployments through `kubectl`.

use std::path::Path;

use super::ClusterTarget;
use super::process::ToolCommand;
use crate::config::KubectlDeployment;

/// `kubectl apply` for every manifest, in declaration order.
pub fn apply_commands(
    program: &str,
    target: &ClusterTarget,
    project_dir: &Path,
    deployment: &KubectlDeployment,
) -> Vec<ToolCommand> {
    deployment
        .manifests
        .iter()
        .map(|manifest| {
            ToolCommand::new(program, project_dir)
                .args(global_args(target))
                .args(["apply", "-f"])
                .arg(project_dir.join(manifest).display().to_string())
        })
        .collect()
}

/// `kubectl delete` for every manifest, in reverse declaration order.
///
/// Resources that are already gone are not an error.
pub fn delete_commands(
    program: &str,
    target: &ClusterTarget,
    project_dir: &Path,
    deployment: &KubectlDeployment,
) -> Vec<ToolCommand> {
    deployment
        .manifests
        .iter()
        .rev()
        .map(|manifest| {
            ToolCommand::new(program, project_dir)
                .args(global_args(target))
                .args(["delete", "--ignore-not-found", "-f"])
                .arg(project_dir.join(manifest).display().to_string())
        })
        .collect()
}

fn global_args(target: &ClusterTarget) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(context) = &target.kube_context {
        args.extend(["--context".to_string(), context.clone()]);
    }
    if let Some(namespace) = &target.namespace {
        args.extend(["--namespace".to_string(), namespace.clone()]);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn deployment() -> KubectlDeployment {
        KubectlDeployment {
            manifests: vec![PathBuf::from("k8s/base"), PathBuf::from("k8s/overlay.yaml")],
        }
    }

    #[test]
    fn test_apply_in_order_with_target() {
        let target = ClusterTarget {
            namespace: Some("dev".into()),
            kube_context: Some("kind".into()),
        };
        let cmds = apply_commands("kubectl", &target, Path::new("/w/api"), &deployment());
        assert_eq!(cmds.len(), 2);
        assert_eq!(
            cmds[0].display(),
            "kubectl --context kind --namespace dev apply -f /w/api/k8s/base"
        );
        assert_eq!(cmds[1].cwd, PathBuf::from("/w/api"));
    }

    #[test]
    fn test_delete_in_reverse() {
        let cmds = delete_commands("kubectl", &ClusterTarget::default(), Path::new("/w/api"), &deployment());
        assert_eq!(cmds[0].display(), "kubectl delete --ignore-not-found -f /w/api/k8s/overlay.yaml");
        assert_eq!(cmds[1].display(), "kubectl delete --ignore-not-found -f /w/api/k8s/base");
    }
}
