//! In-memory schema upgrades for older configuration files.
//!
//! `v1beta1` configurations pinned git sources with separate `branch`, `tag`
//! and `commit` keys. `v1` collapses them into a single `revision`, preferring
//! the most specific one (commit, then tag, then branch).

use serde_yaml::{Mapping, Value};

use crate::constants::{CURRENT_CONFIG_VERSION, LEGACY_CONFIG_VERSION};
use crate::core::KubedepsError;

const LEGACY_REVISION_KEYS: [&str; 3] = ["commit", "tag", "branch"];

/// Upgrade a raw configuration document to the current schema version.
///
/// Returns `true` when the document was rewritten.
pub fn upgrade(document: &mut Value) -> Result<bool, KubedepsError> {
    let version = document.get("version").and_then(Value::as_str).map(str::to_string);

    match version.as_deref() {
        None | Some(CURRENT_CONFIG_VERSION) => Ok(false),
        Some(LEGACY_CONFIG_VERSION) => {
            upgrade_dependency_list(document.get_mut("dependencies"));
            if let Some(Value::Sequence(profiles)) = document.get_mut("profiles") {
                for profile in profiles {
                    upgrade_dependency_list(profile.get_mut("dependencies"));
                }
            }
            if let Value::Mapping(root) = document {
                root.insert(
                    Value::String("version".into()),
                    Value::String(CURRENT_CONFIG_VERSION.into()),
                );
            }
            tracing::debug!("Upgraded configuration from {LEGACY_CONFIG_VERSION} to {CURRENT_CONFIG_VERSION}");
            Ok(true)
        }
        Some(other) => Err(KubedepsError::UnsupportedConfigVersion {
            version: other.to_string(),
        }),
    }
}

fn upgrade_dependency_list(list: Option<&mut Value>) {
    let Some(Value::Sequence(dependencies)) = list else {
        return;
    };

    for dependency in dependencies {
        if let Some(Value::Mapping(source)) = dependency.get_mut("source") {
            upgrade_source(source);
        }
    }
}

fn upgrade_source(source: &mut Mapping) {
    if !source.contains_key("git") {
        return;
    }

    let mut revision = None;
    for key in LEGACY_REVISION_KEYS {
        if let Some(value) = source.remove(key)
            && revision.is_none()
        {
            revision = Some(value);
        }
    }

    if let Some(revision) = revision
        && !source.contains_key("revision")
    {
        source.insert(Value::String("revision".into()), revision);
    }
}
