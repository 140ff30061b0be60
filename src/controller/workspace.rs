//! # Workspace Management
//!
//! Ephemeral per-operation directories holding a shallow clone and,
//! optionally, installed node dependencies. A workspace is owned
//! exclusively by the operation that created it and destroyed on every
//! exit path. No local state is trusted across restarts: missing
//! workspaces are simply recreated.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::constants;

/// Operation kinds that own workspaces. Used both for naming and for the
/// boot-time stale sweep.
pub const WORKSPACE_KINDS: [&str; 4] = ["deploy", "destroy", "drift", "gitsync"];

/// Workspace for the deploy state machine.
///
/// Deterministic per resource: the clone performed under `Cloning` must be
/// findable by the `Installing` and `Deploying` steps of later events.
pub fn deploy_workspace(namespace: &str, name: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}-deploy-{}-{}",
        constants::WORKSPACE_PREFIX,
        sanitize(namespace),
        sanitize(name)
    ))
}

/// Disposable workspace for a single-shot operation (destroy, drift check,
/// Git-sync check). Unique per invocation.
pub fn scratch_workspace(kind: &str, namespace: &str, name: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}-{}-{}-{}-{:x}",
        constants::WORKSPACE_PREFIX,
        kind,
        sanitize(namespace),
        sanitize(name),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ))
}

/// The CDK project directory inside a workspace, honoring `spec.path`.
pub fn project_dir(workspace: &Path, rel_path: &str) -> PathBuf {
    if rel_path.is_empty() || rel_path == "." {
        workspace.to_path_buf()
    } else {
        workspace.join(rel_path)
    }
}

/// Remove a workspace directory. Failures are logged, never propagated;
/// a leftover directory is reclaimed by the next stale sweep.
pub async fn remove(path: &Path) {
    if !path.exists() {
        return;
    }
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!("Removed workspace {}", path.display()),
        Err(e) => warn!("Failed to remove workspace {}: {}", path.display(), e),
    }
}

/// Boot-time sweep: remove workspace directories left behind by a previous
/// controller run. Only directories matching the controller's own naming
/// scheme are touched.
pub async fn cleanup_stale() {
    let Some(parent) = Path::new(constants::WORKSPACE_PREFIX).parent() else {
        return;
    };
    let Ok(mut entries) = tokio::fs::read_dir(parent).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let is_workspace = WORKSPACE_KINDS
            .iter()
            .any(|kind| name.starts_with(&format!("cdk-{}-", kind)));
        if !is_workspace {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            warn!("Removing stale workspace from previous run: {}", path.display());
            remove(&path).await;
        }
    }
}

fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_workspace_is_deterministic() {
        let a = deploy_workspace("platform", "billing");
        let b = deploy_workspace("platform", "billing");
        assert_eq!(a, b);
        assert_eq!(a, PathBuf::from("/tmp/cdk-deploy-platform-billing"));
    }

    #[test]
    fn test_scratch_workspaces_are_unique() {
        let a = scratch_workspace("drift", "platform", "billing");
        let b = scratch_workspace("drift", "platform", "billing");
        assert_ne!(a, b);
        assert!(a
            .to_string_lossy()
            .starts_with("/tmp/cdk-drift-platform-billing-"));
    }

    #[test]
    fn test_project_dir_dot_is_workspace_root() {
        let ws = PathBuf::from("/tmp/cdk-deploy-ns-name");
        assert_eq!(project_dir(&ws, "."), ws);
        assert_eq!(project_dir(&ws, ""), ws);
        assert_eq!(project_dir(&ws, "infra"), ws.join("infra"));
    }

    #[test]
    fn test_sanitize_replaces_path_separators() {
        assert_eq!(sanitize("a/b.c"), "a-b-c");
        assert_eq!(sanitize("simple-name"), "simple-name");
    }
}
