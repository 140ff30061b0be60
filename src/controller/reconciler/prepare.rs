//! # Workspace Preparation
//!
//! Shared clone and dependency-install steps. The deploy state machine
//! drives them one phase at a time; the single-shot workflows (destroy,
//! drift check, Git-sync check) run them back to back.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::constants;
use crate::controller::aws::{self, CredentialsError};
use crate::controller::process::{run_command, CommandSpec};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::workspace;
use crate::crd::CdkTsStack;

/// Outcome of a preparation step. `Failure` carries the operator-facing
/// message for the status subresource; infrastructure problems come back
/// as `ReconcilerError` and are retried by the queue instead. `Cancelled`
/// means controller shutdown interrupted the step: status is left for the
/// next run to resume from.
#[derive(Debug)]
pub enum StepOutcome {
    Success,
    Failure(String),
    Cancelled,
}

/// Baseline environment for git invocations: no interactive prompts and a
/// stable identity.
fn base_git_env() -> Vec<(String, String)> {
    vec![
        ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
        (
            "GIT_AUTHOR_NAME".to_string(),
            constants::CONTROLLER_NAME.to_string(),
        ),
        (
            "GIT_AUTHOR_EMAIL".to_string(),
            format!("{}@{}", constants::CONTROLLER_NAME, constants::API_GROUP),
        ),
        (
            "GIT_COMMITTER_NAME".to_string(),
            constants::CONTROLLER_NAME.to_string(),
        ),
        (
            "GIT_COMMITTER_EMAIL".to_string(),
            format!("{}@{}", constants::CONTROLLER_NAME, constants::API_GROUP),
        ),
    ]
}

/// Path of the SSH key file materialized next to a workspace.
fn ssh_key_path(workspace: &Path) -> PathBuf {
    let mut path = workspace.as_os_str().to_owned();
    path.push(".ssh-key");
    PathBuf::from(path)
}

/// Shallow-clone the configured repository at the configured ref into
/// `workspace`, clearing any prior contents first.
pub async fn clone_repository(
    ctx: &Reconciler,
    stack: &CdkTsStack,
    workspace: &Path,
) -> Result<StepOutcome, ReconcilerError> {
    let git = &stack.spec.source.git;

    // Workspaces are disposable; always start from a fresh clone.
    workspace::remove(workspace).await;
    if let Some(parent) = workspace.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))
            .map_err(ReconcilerError::Process)?;
    }

    let mut env = base_git_env();
    if let Some(ssh_secret) = &git.ssh_secret_name {
        match aws::load_ssh_key(&ctx.client, stack.namespace_or_default(), ssh_secret).await {
            Ok(key) => {
                let key_path = ssh_key_path(workspace);
                if let Err(e) = write_ssh_key(&key_path, &key).await {
                    return Ok(StepOutcome::Failure(format!(
                        "Failed to materialize SSH key from secret {}: {}",
                        ssh_secret, e
                    )));
                }
                env.push((
                    "GIT_SSH_COMMAND".to_string(),
                    format!(
                        "ssh -i {} -o StrictHostKeyChecking=accept-new",
                        key_path.display()
                    ),
                ));
            }
            Err(e @ CredentialsError::SecretNotFound { .. })
            | Err(e @ CredentialsError::MissingKey { .. })
            | Err(e @ CredentialsError::InvalidValue { .. }) => {
                // Configuration error: pinpoint the field instead of retrying.
                return Ok(StepOutcome::Failure(format!(
                    "SSH secret referenced by spec.source.git.sshSecretName is unusable: {}",
                    e
                )));
            }
            Err(CredentialsError::Kube(e)) => {
                return Err(ReconcilerError::Store(e.into()));
            }
        }
    }

    info!(
        "Cloning {} at {} into {}",
        git.repository,
        git.r#ref,
        workspace.display()
    );

    let spec = CommandSpec::new(
        "git",
        vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--branch".to_string(),
            git.r#ref.clone(),
            git.repository.clone(),
            workspace.to_string_lossy().to_string(),
        ],
        "GIT CLONE",
        Duration::from_secs(constants::GIT_CLONE_TIMEOUT_SECS),
    )
    .envs(env);

    let result = run_command(spec, ctx.shutdown.clone())
        .await
        .map_err(ReconcilerError::Process)?;

    if result.success() {
        Ok(StepOutcome::Success)
    } else if result.cancelled() {
        Ok(StepOutcome::Cancelled)
    } else {
        Ok(StepOutcome::Failure(format!(
            "Clone of {} at {} failed: {}",
            git.repository,
            git.r#ref,
            result.tail()
        )))
    }
}

/// Install node dependencies for the project directory inside `workspace`.
///
/// A missing project path is a configuration error; a missing
/// `package.json` just skips the install.
pub async fn install_dependencies(
    ctx: &Reconciler,
    stack: &CdkTsStack,
    workspace: &Path,
) -> Result<StepOutcome, ReconcilerError> {
    let project = workspace::project_dir(workspace, &stack.spec.path);
    if !project.is_dir() {
        return Ok(StepOutcome::Failure(format!(
            "Configured spec.path '{}' does not exist in the repository",
            stack.spec.path
        )));
    }

    if !project.join("package.json").is_file() {
        debug!(
            "No package.json under {}, skipping dependency install",
            project.display()
        );
        return Ok(StepOutcome::Success);
    }

    let mut spec = CommandSpec::new(
        "npm",
        vec![
            "ci".to_string(),
            "--no-audit".to_string(),
            "--no-fund".to_string(),
        ],
        "NPM INSTALL",
        Duration::from_secs(constants::NPM_INSTALL_TIMEOUT_SECS),
    )
    .cwd(&project);
    if let Some(node_options) = &ctx.config.node_options {
        spec = spec.envs([("NODE_OPTIONS".to_string(), node_options.clone())]);
    }

    let result = run_command(spec, ctx.shutdown.clone())
        .await
        .map_err(ReconcilerError::Process)?;

    if result.success() {
        Ok(StepOutcome::Success)
    } else if result.cancelled() {
        Ok(StepOutcome::Cancelled)
    } else {
        Ok(StepOutcome::Failure(format!(
            "Dependency install failed: {}",
            result.tail()
        )))
    }
}

/// Clone plus install in one go, for the single-shot workflows.
pub async fn prepare_workspace(
    ctx: &Reconciler,
    stack: &CdkTsStack,
    workspace: &Path,
) -> Result<StepOutcome, ReconcilerError> {
    match clone_repository(ctx, stack, workspace).await? {
        StepOutcome::Success => {}
        failure => return Ok(failure),
    }
    install_dependencies(ctx, stack, workspace).await
}

/// Remove a workspace and the SSH key file that may sit next to it.
pub async fn cleanup(workspace: &Path) {
    workspace::remove(workspace).await;
    let key_path = ssh_key_path(workspace);
    if key_path.exists() {
        if let Err(e) = tokio::fs::remove_file(&key_path).await {
            warn!("Failed to remove SSH key {}: {}", key_path.display(), e);
        }
    }
}

#[cfg(unix)]
async fn write_ssh_key(path: &Path, key: &str) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    // OpenSSH refuses keys that are group- or world-readable.
    tokio::fs::write(path, format!("{}\n", key)).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await
}

#[cfg(not(unix))]
async fn write_ssh_key(path: &Path, key: &str) -> std::io::Result<()> {
    tokio::fs::write(path, format!("{}\n", key)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_key_path_is_a_sibling_file() {
        let path = ssh_key_path(Path::new("/tmp/cdk-deploy-ns-name"));
        assert_eq!(path, PathBuf::from("/tmp/cdk-deploy-ns-name.ssh-key"));
    }

    #[test]
    fn test_base_git_env_disables_prompts() {
        let env = base_git_env();
        assert!(env
            .iter()
            .any(|(k, v)| k == "GIT_TERMINAL_PROMPT" && v == "0"));
        assert!(env.iter().any(|(k, _)| k == "GIT_AUTHOR_NAME"));
        assert!(env.iter().any(|(k, _)| k == "GIT_COMMITTER_EMAIL"));
    }
}
