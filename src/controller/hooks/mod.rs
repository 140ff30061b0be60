//! # Lifecycle Hook Executor
//!
//! Runs user-supplied script snippets at eight named stages with a
//! documented environment contract.
//!
//! Hooks are user-owned and must not be able to wedge the controller: a
//! non-zero hook exit is logged and eventized as a `LifecycleHookFailure`
//! warning, and the surrounding operation proceeds.

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::constants;
use crate::controller::process::{run_command, CommandSpec};
use crate::controller::store::{ResourceStore, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING};
use crate::crd::CdkTsStack;

/// The eight lifecycle stages a user can hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookName {
    BeforeDeploy,
    AfterDeploy,
    BeforeDestroy,
    AfterDestroy,
    BeforeDriftDetection,
    AfterDriftDetection,
    BeforeGitSync,
    AfterGitSync,
}

impl HookName {
    /// Hook name as it appears in the spec and in `CDK_OPERATION`.
    pub fn as_str(&self) -> &'static str {
        match self {
            HookName::BeforeDeploy => "beforeDeploy",
            HookName::AfterDeploy => "afterDeploy",
            HookName::BeforeDestroy => "beforeDestroy",
            HookName::AfterDestroy => "afterDestroy",
            HookName::BeforeDriftDetection => "beforeDriftDetection",
            HookName::AfterDriftDetection => "afterDriftDetection",
            HookName::BeforeGitSync => "beforeGitSync",
            HookName::AfterGitSync => "afterGitSync",
        }
    }

    /// The script body configured for this stage, if any.
    pub fn script<'a>(&self, stack: &'a CdkTsStack) -> Option<&'a str> {
        let hooks = &stack.spec.lifecycle_hooks;
        match self {
            HookName::BeforeDeploy => hooks.before_deploy.as_deref(),
            HookName::AfterDeploy => hooks.after_deploy.as_deref(),
            HookName::BeforeDestroy => hooks.before_destroy.as_deref(),
            HookName::AfterDestroy => hooks.after_destroy.as_deref(),
            HookName::BeforeDriftDetection => hooks.before_drift_detection.as_deref(),
            HookName::AfterDriftDetection => hooks.after_drift_detection.as_deref(),
            HookName::BeforeGitSync => hooks.before_git_sync.as_deref(),
            HookName::AfterGitSync => hooks.after_git_sync.as_deref(),
        }
    }
}

impl std::fmt::Display for HookName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The always-exported part of the hook environment contract.
///
/// AWS credential variables and stage-specific extras (`DRIFT_DETECTED`,
/// `GIT_CHANGES_DETECTED`) are appended by the caller.
pub fn hook_env(stack: &CdkTsStack, region: &str, hook: HookName) -> Vec<(String, String)> {
    vec![
        ("CDK_STACK_NAME".to_string(), stack.spec.stack_name.clone()),
        (
            "CDK_STACK_NAMESPACE".to_string(),
            stack.namespace_or_default().to_string(),
        ),
        (
            "CDK_STACK_RESOURCE_NAME".to_string(),
            stack.name_or_unknown().to_string(),
        ),
        ("CDK_STACK_REGION".to_string(), region.to_string()),
        ("CDK_OPERATION".to_string(), hook.as_str().to_string()),
        ("CDK_PROJECT_PATH".to_string(), stack.spec.path.clone()),
        (
            "CDK_GIT_REPOSITORY".to_string(),
            stack.spec.source.git.repository.clone(),
        ),
        (
            "CDK_GIT_REF".to_string(),
            stack.spec.source.git.r#ref.clone(),
        ),
    ]
}

/// Run one lifecycle hook if the resource configures it.
///
/// `env` is the full environment overlay: the contract from [`hook_env`],
/// the AWS credential variables, and any stage-specific extras. Never
/// fails; all failure modes are reported through logs and events.
pub async fn run_hook(
    store: &ResourceStore,
    stack: &CdkTsStack,
    hook: HookName,
    env: Vec<(String, String)>,
    shutdown: watch::Receiver<bool>,
) {
    let Some(body) = hook.script(stack) else {
        debug!("No {} hook configured for {}", hook, stack.name_or_unknown());
        return;
    };

    info!(
        "Running {} hook for {}/{}",
        hook,
        stack.namespace_or_default(),
        stack.name_or_unknown()
    );
    store
        .emit_event(
            stack,
            EVENT_TYPE_NORMAL,
            "LifecycleHookStart",
            &format!("Running {} hook", hook),
        )
        .await;

    match execute_script(hook, body, env, shutdown).await {
        Ok(result) if result.success() => {
            store
                .emit_event(
                    stack,
                    EVENT_TYPE_NORMAL,
                    "LifecycleHookSuccess",
                    &format!("{} hook completed", hook),
                )
                .await;
        }
        Ok(result) => {
            warn!(
                "{} hook for {}/{} exited with code {} (non-fatal)",
                hook,
                stack.namespace_or_default(),
                stack.name_or_unknown(),
                result.exit_code
            );
            store
                .emit_event(
                    stack,
                    EVENT_TYPE_WARNING,
                    "LifecycleHookFailure",
                    &format!(
                        "{} hook exited with code {}: {}",
                        hook,
                        result.exit_code,
                        result.tail()
                    ),
                )
                .await;
        }
        Err(e) => {
            warn!("{} hook could not be executed: {}", hook, e);
            store
                .emit_event(
                    stack,
                    EVENT_TYPE_WARNING,
                    "LifecycleHookFailure",
                    &format!("{} hook could not be executed: {}", hook, e),
                )
                .await;
        }
    }
}

/// Execute a hook script body under a strict shell.
///
/// Synthesizes a temporary script file and runs it with `bash` under
/// `errexit`, `nounset`, and `pipefail`. Exit-code interpretation and the
/// non-fatal failure policy live in [`run_hook`].
pub async fn execute_script(
    hook: HookName,
    body: &str,
    env: Vec<(String, String)>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<crate::controller::process::CommandOutput> {
    // The script file must outlive the child process; keep the handle.
    let script = write_script(body)?;
    let spec = CommandSpec::new(
        "bash",
        vec![script.path().to_string_lossy().to_string()],
        format!("{} HOOK", hook.as_str().to_uppercase()),
        Duration::from_secs(constants::HOOK_TIMEOUT_SECS),
    )
    .envs(env);
    run_command(spec, shutdown).await
}

/// Synthesize the temporary script file: strict shell options, then the
/// user's body verbatim.
fn write_script(body: &str) -> std::io::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("cdk-hook-")
        .suffix(".sh")
        .tempfile()?;
    writeln!(file, "#!/usr/bin/env bash")?;
    writeln!(file, "set -euo pipefail")?;
    writeln!(file)?;
    writeln!(file, "{}", body)?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> CdkTsStack {
        let mut stack: CdkTsStack = serde_json::from_value(serde_json::json!({
            "apiVersion": "awscdk.dev/v1alpha1",
            "kind": "CdkTsStack",
            "metadata": { "name": "billing", "namespace": "platform" },
            "spec": {
                "stackName": "BillingStack",
                "credentialsSecretName": "aws-creds",
                "source": { "git": { "repository": "https://github.com/example/app.git" } },
                "path": "infra",
                "lifecycleHooks": { "beforeDeploy": "echo hi" }
            }
        }))
        .unwrap();
        stack.spec.aws_region = "eu-west-1".to_string();
        stack
    }

    #[test]
    fn test_hook_env_contract() {
        let stack = stack();
        let env = hook_env(&stack, "eu-west-1", HookName::BeforeDeploy);
        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("CDK_STACK_NAME"), Some("BillingStack"));
        assert_eq!(get("CDK_STACK_NAMESPACE"), Some("platform"));
        assert_eq!(get("CDK_STACK_RESOURCE_NAME"), Some("billing"));
        assert_eq!(get("CDK_STACK_REGION"), Some("eu-west-1"));
        assert_eq!(get("CDK_OPERATION"), Some("beforeDeploy"));
        assert_eq!(get("CDK_PROJECT_PATH"), Some("infra"));
        assert_eq!(get("CDK_GIT_REF"), Some("main"));
    }

    #[test]
    fn test_script_lookup_by_stage() {
        let stack = stack();
        assert_eq!(HookName::BeforeDeploy.script(&stack), Some("echo hi"));
        assert_eq!(HookName::AfterDestroy.script(&stack), None);
    }

    #[test]
    fn test_script_file_carries_strict_options() {
        let file = write_script("echo done").unwrap();
        let contents = std::fs::read_to_string(file.path()).unwrap();
        assert!(contents.starts_with("#!/usr/bin/env bash\nset -euo pipefail\n"));
        assert!(contents.contains("echo done"));
    }

    #[test]
    fn test_hook_names_are_camel_case() {
        assert_eq!(HookName::AfterDriftDetection.as_str(), "afterDriftDetection");
        assert_eq!(HookName::BeforeGitSync.as_str(), "beforeGitSync");
    }
}
