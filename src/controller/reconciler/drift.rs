//! # Drift Check
//!
//! Sweeper-owned workflow: detects AWS resources modified outside the CDK
//! control plane. Detection only; a drifted stack is never mutated by this
//! controller.
//!
//! The `DriftChecking` phase is claimed at the start and released at the
//! end; the event-driven reconciler keeps its hands off in between.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants;
use crate::controller::aws::{self, AwsCredentials};
use crate::controller::hooks::{self, HookName};
use crate::controller::process::{run_command, CommandSpec};
use crate::controller::reconciler::cdk;
use crate::controller::reconciler::prepare::{self, StepOutcome};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{StatusUpdate, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING};
use crate::controller::workspace;
use crate::crd::{CdkTsStack, Phase};
use crate::observability::metrics;

/// Interpret `cdk drift --fail` output.
///
/// Exit 0 means no drift. Exit 1 means drift *or* command failure; the
/// output is inspected for the drift summary to tell them apart.
fn interpret_drift(exit_code: i32, output: &str) -> Result<bool, String> {
    match exit_code {
        0 => Ok(false),
        1 if output.to_lowercase().contains("drift") => Ok(true),
        code => Err(format!("cdk drift exited with code {}", code)),
    }
}

/// Run one drift check for a resource. Called by the drift sweeper only.
pub async fn run_drift_check(
    stack: &CdkTsStack,
    ctx: &Reconciler,
) -> Result<(), ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();

    // Re-read: the listing snapshot may be stale by the time we get here.
    let Some(stack) = ctx.store.get(namespace, name).await? else {
        debug!("{}/{} gone before drift check, skipping", namespace, name);
        return Ok(());
    };
    if stack.phase() != Some(Phase::Succeeded) {
        debug!(
            "{}/{} not in Succeeded phase, skipping drift check",
            namespace, name
        );
        return Ok(());
    }

    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::DriftChecking, "Checking for infrastructure drift"),
        )
        .await?;
    ctx.store
        .emit_event(
            &stack,
            EVENT_TYPE_NORMAL,
            "DriftCheckStart",
            "Checking deployed stack for drift",
        )
        .await;

    let ws = workspace::scratch_workspace("drift", namespace, name);
    match prepare::prepare_workspace(ctx, &stack, &ws).await? {
        StepOutcome::Success => {}
        StepOutcome::Failure(message) => {
            let message = format!("Drift check preparation failed: {}", message);
            warn!("{}/{}: {}", namespace, name, message);
            ctx.store
                .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &message))
                .await?;
            prepare::cleanup(&ws).await;
            return Ok(());
        }
        StepOutcome::Cancelled => {
            release_on_shutdown(ctx, namespace, name).await?;
            prepare::cleanup(&ws).await;
            return Ok(());
        }
    }

    let creds = match load_creds(&stack, ctx).await? {
        Ok(creds) => creds,
        Err(message) => {
            let message = format!("Drift check failed: {}", message);
            warn!("{}/{}: {}", namespace, name, message);
            ctx.store
                .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &message))
                .await?;
            prepare::cleanup(&ws).await;
            return Ok(());
        }
    };

    let region = stack.effective_region(ctx.config.cdk_default_region.as_deref());
    let aws_env = creds.env(region, &ctx.config);
    let project = workspace::project_dir(&ws, &stack.spec.path);

    let mut hook_env = hooks::hook_env(&stack, region, HookName::BeforeDriftDetection);
    hook_env.extend(aws_env.clone());
    hooks::run_hook(
        &ctx.store,
        &stack,
        HookName::BeforeDriftDetection,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

    let spec = CommandSpec::new(
        "cdk",
        cdk::drift_args(&stack.spec),
        "CDK DRIFT",
        Duration::from_secs(constants::CDK_CHECK_TIMEOUT_SECS),
    )
    .cwd(&project)
    .envs(aws_env.clone());

    let result = run_command(spec, ctx.shutdown.clone())
        .await
        .map_err(ReconcilerError::Process)?;

    if result.cancelled() {
        release_on_shutdown(ctx, namespace, name).await?;
        prepare::cleanup(&ws).await;
        return Ok(());
    }

    let drift_detected = match interpret_drift(result.exit_code, &result.output) {
        Ok(drifted) => drifted,
        Err(message) => {
            let message = format!("Drift check failed: {}", message);
            warn!("{}/{}: {}", namespace, name, message);
            ctx.store
                .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &message))
                .await?;
            prepare::cleanup(&ws).await;
            return Ok(());
        }
    };

    let message = if drift_detected {
        "Drift detected - AWS resources diverge from the CDK template"
    } else {
        "No drift detected"
    };
    info!("Drift check for {}/{}: {}", namespace, name, message);
    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::Succeeded, message).with_drift_result(drift_detected),
        )
        .await?;
    if drift_detected {
        ctx.store
            .emit_event(&stack, EVENT_TYPE_WARNING, "DriftDetected", message)
            .await;
    }

    let mut hook_env = hooks::hook_env(&stack, region, HookName::AfterDriftDetection);
    hook_env.extend(aws_env);
    hook_env.push((
        "DRIFT_DETECTED".to_string(),
        drift_detected.to_string(),
    ));
    hooks::run_hook(
        &ctx.store,
        &stack,
        HookName::AfterDriftDetection,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

    let labels = metrics::labels_for(&stack, region);
    metrics::increment_drift_checks_total(labels.clone());
    if drift_detected {
        metrics::increment_drifts_detected_total(labels.clone());
    }
    metrics::set_drift_status(labels, drift_detected);

    prepare::cleanup(&ws).await;
    Ok(())
}

/// Release the owned phase when shutdown interrupts a check, so the
/// resource is not left parked in a sweeper-owned phase across restarts.
async fn release_on_shutdown(
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
) -> Result<(), ReconcilerError> {
    info!(
        "Drift check of {}/{} interrupted by shutdown, releasing phase",
        namespace, name
    );
    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::Succeeded, "Drift check interrupted by shutdown"),
        )
        .await?;
    Ok(())
}

/// Load AWS credentials, folding configuration errors into an operator
/// message and letting transient API errors bubble to the sweep loop.
pub(crate) async fn load_creds(
    stack: &CdkTsStack,
    ctx: &Reconciler,
) -> Result<Result<AwsCredentials, String>, ReconcilerError> {
    match aws::load_credentials(
        &ctx.client,
        stack.namespace_or_default(),
        &stack.spec.credentials_secret_name,
    )
    .await
    {
        Ok(creds) => Ok(Ok(creds)),
        Err(e @ aws::CredentialsError::SecretNotFound { .. })
        | Err(e @ aws::CredentialsError::MissingKey { .. })
        | Err(e @ aws::CredentialsError::InvalidValue { .. }) => Ok(Err(e.to_string())),
        Err(aws::CredentialsError::Kube(e)) => Err(ReconcilerError::Store(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_zero_means_no_drift() {
        assert_eq!(interpret_drift(0, "Stacks are in sync"), Ok(false));
    }

    #[test]
    fn test_exit_one_with_drift_summary_means_drift() {
        let output = "Stack BillingStack\nResources with drift: 2";
        assert_eq!(interpret_drift(1, output), Ok(true));
    }

    #[test]
    fn test_exit_one_without_drift_marker_is_a_failure() {
        let result = interpret_drift(1, "Error: could not assume role");
        assert!(result.is_err());
    }

    #[test]
    fn test_higher_exit_codes_are_failures() {
        let result = interpret_drift(2, "drift summary present but exit code says otherwise");
        assert!(result.unwrap_err().contains("exit"));
    }

    #[test]
    fn test_drift_marker_is_case_insensitive() {
        assert_eq!(interpret_drift(1, "DRIFT DETECTED on 1 resource"), Ok(true));
    }
}
