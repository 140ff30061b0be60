//! # Destroy Workflow
//!
//! Single-shot teardown run from the deletion path. Not state-machined:
//! the object is leaving, so there is nobody left to observe intermediate
//! phases. Destroy failure never blocks finalizer removal; the alternative
//! is a resource stuck in `Terminating` forever, which is worse than an
//! orphaned stack the user can clean up manually.

use std::time::Duration;

use tracing::{info, warn};

use crate::constants;
use crate::controller::aws::AwsCredentials;
use crate::controller::hooks::{self, HookName};
use crate::controller::process::{run_command, CommandSpec};
use crate::controller::reconciler::cdk;
use crate::controller::reconciler::prepare::{self, StepOutcome};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::EVENT_TYPE_WARNING;
use crate::controller::workspace;
use crate::crd::CdkTsStack;

/// Run `cdk destroy` against a fresh clone of the configured ref.
///
/// Every failure mode is reported via log and event but swallowed: the
/// caller removes the finalizer regardless of the outcome. Returns `false`
/// only when controller shutdown interrupted the attempt, in which case
/// the caller keeps the finalizer so the next run can retry.
pub async fn run_destroy(
    stack: &CdkTsStack,
    ctx: &Reconciler,
    creds: &AwsCredentials,
) -> Result<bool, ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();
    let ws = workspace::scratch_workspace("destroy", namespace, name);

    match prepare::clone_repository(ctx, stack, &ws).await? {
        StepOutcome::Success => {}
        StepOutcome::Failure(message) => {
            warn!(
                "Skipping destroy for {}/{}: {}",
                namespace, name, message
            );
            ctx.store
                .emit_event(
                    stack,
                    EVENT_TYPE_WARNING,
                    "StackDestroyFailure",
                    &format!("Destroy skipped, source unavailable: {}", message),
                )
                .await;
            prepare::cleanup(&ws).await;
            return Ok(true);
        }
        StepOutcome::Cancelled => {
            warn!("Destroy of {}/{} interrupted by shutdown", namespace, name);
            prepare::cleanup(&ws).await;
            return Ok(false);
        }
    }

    let project = workspace::project_dir(&ws, &stack.spec.path);
    if !project.is_dir() {
        // Nothing usable to destroy with.
        warn!(
            "Skipping destroy for {}/{}: spec.path '{}' not present in the clone",
            namespace, name, stack.spec.path
        );
        prepare::cleanup(&ws).await;
        return Ok(true);
    }

    // Install failures are non-fatal here; destroy is attempted anyway.
    match prepare::install_dependencies(ctx, stack, &ws).await? {
        StepOutcome::Success => {}
        StepOutcome::Failure(message) => {
            warn!(
                "Dependency install failed before destroy of {}/{} ({}), attempting destroy anyway",
                namespace, name, message
            );
        }
        StepOutcome::Cancelled => {
            warn!("Destroy of {}/{} interrupted by shutdown", namespace, name);
            prepare::cleanup(&ws).await;
            return Ok(false);
        }
    }

    let region = stack.effective_region(ctx.config.cdk_default_region.as_deref());
    let aws_env = creds.env(region, &ctx.config);

    let mut hook_env = hooks::hook_env(stack, region, HookName::BeforeDestroy);
    hook_env.extend(aws_env.clone());
    hooks::run_hook(
        &ctx.store,
        stack,
        HookName::BeforeDestroy,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

    let spec = CommandSpec::new(
        "cdk",
        cdk::destroy_args(&stack.spec),
        "CDK DESTROY",
        Duration::from_secs(constants::CDK_DEPLOY_TIMEOUT_SECS),
    )
    .cwd(&project)
    .envs(aws_env.clone());

    let result = run_command(spec, ctx.shutdown.clone())
        .await
        .map_err(ReconcilerError::Process)?;

    if result.cancelled() {
        warn!(
            "cdk destroy for {}/{} interrupted by shutdown",
            namespace, name
        );
        prepare::cleanup(&ws).await;
        return Ok(false);
    }

    if result.success() {
        info!("Destroyed CDK stack for {}/{}", namespace, name);
    } else {
        warn!(
            "cdk destroy for {}/{} exited with code {}; the AWS stack may need manual cleanup",
            namespace, name, result.exit_code
        );
        ctx.store
            .emit_event(
                stack,
                EVENT_TYPE_WARNING,
                "StackDestroyFailure",
                &format!(
                    "cdk destroy exited with code {}: {}",
                    result.exit_code,
                    result.tail()
                ),
            )
            .await;
    }

    let mut hook_env = hooks::hook_env(stack, region, HookName::AfterDestroy);
    hook_env.extend(aws_env);
    hooks::run_hook(
        &ctx.store,
        stack,
        HookName::AfterDestroy,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

    prepare::cleanup(&ws).await;
    Ok(true)
}
