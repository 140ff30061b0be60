//! # Git-Sync Check
//!
//! Sweeper-owned workflow: compares the deployed template against what the
//! latest Git revision would synthesize, optionally redeploying when the
//! resource allows it.
//!
//! A failed auto-redeploy parks the resource back in `Succeeded` with the
//! "Auto deployment failed" marker instead of `Failed`. The event-driven
//! reconciler declines to retry that marker, so this sweeper alone owns
//! the retry cadence for auto-redeploys.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants;
use crate::controller::hooks::{self, HookName};
use crate::controller::process::{run_command, CommandSpec};
use crate::controller::reconciler::cdk;
use crate::controller::reconciler::drift::load_creds;
use crate::controller::reconciler::prepare::{self, StepOutcome};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{StatusUpdate, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING};
use crate::controller::workspace;
use crate::crd::{CdkTsStack, Phase};
use crate::observability::metrics;

/// Run one Git-sync check for a resource. Called by the Git-sync sweeper
/// only.
pub async fn run_git_sync_check(
    stack: &CdkTsStack,
    ctx: &Reconciler,
) -> Result<(), ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();

    let Some(stack) = ctx.store.get(namespace, name).await? else {
        debug!("{}/{} gone before Git-sync check, skipping", namespace, name);
        return Ok(());
    };
    if stack.phase() != Some(Phase::Succeeded) || !stack.spec.actions.deploy {
        debug!(
            "{}/{} not eligible for Git-sync check, skipping",
            namespace, name
        );
        return Ok(());
    }

    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::GitSyncChecking, "Checking Git for template changes"),
        )
        .await?;
    ctx.store
        .emit_event(
            &stack,
            EVENT_TYPE_NORMAL,
            "GitSyncCheckStart",
            "Comparing deployed template against the latest Git revision",
        )
        .await;

    let ws = workspace::scratch_workspace("gitsync", namespace, name);
    match prepare::prepare_workspace(ctx, &stack, &ws).await? {
        StepOutcome::Success => {}
        StepOutcome::Failure(message) => {
            let message = format!("Git sync check failed: {}", message);
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
            let message = format!("Git sync check failed: {}", message);
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

    let mut hook_env = hooks::hook_env(&stack, region, HookName::BeforeGitSync);
    hook_env.extend(aws_env.clone());
    hooks::run_hook(
        &ctx.store,
        &stack,
        HookName::BeforeGitSync,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

    let spec = CommandSpec::new(
        "cdk",
        cdk::diff_args(&stack.spec),
        "CDK DIFF",
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

    // `cdk diff --fail`: exit 1 means template changes are pending.
    let changes_pending = match result.exit_code {
        0 => false,
        1 => true,
        code => {
            let message = format!("Git sync check failed: cdk diff exited with code {}", code);
            warn!("{}/{}: {}", namespace, name, message);
            ctx.store
                .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &message))
                .await?;
            prepare::cleanup(&ws).await;
            return Ok(());
        }
    };

    let labels = metrics::labels_for(&stack, region);
    metrics::set_git_sync_pending(labels.clone(), changes_pending);
    if changes_pending {
        metrics::increment_git_changes_detected_total(labels);
        ctx.store
            .emit_event(
                &stack,
                EVENT_TYPE_NORMAL,
                "GitChangesDetected",
                "Deployed template differs from the latest Git revision",
            )
            .await;
    }

    if changes_pending && stack.spec.actions.auto_redeploy && stack.spec.actions.deploy {
        auto_redeploy(&stack, ctx, &aws_env, &project).await?;
    } else {
        let message = if changes_pending {
            "Git changes detected - manual deployment required"
        } else {
            "In sync with Git"
        };
        info!("Git-sync check for {}/{}: {}", namespace, name, message);
        ctx.store
            .patch_status(namespace, name, StatusUpdate::new(Phase::Succeeded, message))
            .await?;
    }

    let mut hook_env = hooks::hook_env(&stack, region, HookName::AfterGitSync);
    hook_env.extend(aws_env);
    hook_env.push((
        "GIT_CHANGES_DETECTED".to_string(),
        changes_pending.to_string(),
    ));
    hooks::run_hook(
        &ctx.store,
        &stack,
        HookName::AfterGitSync,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

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
        "Git-sync check of {}/{} interrupted by shutdown, releasing phase",
        namespace, name
    );
    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::Succeeded, "Git sync check interrupted by shutdown"),
        )
        .await?;
    Ok(())
}

/// Redeploy from the fresh clone after the diff reported pending changes.
async fn auto_redeploy(
    stack: &CdkTsStack,
    ctx: &Reconciler,
    aws_env: &[(String, String)],
    project: &std::path::Path,
) -> Result<(), ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();

    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::Deploying, "Auto deployment from Git in progress"),
        )
        .await?;
    ctx.store
        .emit_event(
            stack,
            EVENT_TYPE_NORMAL,
            "AutoRedeployStart",
            "Redeploying to match the latest Git revision",
        )
        .await;

    let spec = CommandSpec::new(
        "cdk",
        cdk::deploy_args(&stack.spec),
        "CDK DEPLOY",
        Duration::from_secs(constants::CDK_DEPLOY_TIMEOUT_SECS),
    )
    .cwd(project)
    .envs(aws_env.to_vec());

    let result = run_command(spec, ctx.shutdown.clone())
        .await
        .map_err(ReconcilerError::Process)?;

    if result.cancelled() {
        // Release the in-flight phase; the next sweep retries the redeploy.
        warn!(
            "Auto redeploy of {}/{} interrupted by shutdown",
            namespace, name
        );
        ctx.store
            .patch_status(
                namespace,
                name,
                StatusUpdate::new(
                    Phase::Succeeded,
                    "Auto deployment interrupted by shutdown - Git changes pending",
                ),
            )
            .await?;
        return Ok(());
    }

    if result.success() {
        info!("Auto redeploy of {}/{} succeeded", namespace, name);
        ctx.store
            .patch_status(
                namespace,
                name,
                StatusUpdate::new(Phase::Succeeded, "Auto deployment from Git completed")
                    .with_deploy_timestamp(),
            )
            .await?;
        ctx.store
            .emit_event(
                stack,
                EVENT_TYPE_NORMAL,
                "AutoRedeploySuccess",
                "Auto deployment from Git completed",
            )
            .await;
    } else {
        // Park in Succeeded, not Failed: the marker message tells the event
        // reconciler to leave the retry cadence to this sweeper.
        let message = format!(
            "{} - Git changes pending manual deployment",
            constants::AUTO_REDEPLOY_FAILED_MARKER
        );
        warn!(
            "Auto redeploy of {}/{} failed (exit {})",
            namespace, name, result.exit_code
        );
        ctx.store
            .patch_status(namespace, name, StatusUpdate::new(Phase::Succeeded, &message))
            .await?;
        ctx.store
            .emit_event(
                stack,
                EVENT_TYPE_WARNING,
                "AutoRedeployFailure",
                &format!(
                    "Auto deployment exited with code {}: {}",
                    result.exit_code,
                    result.tail()
                ),
            )
            .await;
    }

    Ok(())
}
