//! # Deploy State Machine
//!
//! Drives a resource through `"" | Failed → Cloning → Installing →
//! Deploying → Succeeded`. Each watch event advances one observable
//! transition; after a crash the machine resumes from `status.phase`.
//!
//! The `Deploying` phase is entered and resolved within the same handler
//! that finished the install step: it marks a deploy in flight, and the
//! engine's phase guard keeps concurrent events away until it resolves.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::constants;
use crate::controller::aws::AwsCredentials;
use crate::controller::hooks::{self, HookName};
use crate::controller::process::{run_command, CommandSpec};
use crate::controller::reconciler::cdk;
use crate::controller::reconciler::classify;
use crate::controller::reconciler::prepare::{self, StepOutcome};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::{StatusUpdate, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING};
use crate::controller::workspace;
use crate::crd::{CdkTsStack, Phase};

/// Advance the deploy state machine by one transition.
pub async fn advance(
    stack: &CdkTsStack,
    ctx: &Reconciler,
    phase: Phase,
    creds: &AwsCredentials,
) -> Result<(), ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();
    let ws = workspace::deploy_workspace(namespace, name);

    match phase {
        Phase::Initial | Phase::Failed => {
            // Fresh start: clear any prior workspace, then announce Cloning.
            prepare::cleanup(&ws).await;
            let git = &stack.spec.source.git;
            let message = format!("Cloning {} at {}", git.repository, git.r#ref);
            ctx.store
                .patch_status(namespace, name, StatusUpdate::new(Phase::Cloning, &message))
                .await?;
        }
        Phase::Cloning => match prepare::clone_repository(ctx, stack, &ws).await? {
            StepOutcome::Success => {
                ctx.store
                    .patch_status(
                        namespace,
                        name,
                        StatusUpdate::new(Phase::Installing, "Installing dependencies"),
                    )
                    .await?;
            }
            StepOutcome::Failure(message) => {
                warn!("Clone failed for {}/{}: {}", namespace, name, message);
                ctx.store
                    .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &message))
                    .await?;
            }
            StepOutcome::Cancelled => {
                // Shutdown: leave Cloning in place, the next run resumes it.
                info!("Clone of {}/{} cancelled by shutdown", namespace, name);
            }
        },
        Phase::Installing => {
            if !ws.is_dir() {
                // Controller restarted between steps; workspaces are
                // disposable, so fall back to a fresh clone.
                info!(
                    "Workspace {} missing for {}/{}, restarting from clone",
                    ws.display(),
                    namespace,
                    name
                );
                ctx.store
                    .patch_status(
                        namespace,
                        name,
                        StatusUpdate::new(Phase::Cloning, "Workspace lost, recloning"),
                    )
                    .await?;
                return Ok(());
            }
            match prepare::install_dependencies(ctx, stack, &ws).await? {
                StepOutcome::Success => {
                    ctx.store
                        .patch_status(
                            namespace,
                            name,
                            StatusUpdate::new(Phase::Deploying, "Deploying CDK stack"),
                        )
                        .await?;
                    // The deploy runs inside this handler; Deploying acts as
                    // the in-flight marker for everyone else.
                    let project = workspace::project_dir(&ws, &stack.spec.path);
                    run_deploy(stack, ctx, creds, &project).await?;
                    prepare::cleanup(&ws).await;
                }
                StepOutcome::Failure(message) => {
                    warn!(
                        "Dependency install failed for {}/{}: {}",
                        namespace, name, message
                    );
                    ctx.store
                        .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &message))
                        .await?;
                }
                StepOutcome::Cancelled => {
                    info!(
                        "Dependency install of {}/{} cancelled by shutdown",
                        namespace, name
                    );
                }
            }
        }
        Phase::Succeeded => {
            debug!("{}/{} is in steady state", namespace, name);
        }
        // Owned and in-flight phases never reach the state machine.
        Phase::Deploying | Phase::Deleting | Phase::DriftChecking | Phase::GitSyncChecking => {
            debug!(
                "{}/{} in phase {} is owned elsewhere, not advancing",
                namespace, name, phase
            );
        }
    }

    Ok(())
}

/// Run `cdk deploy` for the project directory, with hooks, events, and
/// failure classification.
async fn run_deploy(
    stack: &CdkTsStack,
    ctx: &Reconciler,
    creds: &AwsCredentials,
    project: &Path,
) -> Result<(), ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();
    let region = stack.effective_region(ctx.config.cdk_default_region.as_deref());
    let aws_env = creds.env(region, &ctx.config);

    let mut hook_env = hooks::hook_env(stack, region, HookName::BeforeDeploy);
    hook_env.extend(aws_env.clone());
    hooks::run_hook(
        &ctx.store,
        stack,
        HookName::BeforeDeploy,
        hook_env,
        ctx.shutdown.clone(),
    )
    .await;

    let target = if stack.spec.stack_name.is_empty() {
        "all stacks".to_string()
    } else {
        stack.spec.stack_name.clone()
    };
    ctx.store
        .emit_event(
            stack,
            EVENT_TYPE_NORMAL,
            "StackDeployStart",
            &format!("Deploying {} in {}", target, region),
        )
        .await;

    let spec = CommandSpec::new(
        "cdk",
        cdk::deploy_args(&stack.spec),
        "CDK DEPLOY",
        Duration::from_secs(constants::CDK_DEPLOY_TIMEOUT_SECS),
    )
    .cwd(project)
    .envs(aws_env.clone());

    let result = run_command(spec, ctx.shutdown.clone())
        .await
        .map_err(ReconcilerError::Process)?;

    if result.cancelled() {
        // Shutdown mid-deploy: leave status as-is. The documented unstick
        // procedure (manual phase reset) applies if the deploy never ran
        // to completion.
        warn!("Deploy of {}/{} cancelled by shutdown", namespace, name);
        return Ok(());
    }

    if result.success() {
        info!("Deploy of {}/{} succeeded", namespace, name);

        let mut hook_env = hooks::hook_env(stack, region, HookName::AfterDeploy);
        hook_env.extend(aws_env);
        hooks::run_hook(
            &ctx.store,
            stack,
            HookName::AfterDeploy,
            hook_env,
            ctx.shutdown.clone(),
        )
        .await;

        ctx.store
            .patch_status(
                namespace,
                name,
                StatusUpdate::new(Phase::Succeeded, "Deployment completed")
                    .with_deploy_timestamp(),
            )
            .await?;
        ctx.store
            .emit_event(
                stack,
                EVENT_TYPE_NORMAL,
                "StackDeploySuccess",
                &format!("Deployed {} in {}", target, region),
            )
            .await;
    } else {
        let summary = classify::error_summary(&result.output, result.exit_code);
        warn!(
            "Deploy of {}/{} failed (exit {}): {}",
            namespace, name, result.exit_code, summary
        );
        ctx.store
            .patch_status(namespace, name, StatusUpdate::new(Phase::Failed, &summary))
            .await?;
        ctx.store
            .emit_event(
                stack,
                EVENT_TYPE_WARNING,
                "StackDeployFailure",
                &format!("{} (exit {}): {}", summary, result.exit_code, result.tail()),
            )
            .await;
    }

    Ok(())
}
