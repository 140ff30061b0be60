//! # Reconciliation Engine
//!
//! The event-driven entrypoint of the controller. Each watch event lands
//! here; the engine branches on deletion state and current phase, then
//! advances the deploy state machine by one transition.
//!
//! Phase guards make the status machine the coordination primitive:
//! `DriftChecking`, `GitSyncChecking`, and `Deleting` are owned by the
//! subsystem that set them, `Deploying` marks a deploy in flight, and the
//! "Auto deployment failed" / "Git sync" markers on `Failed` hand the
//! retry cadence to the Git-sync sweeper.

pub mod cdk;
pub mod classify;
pub mod deploy;
pub mod destroy;
pub mod drift;
pub mod git_sync;
pub mod prepare;
pub mod types;

use std::sync::Arc;

use kube::runtime::controller::Action;
use tracing::{debug, info, warn};

use crate::constants;
use crate::controller::store::{StatusUpdate, EVENT_TYPE_WARNING};
use crate::crd::{CdkTsStack, Phase};

pub use types::{Reconciler, ReconcilerError};

/// Event-driven reconcile for one CdkTsStack.
///
/// Every transition this function performs patches status through the
/// store gateway; the resulting watch event drives the next transition.
pub async fn reconcile(
    stack: Arc<CdkTsStack>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let namespace = stack.namespace_or_default().to_string();
    let name = stack.name_or_unknown().to_string();
    let key = format!("{}/{}", namespace, name);
    debug!("Reconciling {}", key);

    if stack.metadata.deletion_timestamp.is_some() {
        handle_deletion(&stack, &ctx).await?;
        ctx.clear_errors(&key);
        return Ok(Action::await_change());
    }

    if !stack.has_finalizer() {
        // Two-step: add the finalizer and return; the resulting Modified
        // event drives the actual reconciliation. This guarantees destroy
        // is attempted for every resource ever reconciled.
        ctx.store.add_finalizer(&namespace, &name).await?;
        ctx.clear_errors(&key);
        return Ok(Action::await_change());
    }

    let Some(phase) = stack.phase() else {
        warn!(
            "{} has unknown phase {:?}, skipping",
            key,
            stack.status.as_ref().and_then(|s| s.phase.as_deref())
        );
        return Ok(Action::await_change());
    };

    if phase.is_owned() {
        debug!("{} is in sweeper-owned phase {}, leaving it alone", key, phase);
        return Ok(Action::await_change());
    }
    if phase == Phase::Deploying {
        debug!("{} has a deploy in flight, leaving it to its owner", key);
        return Ok(Action::await_change());
    }
    if phase == Phase::Failed {
        let message = stack.status_message();
        if message.contains(constants::AUTO_REDEPLOY_FAILED_MARKER)
            || message.contains(constants::GIT_SYNC_MARKER)
        {
            debug!(
                "{} failed under sweeper ownership ({:?}), letting the sweeper retry",
                key, message
            );
            return Ok(Action::await_change());
        }
    }

    if !stack.spec.actions.deploy {
        if phase == Phase::Initial {
            info!("{}: deploy action is disabled, not reconciling", key);
            ctx.store
                .patch_status(
                    &namespace,
                    &name,
                    StatusUpdate::new(Phase::Failed, "Deploy action is disabled"),
                )
                .await?;
        }
        ctx.clear_errors(&key);
        return Ok(Action::await_change());
    }

    let creds = match drift::load_creds(&stack, &ctx).await? {
        Ok(creds) => creds,
        Err(message) => {
            // Configuration error: surfaced on status, fixed by a user edit.
            warn!("{}: {}", key, message);
            ctx.store
                .patch_status(&namespace, &name, StatusUpdate::new(Phase::Failed, &message))
                .await?;
            ctx.clear_errors(&key);
            return Ok(Action::await_change());
        }
    };

    deploy::advance(&stack, &ctx, phase, &creds).await?;
    ctx.clear_errors(&key);
    Ok(Action::await_change())
}

/// Deletion path, governed by the finalizer.
///
/// The finalizer is removed regardless of destroy success: a stack the
/// user must clean up manually beats a resource stuck in Terminating.
async fn handle_deletion(stack: &CdkTsStack, ctx: &Reconciler) -> Result<(), ReconcilerError> {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();

    // The object may have vanished while this event sat in the queue.
    let Some(current) = ctx.store.get(namespace, name).await? else {
        debug!("{}/{} already fully deleted", namespace, name);
        return Ok(());
    };
    if !current.has_finalizer() {
        debug!(
            "{}/{} is deleting without our finalizer, nothing to do",
            namespace, name
        );
        return Ok(());
    }

    if !current.spec.actions.destroy {
        info!(
            "{}/{} deleted with destroy disabled, orphaning the AWS stack",
            namespace, name
        );
        ctx.store
            .patch_status(
                namespace,
                name,
                StatusUpdate::new(
                    Phase::Deleting,
                    "Destroy action is disabled - the AWS stack is left in place",
                ),
            )
            .await?;
        ctx.store.remove_finalizer(namespace, name).await?;
        return Ok(());
    }

    ctx.store
        .patch_status(
            namespace,
            name,
            StatusUpdate::new(Phase::Deleting, "Destroying CDK stack"),
        )
        .await?;

    match drift::load_creds(&current, ctx).await? {
        Ok(creds) => {
            let completed = destroy::run_destroy(&current, ctx, &creds).await?;
            if !completed {
                // Shutdown interrupted the destroy: keep the finalizer so
                // the next run retries instead of orphaning the stack.
                return Ok(());
            }
        }
        Err(message) => {
            warn!(
                "{}/{}: cannot destroy, credentials unavailable: {}",
                namespace, name, message
            );
            ctx.store
                .emit_event(
                    &current,
                    EVENT_TYPE_WARNING,
                    "StackDestroyFailure",
                    &format!("Destroy skipped, credentials unavailable: {}", message),
                )
                .await;
        }
    }

    // Regardless of destroy success.
    ctx.store.remove_finalizer(namespace, name).await?;
    Ok(())
}
