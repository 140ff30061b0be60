//! # Scheduled Sweepers
//!
//! Two cron-driven scans over all CdkTsStack resources: the drift checker
//! and the Git-sync checker. Each sweep pre-expires its gauge group so
//! metrics of deleted resources disappear, then runs the per-resource
//! workflow for every `Succeeded` resource with the relevant action
//! enabled. A failing resource never stops the sweep.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants;
use crate::controller::reconciler::{drift, git_sync, Reconciler};
use crate::controller::store::EVENT_TYPE_WARNING;
use crate::crd::{CdkTsStack, Phase};
use crate::observability::metrics;

/// Which sweep is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Drift,
    GitSync,
}

impl SweepKind {
    pub fn name(&self) -> &'static str {
        match self {
            SweepKind::Drift => "drift",
            SweepKind::GitSync => "git-sync",
        }
    }

    /// Gauge group expired at the start of each sweep.
    pub fn gauge_group(&self) -> &'static str {
        match self {
            SweepKind::Drift => constants::DRIFT_STATUS_GROUP,
            SweepKind::GitSync => constants::GIT_SYNC_STATUS_GROUP,
        }
    }

    fn cron<'a>(&self, ctx: &'a Reconciler) -> &'a str {
        match self {
            SweepKind::Drift => &ctx.config.drift_check_cron,
            SweepKind::GitSync => &ctx.config.git_sync_check_cron,
        }
    }

    fn default_cron(&self) -> &'static str {
        match self {
            SweepKind::Drift => constants::DEFAULT_DRIFT_CHECK_CRON,
            SweepKind::GitSync => constants::DEFAULT_GIT_SYNC_CHECK_CRON,
        }
    }

    /// Is this resource eligible for the sweep?
    pub fn eligible(&self, stack: &CdkTsStack) -> bool {
        if stack.phase() != Some(Phase::Succeeded) {
            return false;
        }
        match self {
            SweepKind::Drift => stack.spec.actions.drift_detection,
            SweepKind::GitSync => stack.spec.actions.deploy,
        }
    }
}

/// Spawn both sweeper tasks. They run until the shutdown channel flips.
pub fn spawn_sweepers(ctx: Arc<Reconciler>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(run_sweeper(SweepKind::Drift, ctx.clone())),
        tokio::spawn(run_sweeper(SweepKind::GitSync, ctx)),
    ]
}

/// Cron loop for one sweeper.
async fn run_sweeper(kind: SweepKind, ctx: Arc<Reconciler>) {
    let expr = kind.cron(&ctx).to_string();
    // Cron expressions here carry a seconds field prepended to the usual
    // five; operator-supplied five-field expressions are normalized.
    let schedule = parse_schedule(&expr).unwrap_or_else(|| {
        error!(
            "Invalid {} cron expression {:?}, falling back to {:?}",
            kind.name(),
            expr,
            kind.default_cron()
        );
        parse_schedule(kind.default_cron()).expect("default cron expression must parse")
    });

    info!("{} sweeper scheduled with {:?}", kind.name(), expr);

    let mut shutdown = ctx.shutdown.clone();
    let mut last_tick = Utc::now();
    loop {
        let now = Utc::now();
        let Some(next) = schedule.after(&last_tick).next() else {
            warn!("{} schedule has no future firings, stopping sweeper", kind.name());
            return;
        };
        if next > now {
            let wait = (next - now).num_milliseconds().unsigned_abs();
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait)) => {}
                _ = shutdown.changed() => {
                    info!("{} sweeper stopping on shutdown", kind.name());
                    return;
                }
            }
            continue;
        }
        last_tick = now;
        sweep(kind, &ctx).await;
    }
}

/// Normalize a five-field cron expression to the six-field form the cron
/// crate expects, then parse it.
fn parse_schedule(expr: &str) -> Option<Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };
    Schedule::from_str(&normalized).ok()
}

/// One full sweep over all resources.
pub async fn sweep(kind: SweepKind, ctx: &Reconciler) {
    info!("Starting {} sweep", kind.name());
    metrics::expire_group(kind.gauge_group());

    let stacks = match ctx.store.list_all().await {
        Ok(stacks) => stacks,
        Err(e) => {
            error!("{} sweep could not list resources: {}", kind.name(), e);
            return;
        }
    };

    let mut swept = 0usize;
    for stack in &stacks {
        if !kind.eligible(stack) {
            debug!(
                "Skipping {}/{} in {} sweep",
                stack.namespace_or_default(),
                stack.name_or_unknown(),
                kind.name()
            );
            continue;
        }
        swept += 1;
        let result = match kind {
            SweepKind::Drift => drift::run_drift_check(stack, ctx).await,
            SweepKind::GitSync => git_sync::run_git_sync_check(stack, ctx).await,
        };
        if let Err(e) = result {
            // Per-resource failures are isolated; the sweep continues.
            error!(
                "{} check failed for {}/{}: {}",
                kind.name(),
                stack.namespace_or_default(),
                stack.name_or_unknown(),
                e
            );
            let reason = match kind {
                SweepKind::Drift => "DriftCheckFailure",
                SweepKind::GitSync => "GitSyncCheckFailure",
            };
            ctx.store
                .emit_event(stack, EVENT_TYPE_WARNING, reason, &e.to_string())
                .await;
        }
    }

    info!(
        "✅ Completed {} sweep: {} of {} resources checked",
        kind.name(),
        swept,
        stacks.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_field_cron_is_normalized() {
        assert!(parse_schedule("*/30 * * * *").is_some());
        assert!(parse_schedule("*/5 * * * *").is_some());
    }

    #[test]
    fn test_six_field_cron_parses_as_is() {
        assert!(parse_schedule("0 */30 * * * *").is_some());
    }

    #[test]
    fn test_garbage_cron_is_rejected() {
        assert!(parse_schedule("every thirty minutes").is_none());
    }

    #[test]
    fn test_default_crons_parse() {
        assert!(parse_schedule(crate::constants::DEFAULT_DRIFT_CHECK_CRON).is_some());
        assert!(parse_schedule(crate::constants::DEFAULT_GIT_SYNC_CHECK_CRON).is_some());
    }

    #[test]
    fn test_eligibility_requires_succeeded_phase() {
        let stack: CdkTsStack = serde_json::from_value(serde_json::json!({
            "apiVersion": "awscdk.dev/v1alpha1",
            "kind": "CdkTsStack",
            "metadata": { "name": "billing", "namespace": "platform" },
            "spec": {
                "credentialsSecretName": "aws-creds",
                "source": { "git": { "repository": "https://github.com/example/app.git" } }
            },
            "status": { "phase": "Failed" }
        }))
        .unwrap();
        assert!(!SweepKind::Drift.eligible(&stack));
        assert!(!SweepKind::GitSync.eligible(&stack));
    }

    #[test]
    fn test_eligibility_honors_action_gates() {
        let mut stack: CdkTsStack = serde_json::from_value(serde_json::json!({
            "apiVersion": "awscdk.dev/v1alpha1",
            "kind": "CdkTsStack",
            "metadata": { "name": "billing", "namespace": "platform" },
            "spec": {
                "credentialsSecretName": "aws-creds",
                "source": { "git": { "repository": "https://github.com/example/app.git" } },
                "actions": { "driftDetection": false }
            },
            "status": { "phase": "Succeeded" }
        }))
        .unwrap();
        assert!(!SweepKind::Drift.eligible(&stack));
        assert!(SweepKind::GitSync.eligible(&stack));
        stack.spec.actions.deploy = false;
        assert!(!SweepKind::GitSync.eligible(&stack));
    }
}
