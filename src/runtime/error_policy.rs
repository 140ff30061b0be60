//! # Error Policy
//!
//! Retry handling for the controller watch loop. Each resource key gets a
//! bounded retry budget with a fixed backoff; once the budget is spent the
//! event is dropped and the next watch resync re-delivers it.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use tracing::{error, warn};

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::CdkTsStack;

/// Handle a reconciliation error with per-resource retry accounting.
///
/// Backoff state is tracked per resource key so one failing resource never
/// slows the others down.
pub fn handle_reconciliation_error(
    stack: Arc<CdkTsStack>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let namespace = stack.namespace_or_default();
    let name = stack.name_or_unknown();
    let key = format!("{}/{}", namespace, name);

    let attempt = ctx.record_error(&key);
    error!(
        "Reconciliation error for {} (attempt {}/{}): {}",
        key, attempt, ctx.config.reconcile_max_retries, error
    );

    if attempt >= ctx.config.reconcile_max_retries {
        warn!(
            "Retry budget exhausted for {}, waiting for the next watch resync",
            key
        );
        ctx.clear_errors(&key);
        return Action::await_change();
    }

    warn!(
        "🔄 Retrying {} in {}s",
        key, ctx.config.reconcile_backoff_secs
    );
    Action::requeue(Duration::from_secs(ctx.config.reconcile_backoff_secs))
}
