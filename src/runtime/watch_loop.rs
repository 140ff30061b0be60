//! # Watch Loop
//!
//! Wires the event-driven entrypoint into a kube-runtime Controller. The
//! Controller provides the reconcile queue keyed by `(namespace, name)`:
//! at most one reconcile per key at a time, distinct keys in parallel up
//! to the configured concurrency.

use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use kube::runtime::controller::{Config, Controller};
use kube::runtime::watcher;
use kube::Api;
use tracing::{debug, info, warn};

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::crd::CdkTsStack;
use crate::runtime::error_policy::handle_reconciliation_error;

/// Run the controller until shutdown.
///
/// Reconcile failures are tolerated without poisoning the queue: the error
/// policy decides requeue vs. drop, and the stream keeps flowing.
pub async fn run_watch_loop(stacks: Api<CdkTsStack>, reconciler: Arc<Reconciler>) -> Result<()> {
    let concurrency = reconciler.config.max_concurrent_reconciles;
    let mut shutdown = reconciler.shutdown.clone();

    Controller::new(stacks, watcher::Config::default())
        .with_config(Config::default().concurrency(concurrency as u16))
        .graceful_shutdown_on(async move {
            let _ = shutdown.changed().await;
            info!("Shutdown signal received, draining in-flight reconciles");
        })
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _action)) => {
                    debug!("Reconciled {}/{}", object.namespace.as_deref().unwrap_or("default"), object.name);
                }
                Err(e) => {
                    // Watch-stream and queue errors are transient; the
                    // controller restarts the watch internally.
                    warn!("Controller stream error: {}", e);
                }
            }
        })
        .await;

    info!("Watch loop stopped");
    Ok(())
}
