//! # Initialization
//!
//! Controller startup: rustls setup, tracing subscriber, metrics sink,
//! workspace hygiene, Kubernetes client, reconciler context, and the
//! startup resource summary.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use kube::api::ListParams;
use kube::{Api, Client};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::reconciler::Reconciler;
use crate::controller::workspace;
use crate::crd::CdkTsStack;
use crate::observability::metrics;

/// Everything `main` needs to run the controller.
pub struct InitializationResult {
    /// Kubernetes client.
    pub client: Client,
    /// Cluster-wide API for CdkTsStack resources.
    pub stacks: Api<CdkTsStack>,
    /// Shared reconciler context.
    pub reconciler: Arc<Reconciler>,
    /// Flipping this to true cancels in-flight work and stops the loops.
    pub shutdown_tx: watch::Sender<bool>,
}

/// Initialize the controller runtime.
pub async fn initialize() -> Result<InitializationResult> {
    // Configure the rustls crypto provider before anything opens a TLS
    // connection. Required for rustls 0.23+ when no default provider is
    // selected via features.
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = ControllerConfig::from_env();

    let default_filter = if config.debug_mode {
        "cdkstack_controller=debug"
    } else {
        "cdkstack_controller=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    info!("Starting CdkTsStack controller");
    info!(
        "Sweeper schedules: drift={:?}, git-sync={:?}",
        config.drift_check_cron, config.git_sync_check_cron
    );

    metrics::init_sink(&config.metrics_path, &config.metrics_prefix)
        .context("Failed to initialize metrics sink")?;

    // Workspaces are disposable; reclaim anything a previous run left
    // behind before new reconciles start carving out directories.
    workspace::cleanup_stale().await;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    // Watch all namespaces so teams can place resources wherever they like.
    let stacks: Api<CdkTsStack> = Api::all(client.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = Arc::new(Reconciler::new(client.clone(), config, shutdown_rx));

    log_startup_summary(&stacks).await;

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        stacks,
        reconciler,
        shutdown_tx,
    })
}

/// List existing resources and log a per-namespace summary. No reconcile
/// is forced here: the controller's initial list delivers the events.
async fn log_startup_summary(stacks: &Api<CdkTsStack>) {
    match stacks.list(&ListParams::default()).await {
        Ok(list) => {
            info!(
                "CRD is queryable, found {} existing CdkTsStack resources",
                list.items.len()
            );
            if list.items.is_empty() {
                return;
            }

            let mut by_namespace: HashMap<String, Vec<String>> = HashMap::new();
            for item in &list.items {
                by_namespace
                    .entry(item.namespace_or_default().to_string())
                    .or_default()
                    .push(item.name_or_unknown().to_string());
            }

            let mut namespaces: Vec<_> = by_namespace.keys().cloned().collect();
            namespaces.sort();
            for namespace in namespaces {
                let mut names = by_namespace.remove(&namespace).unwrap_or_default();
                names.sort();
                info!(
                    "Namespace {}: {} resource(s): {}",
                    namespace,
                    names.len(),
                    names.join(", ")
                );
            }
        }
        Err(e) => {
            error!("CRD is not queryable: {:?}. Is the CRD installed?", e);
            warn!("Continuing despite CRD queryability check failure - the watch will retry");
        }
    }
}
