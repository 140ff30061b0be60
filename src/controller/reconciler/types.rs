//! # Reconciler Context and Errors
//!
//! Shared context handed to every reconcile, sweep, and destroy invocation.

use std::collections::HashMap;
use std::sync::Mutex;

use kube::Client;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;

use crate::config::ControllerConfig;
use crate::controller::aws::CredentialsError;
use crate::controller::store::{ResourceStore, StoreError};

/// Controller-level reconcile error. Everything surfacing here is treated
/// as transient by the error policy; configuration errors are converted to
/// a `Failed` phase before they can reach it.
#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Process error: {0}")]
    Process(anyhow::Error),
}

impl From<anyhow::Error> for ReconcilerError {
    fn from(err: anyhow::Error) -> Self {
        ReconcilerError::Process(err)
    }
}

/// Shared reconciler context.
pub struct Reconciler {
    pub client: Client,
    pub store: ResourceStore,
    pub config: ControllerConfig,
    /// Flips to true on controller shutdown; in-flight subprocesses watch it.
    pub shutdown: watch::Receiver<bool>,
    /// Consecutive-error counts per resource key, driving the retry budget.
    pub retry_counts: Mutex<HashMap<String, u32>>,
}

impl Reconciler {
    pub fn new(client: Client, config: ControllerConfig, shutdown: watch::Receiver<bool>) -> Self {
        let store = ResourceStore::new(client.clone());
        Reconciler {
            client,
            store,
            config,
            shutdown,
            retry_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Record one more consecutive error for a resource key and return the
    /// new count.
    pub fn record_error(&self, key: &str) -> u32 {
        match self.retry_counts.lock() {
            Ok(mut counts) => {
                let count = counts.entry(key.to_string()).or_insert(0);
                *count += 1;
                *count
            }
            Err(e) => {
                warn!("Failed to lock retry counts: {}", e);
                1
            }
        }
    }

    /// Reset the error count for a resource key after a clean reconcile.
    pub fn clear_errors(&self, key: &str) {
        if let Ok(mut counts) = self.retry_counts.lock() {
            counts.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_counts_accumulate_and_clear() {
        let counts: Mutex<HashMap<String, u32>> = Mutex::new(HashMap::new());
        // Exercise the same logic record_error/clear_errors use, without a
        // live Kubernetes client.
        {
            let mut map = counts.lock().unwrap();
            *map.entry("ns/name".to_string()).or_insert(0) += 1;
            *map.entry("ns/name".to_string()).or_insert(0) += 1;
        }
        assert_eq!(counts.lock().unwrap().get("ns/name"), Some(&2));
        counts.lock().unwrap().remove("ns/name");
        assert!(counts.lock().unwrap().get("ns/name").is_none());
    }
}
