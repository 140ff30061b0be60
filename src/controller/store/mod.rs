//! # Resource Store Gateway
//!
//! All reads and writes of CdkTsStack objects, their status subresource,
//! their finalizer list, and auxiliary Kubernetes events go through this
//! gateway. It encapsulates optimistic-concurrency retry and tolerance for
//! "resource no longer exists" so races with deletion are never fatal to a
//! reconcile.

use chrono::Utc;
use k8s_openapi::api::core::v1::{Event, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants;
use crate::crd::{CdkTsStack, Phase};

/// Kubernetes event type for normal operation milestones.
pub const EVENT_TYPE_NORMAL: &str = "Normal";
/// Kubernetes event type for failures and hazards.
pub const EVENT_TYPE_WARNING: &str = "Warning";

const GET_RETRIES: u32 = 3;
const GET_RETRY_BACKOFF_SECS: u64 = 1;

/// Gateway-level error. Transient infrastructure failures bubble out here
/// and are retried by the queue, never surfaced as a `Failed` phase.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// One status patch: phase and message are always re-asserted, optional
/// extras record deploy/drift bookkeeping.
#[derive(Debug, Clone)]
pub struct StatusUpdate<'a> {
    phase: Phase,
    message: &'a str,
    record_deploy: bool,
    drift_detected: Option<bool>,
    record_drift_check: bool,
}

impl<'a> StatusUpdate<'a> {
    pub fn new(phase: Phase, message: &'a str) -> Self {
        StatusUpdate {
            phase,
            message,
            record_deploy: false,
            drift_detected: None,
            record_drift_check: false,
        }
    }

    /// Stamp `lastDeploy`. Used exactly when a transition into `Succeeded`
    /// follows a successful deploy.
    pub fn with_deploy_timestamp(mut self) -> Self {
        self.record_deploy = true;
        self
    }

    /// Record the outcome of a drift check: `driftDetected` plus a fresh
    /// `lastDriftCheck` timestamp.
    pub fn with_drift_result(mut self, drift_detected: bool) -> Self {
        self.drift_detected = Some(drift_detected);
        self.record_drift_check = true;
        self
    }
}

/// Gateway over the Kubernetes API for CdkTsStack resources.
#[derive(Clone)]
pub struct ResourceStore {
    client: Client,
}

impl ResourceStore {
    pub fn new(client: Client) -> Self {
        ResourceStore { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api(&self, namespace: &str) -> Api<CdkTsStack> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Get an object. `Ok(None)` means it no longer exists. Transient
    /// errors are retried a few times with a short backoff before giving
    /// up to the queue.
    pub async fn get(&self, namespace: &str, name: &str) -> Result<Option<CdkTsStack>, StoreError> {
        let api = self.api(namespace);
        let mut attempt = 0;
        loop {
            match api.get(name).await {
                Ok(obj) => return Ok(Some(obj)),
                Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(None),
                Err(e) => {
                    attempt += 1;
                    if attempt >= GET_RETRIES {
                        return Err(e.into());
                    }
                    warn!(
                        "Transient error reading {}/{} (attempt {}/{}): {}",
                        namespace, name, attempt, GET_RETRIES, e
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(GET_RETRY_BACKOFF_SECS))
                        .await;
                }
            }
        }
    }

    /// List all CdkTsStack objects across namespaces. Used by the sweepers.
    pub async fn list_all(&self) -> Result<Vec<CdkTsStack>, StoreError> {
        let api: Api<CdkTsStack> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    /// Merge-patch the status subresource.
    ///
    /// Tolerates `NotFound` (logs and returns success) so a race with
    /// deletion does not fail the caller. Retries once on a 409 conflict.
    pub async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        update: StatusUpdate<'_>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut status = serde_json::json!({
            "phase": update.phase.as_str(),
            "message": update.message,
        });
        if update.record_deploy {
            status["lastDeploy"] = serde_json::Value::String(now.clone());
        }
        if let Some(drift) = update.drift_detected {
            status["driftDetected"] = serde_json::Value::Bool(drift);
        }
        if update.record_drift_check {
            status["lastDriftCheck"] = serde_json::Value::String(now);
        }
        let patch = serde_json::json!({ "status": status });

        debug!(
            "Patching status of {}/{} to phase={:?} message={:?}",
            namespace, name, update.phase.as_str(), update.message
        );

        let api = self.api(namespace);
        let params = PatchParams::apply(constants::CONTROLLER_NAME);
        for attempt in 0..2 {
            match api
                .patch_status(name, &params, &Patch::Merge(&patch))
                .await
            {
                Ok(_) => return Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    info!(
                        "Status patch target {}/{} no longer exists, skipping",
                        namespace, name
                    );
                    return Ok(());
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 && attempt == 0 => {
                    warn!(
                        "Conflict patching status of {}/{}, retrying once",
                        namespace, name
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Add the controller finalizer if absent. Returns whether it was newly
    /// added. The caller-supplied object is only a hint; the current
    /// finalizer list is re-read before patching.
    pub async fn add_finalizer(&self, namespace: &str, name: &str) -> Result<bool, StoreError> {
        for attempt in 0..2 {
            let Some(current) = self.get(namespace, name).await? else {
                return Ok(false);
            };
            if current.has_finalizer() {
                return Ok(false);
            }
            let mut finalizers = current.metadata.finalizers.clone().unwrap_or_default();
            finalizers.push(constants::FINALIZER.to_string());
            match self.patch_finalizers(namespace, name, finalizers).await {
                Ok(()) => {
                    info!("Added finalizer to {}/{}", namespace, name);
                    return Ok(true);
                }
                Err(StoreError::Kube(kube::Error::Api(ae))) if ae.code == 409 && attempt == 0 => {
                    warn!(
                        "Conflict adding finalizer to {}/{}, re-reading and retrying",
                        namespace, name
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Remove the controller finalizer. Idempotent and tolerant of
    /// `NotFound`.
    pub async fn remove_finalizer(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        for attempt in 0..2 {
            let Some(current) = self.get(namespace, name).await? else {
                return Ok(());
            };
            if !current.has_finalizer() {
                return Ok(());
            }
            let finalizers: Vec<String> = current
                .metadata
                .finalizers
                .unwrap_or_default()
                .into_iter()
                .filter(|f| f != constants::FINALIZER)
                .collect();
            match self.patch_finalizers(namespace, name, finalizers).await {
                Ok(()) => {
                    info!("Removed finalizer from {}/{}", namespace, name);
                    return Ok(());
                }
                Err(StoreError::Kube(kube::Error::Api(ae))) if ae.code == 404 => return Ok(()),
                Err(StoreError::Kube(kube::Error::Api(ae))) if ae.code == 409 && attempt == 0 => {
                    warn!(
                        "Conflict removing finalizer from {}/{}, re-reading and retrying",
                        namespace, name
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        namespace: &str,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), StoreError> {
        let patch = serde_json::json!({
            "metadata": { "finalizers": finalizers }
        });
        self.api(namespace)
            .patch(
                name,
                &PatchParams::apply(constants::CONTROLLER_NAME),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    /// Create a Kubernetes `Event` owned by the resource's UID. Failures
    /// are logged and swallowed: eventing must never fail an operation.
    pub async fn emit_event(
        &self,
        stack: &CdkTsStack,
        event_type: &str,
        reason: &str,
        message: &str,
    ) {
        let namespace = stack.namespace_or_default();
        let name = stack.name_or_unknown();
        let now = Utc::now();
        let event_name = format!(
            "{}.{:x}",
            name,
            now.timestamp_nanos_opt().unwrap_or_default()
        );

        let event = Event {
            metadata: ObjectMeta {
                name: Some(event_name),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(format!(
                    "{}/{}",
                    constants::API_GROUP,
                    constants::API_VERSION
                )),
                kind: Some("CdkTsStack".to_string()),
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: stack.metadata.uid.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(event_type.to_string()),
            count: Some(1),
            first_timestamp: Some(Time(now)),
            last_timestamp: Some(Time(now)),
            source: Some(EventSource {
                component: Some(constants::CONTROLLER_NAME.to_string()),
                host: None,
            }),
            ..Default::default()
        };

        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        if let Err(e) = api.create(&PostParams::default(), &event).await {
            warn!(
                "Failed to emit event {} for {}/{}: {}",
                reason, namespace, name, e
            );
        } else {
            debug!("Emitted event {} for {}/{}: {}", reason, namespace, name, message);
        }
    }
}
