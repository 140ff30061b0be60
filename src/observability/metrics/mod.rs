//! # Metrics
//!
//! Public metric emission API. All functions are fire-and-forget: before the
//! sink is initialized, or if a write fails, records are dropped with a
//! warning and the surrounding operation proceeds.
//!
//! Counters: `{prefix}_drift_checks_total`, `{prefix}_drifts_detected_total`,
//! `{prefix}_git_changes_detected_total`.
//! Gauges: `{prefix}_drift_status` (group `drift-status`),
//! `{prefix}_git_sync_pending` (group `git-sync-status`). Gauge groups are
//! expired at the start of each sweep so labels of deleted resources
//! disappear.

mod sink;

use std::path::Path;
use std::sync::OnceLock;

use anyhow::Result;
use tracing::warn;

use crate::crd::CdkTsStack;

pub use sink::{MetricLabels, MetricRecord, MetricsSink};

static SINK: OnceLock<MetricsSink> = OnceLock::new();

/// Initialize the global metrics sink. Called once during controller
/// initialization, before any reconcile can run.
pub fn init_sink(path: &Path, prefix: &str) -> Result<()> {
    let sink = MetricsSink::open(path, prefix)?;
    if SINK.set(sink).is_err() {
        warn!("Metrics sink already initialized, keeping the existing one");
    }
    Ok(())
}

fn with_sink(f: impl FnOnce(&MetricsSink)) {
    match SINK.get() {
        Some(sink) => f(sink),
        None => warn!("Metrics sink not initialized, dropping record"),
    }
}

/// Label set for a resource's records.
pub fn labels_for(stack: &CdkTsStack, region: &str) -> MetricLabels {
    MetricLabels {
        namespace: stack.namespace_or_default().to_string(),
        resource_name: stack.name_or_unknown().to_string(),
        aws_region: region.to_string(),
        stack_name: stack.spec.stack_name.clone(),
    }
}

pub fn increment_drift_checks_total(labels: MetricLabels) {
    with_sink(|s| {
        s.emit(&MetricRecord::counter_add(
            s.metric_name("drift_checks_total"),
            1,
            labels,
        ));
    });
}

pub fn increment_drifts_detected_total(labels: MetricLabels) {
    with_sink(|s| {
        s.emit(&MetricRecord::counter_add(
            s.metric_name("drifts_detected_total"),
            1,
            labels,
        ));
    });
}

pub fn increment_git_changes_detected_total(labels: MetricLabels) {
    with_sink(|s| {
        s.emit(&MetricRecord::counter_add(
            s.metric_name("git_changes_detected_total"),
            1,
            labels,
        ));
    });
}

/// Set the per-resource drift gauge (1 = drifted, 0 = clean).
pub fn set_drift_status(labels: MetricLabels, drifted: bool) {
    with_sink(|s| {
        s.emit(&MetricRecord::gauge_set(
            s.metric_name("drift_status"),
            i64::from(drifted),
            labels,
            crate::constants::DRIFT_STATUS_GROUP.to_string(),
        ));
    });
}

/// Set the per-resource Git-sync gauge (1 = changes pending, 0 = in sync).
pub fn set_git_sync_pending(labels: MetricLabels, pending: bool) {
    with_sink(|s| {
        s.emit(&MetricRecord::gauge_set(
            s.metric_name("git_sync_pending"),
            i64::from(pending),
            labels,
            crate::constants::GIT_SYNC_STATUS_GROUP.to_string(),
        ));
    });
}

/// Expire all gauges in a group. Emitted at the start of a sweep so gauge
/// labels for deleted resources disappear after at most one cycle.
pub fn expire_group(group: &str) {
    with_sink(|s| {
        s.emit(&MetricRecord::expire(group.to_string()));
    });
}
