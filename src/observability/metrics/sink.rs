//! # Metric Record Sink
//!
//! Appends line-delimited JSON metric records to a host-designated path.
//!
//! Record shapes:
//! - counter add:  `{"name":..,"action":"add","value":..,"labels":{..}}`
//! - gauge set:    `{"name":..,"action":"set","value":..,"labels":{..},"group":..}`
//! - group expire: `{"group":..,"action":"expire"}`
//!
//! The sink is the only process-wide mutable shared state in the controller;
//! writes are serialized through a mutex so concurrent reconciles and
//! sweepers never interleave partial lines.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

/// Label set attached to every counter and gauge record.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricLabels {
    pub namespace: String,
    pub resource_name: String,
    pub aws_region: String,
    pub stack_name: String,
}

/// A single metric record, serialized as one JSON line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum MetricRecord {
    Counter {
        name: String,
        action: &'static str,
        value: u64,
        labels: MetricLabels,
    },
    Gauge {
        name: String,
        action: &'static str,
        value: i64,
        labels: MetricLabels,
        group: String,
    },
    Expire {
        group: String,
        action: &'static str,
    },
}

impl MetricRecord {
    pub fn counter_add(name: String, value: u64, labels: MetricLabels) -> Self {
        MetricRecord::Counter {
            name,
            action: "add",
            value,
            labels,
        }
    }

    pub fn gauge_set(name: String, value: i64, labels: MetricLabels, group: String) -> Self {
        MetricRecord::Gauge {
            name,
            action: "set",
            value,
            labels,
            group,
        }
    }

    pub fn expire(group: String) -> Self {
        MetricRecord::Expire {
            group,
            action: "expire",
        }
    }
}

/// Append-only sink for metric records.
pub struct MetricsSink {
    writer: Mutex<File>,
    prefix: String,
}

impl MetricsSink {
    /// Open (creating parent directories as needed) the record file in
    /// append mode.
    pub fn open(path: &Path, prefix: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create metrics directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open metrics path {}", path.display()))?;
        Ok(MetricsSink {
            writer: Mutex::new(file),
            prefix: prefix.to_string(),
        })
    }

    /// Build a full metric name from the configured prefix.
    pub fn metric_name(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Serialize and append one record. A failed write is logged and
    /// swallowed: metrics must never fail an operation.
    pub fn emit(&self, record: &MetricRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize metric record: {}", e);
                return;
            }
        };
        match self.writer.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    warn!("Failed to append metric record: {}", e);
                }
            }
            Err(e) => warn!("Metrics sink mutex poisoned: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> MetricLabels {
        MetricLabels {
            namespace: "platform".to_string(),
            resource_name: "billing".to_string(),
            aws_region: "us-east-1".to_string(),
            stack_name: "BillingStack".to_string(),
        }
    }

    #[test]
    fn test_counter_record_shape() {
        let record =
            MetricRecord::counter_add("cdktsstack_drift_checks_total".to_string(), 1, labels());
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(json["action"], "add");
        assert_eq!(json["value"], 1);
        assert_eq!(json["labels"]["namespace"], "platform");
        assert_eq!(json["labels"]["stack_name"], "BillingStack");
        assert!(json.get("group").is_none());
    }

    #[test]
    fn test_gauge_record_shape() {
        let record = MetricRecord::gauge_set(
            "cdktsstack_drift_status".to_string(),
            1,
            labels(),
            "drift-status".to_string(),
        );
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(json["action"], "set");
        assert_eq!(json["group"], "drift-status");
        assert_eq!(json["labels"]["aws_region"], "us-east-1");
    }

    #[test]
    fn test_expire_record_shape() {
        let record = MetricRecord::expire("git-sync-status".to_string());
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();
        assert_eq!(json["action"], "expire");
        assert_eq!(json["group"], "git-sync-status");
        assert!(json.get("name").is_none());
    }

    #[test]
    fn test_sink_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let sink = MetricsSink::open(&path, "cdktsstack").unwrap();

        sink.emit(&MetricRecord::expire("drift-status".to_string()));
        sink.emit(&MetricRecord::counter_add(
            sink.metric_name("drift_checks_total"),
            1,
            labels(),
        ));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], "expire");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["name"], "cdktsstack_drift_checks_total");
    }

    #[test]
    fn test_metric_name_uses_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let sink = MetricsSink::open(&dir.path().join("m.jsonl"), "custom").unwrap();
        assert_eq!(sink.metric_name("drift_status"), "custom_drift_status");
    }
}
