//! # Observability
//!
//! Metric record emission for the controller. Prometheus exposition is owned
//! by the host; the controller only emits line-JSON records.

pub mod metrics;
