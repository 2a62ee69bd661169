// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for incident-store.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host service is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `incident_store_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `backend`: redacted target URL (`scheme://host/path`, no credentials)
//! - `operation`: create, update, delete, read, by_date, subscribe, ...
//! - `action`: replay action kind
//! - `status`: success, error (replays also `dropped`)

use metrics::{counter, histogram};
use std::time::{Duration, Instant};

/// Record the outcome of one operation against one backend
pub fn record_operation(backend: &str, operation: &str, status: &str) {
    counter!(
        "incident_store_operations_total",
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record end-to-end latency of a coordinator operation
pub fn record_latency(operation: &str, duration: Duration) {
    histogram!(
        "incident_store_operation_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a retried attempt (one per sleep, not per call)
pub fn record_retry(operation: &str) {
    counter!(
        "incident_store_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a failed write queued for replay
pub fn record_replay_queued(backend: &str, action: &str) {
    counter!(
        "incident_store_replay_queued_total",
        "backend" => backend.to_string(),
        "action" => action.to_string()
    )
    .increment(1);
}

/// Record a replay attempt outcome
pub fn record_replay(backend: &str, action: &str, status: &str) {
    counter!(
        "incident_store_replays_total",
        "backend" => backend.to_string(),
        "action" => action.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record tombstoned records dropped by a clean sweep
pub fn record_cleaned(count: usize) {
    counter!("incident_store_replay_cleaned_total").increment(count as u64);
}

/// RAII timer that records latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use metrics_util::debugging::{DebugValue, Snapshotter};

    /// One captured metric: name, labels in emission order, value.
    pub(crate) type Captured = (String, Vec<(String, String)>, DebugValue);

    pub(crate) fn capture(snapshotter: &Snapshotter) -> Vec<Captured> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(composite, _, _, value)| {
                let key = composite.key();
                let labels = key
                    .labels()
                    .map(|l| (l.key().to_string(), l.value().to_string()))
                    .collect();
                (key.name().to_string(), labels, value)
            })
            .collect()
    }

    /// Value of the counter with exactly these labels, if it was emitted.
    pub(crate) fn counter(captured: &[Captured], name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        captured.iter().find_map(|(n, l, value)| {
            let same_labels = l.len() == labels.len()
                && l.iter().zip(labels).all(|((k, v), (ek, ev))| k == ek && v == ev);
            match value {
                DebugValue::Counter(count) if n == name && same_labels => Some(*count),
                _ => None,
            }
        })
    }
}
