//! Metrics definitions for the Ledger Bridge.
//!
//! All metrics follow Prometheus naming conventions:
//! - `bridge_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `operation`: 3 ledger write kinds, 6 broker operations
//! - `status`: success plus a handful of error classes
//! - `kind`: 5 ledger event kinds
//! - `outcome`: handled, ignored, failed

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Transaction buckets are
/// wide because confirmation waits on ledger block times.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("bridge_transaction".to_string()),
            &[
                0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0, 60.0, 120.0, 300.0,
            ],
        )
        .map_err(|e| format!("Failed to set transaction buckets: {e}"))?
        // Broker calls are external HTTPS round trips
        .set_buckets_for_metric(
            Matcher::Prefix("bridge_broker".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set broker request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Coordinator Metrics
// ============================================================================

/// Record a completed coordinated ledger write.
///
/// Metrics: `bridge_transactions_total` (labels: `operation`, `status`),
/// `bridge_transaction_duration_seconds` (labels: `operation`)
///
/// Duration runs from enqueue to outcome delivery, so it includes queueing.
pub fn record_transaction(operation: &str, status: &str, duration: Duration) {
    counter!("bridge_transactions_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!("bridge_transaction_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Set the number of queued writes not yet dequeued.
///
/// Metric: `bridge_queue_depth`
pub fn set_queue_depth(depth: usize) {
    // usize to f64 conversion is safe for realistic queue depths
    #[allow(clippy::cast_precision_loss)]
    gauge!("bridge_queue_depth").set(depth as f64);
}

// ============================================================================
// Broker Metrics
// ============================================================================

/// Record a session broker request.
///
/// Metrics: `bridge_broker_requests_total` (labels: `operation`, `status`),
/// `bridge_broker_request_duration_seconds` (labels: `operation`)
pub fn record_broker_request(operation: &str, status: &str, duration: Duration) {
    counter!("bridge_broker_requests_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!("bridge_broker_request_duration_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

// ============================================================================
// Event Metrics
// ============================================================================

/// Record a processed ledger event.
///
/// Metric: `bridge_events_total`
/// Labels: `kind`, `outcome` (handled, ignored, failed)
pub fn record_event(kind: &str, outcome: &str) {
    counter!("bridge_events_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}
