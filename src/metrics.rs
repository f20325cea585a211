// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the Steward controllers.
//!
//! This module provides metrics collection with the namespace prefix
//! `steward_sap_com_` (prometheus-safe version of "steward.sap.com").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - reconcile counts and durations per kind
//! - **Pipeline Run Metrics** - state transitions and terminal results
//! - **Error Metrics** - error conditions by category
//! - **Heartbeat Metrics** - controller liveness signal
//!
//! # Example
//!
//! ```rust,no_run
//! use steward::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("PipelineRun", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

/// Namespace prefix for all Steward metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "steward_sap_com";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via the
/// `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total number of reconciliations by resource kind and status
///
/// Labels:
/// - `kind`: Kind of resource (`Tenant`, `PipelineRun`)
/// - `status`: Outcome (`success`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource kind and status",
    );
    let counter = CounterVec::new(opts, &["kind", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Labels:
/// - `kind`: Kind of resource (`Tenant`, `PipelineRun`)
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource kind",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of pipeline run state transitions
///
/// Labels:
/// - `from`: State the run left
/// - `to`: State the run entered
pub static STATE_TRANSITIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_pipelinerun_state_transitions_total"),
        "Total number of pipeline run state transitions",
    );
    let counter = CounterVec::new(opts, &["from", "to"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of pipeline run terminal results
///
/// Labels:
/// - `result`: Terminal classification (`success`, `aborted`, `error_content`,
///   `error_config`, `error_infra`)
pub static RESULTS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_pipelinerun_results_total"),
        "Total number of pipeline run terminal results",
    );
    let counter = CounterVec::new(opts, &["result"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of errors by resource kind and error category
///
/// Labels:
/// - `kind`: Kind of resource
/// - `error_type`: Category of error (`api_error`, `config_error`, `panic`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by resource kind and error category",
    );
    let counter = CounterVec::new(opts, &["kind", "error_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Unix timestamp of the most recent heartbeat
pub static HEARTBEAT_TIMESTAMP_SECONDS: LazyLock<Gauge> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_heartbeat_timestamp_seconds"),
        "Unix timestamp of the most recent controller heartbeat",
    );
    let gauge = Gauge::with_opts(opts).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Total number of heartbeats that arrived later than twice the interval
pub static HEARTBEATS_MISSED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_heartbeats_missed_total"),
        "Total number of heartbeats that arrived later than twice the configured interval",
    );
    let counter = CounterVec::new(opts, &["controller"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(kind: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[kind, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(kind: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[kind, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[kind])
        .observe(duration.as_secs_f64());
}

/// Record a pipeline run state transition
pub fn record_state_transition(from: &str, to: &str) {
    STATE_TRANSITIONS_TOTAL
        .with_label_values(&[from, to])
        .inc();
}

/// Record a pipeline run terminal result
pub fn record_result(result: &str) {
    RESULTS_TOTAL.with_label_values(&[result]).inc();
}

/// Record an error
pub fn record_error(kind: &str, error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[kind, error_type]).inc();
}

/// Record a heartbeat at the current time
pub fn record_heartbeat(epoch_seconds: f64) {
    HEARTBEAT_TIMESTAMP_SECONDS.set(epoch_seconds);
}

/// Record a heartbeat that missed its deadline
pub fn record_missed_heartbeat(controller: &str) {
    HEARTBEATS_MISSED_TOTAL
        .with_label_values(&[controller])
        .inc();
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
///
/// Returns an error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation_success() {
        record_reconciliation_success("TestKind", Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&["TestKind", "success"]);
        assert!(counter.get() > 0.0);

        let histogram = RECONCILIATION_DURATION_SECONDS.with_label_values(&["TestKind"]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_state_transition_and_result() {
        record_state_transition("running", "cleaning");
        record_result("success");

        assert!(
            STATE_TRANSITIONS_TOTAL
                .with_label_values(&["running", "cleaning"])
                .get()
                > 0.0
        );
        assert!(RESULTS_TOTAL.with_label_values(&["success"]).get() > 0.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_success("GatherTest", Duration::from_millis(100));

        let metrics_text = gather_metrics().unwrap();
        assert!(
            metrics_text.contains("steward_sap_com"),
            "Metrics should contain namespace prefix"
        );
        assert!(
            metrics_text.contains("reconciliations_total"),
            "Metrics should contain reconciliation counter"
        );
    }
}
