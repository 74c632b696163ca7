//! Application metrics for Prometheus monitoring.
//!
//! The broker records its own counters through the `metrics` facade; this
//! module installs the Prometheus recorder, describes the metric names and
//! renders them for the `/metrics` endpoint.

use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Call once at startup, before any metrics are recorded.
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("jobs_started_total", "Jobs created by start requests");
    describe_counter!(
        "events_published_total",
        "Job events recorded, labelled by event type"
    );
    describe_counter!(
        "jobs_expired_total",
        "Finished jobs removed by the retention reaper"
    );
    describe_counter!(
        "subscriber_cleanups_total",
        "Subscribers dropped after a failed delivery or a full outbound backlog"
    );
    describe_gauge!("live_jobs", "Jobs currently held by the broker");
    describe_gauge!("running_jobs", "Jobs that have not reached a terminal event");
    describe_gauge!("ws_connections", "Open WebSocket connections");
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Track a WebSocket connection opening (`true`) or closing (`false`).
pub fn record_ws_connection(open: bool) {
    let connections = gauge!("ws_connections");
    if open {
        connections.increment(1.0);
    } else {
        connections.decrement(1.0);
    }
}
