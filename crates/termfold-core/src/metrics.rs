//! Prometheus metrics helpers for termfold.
//!
//! # Usage
//!
//! ```rust,ignore
//! use termfold_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("termfold_records_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `termfold_`
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only `outcome` on batch counters

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if a recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Serve `/metrics` on `port` from a background task.
///
/// The listener is bound before returning so that port conflicts surface as
/// an error here rather than inside the task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

fn register_metrics() {
    // =========================================================================
    // Streaming / Aggregation
    // =========================================================================

    describe_counter!(
        "termfold_records_total",
        "Records emitted by the stream parser"
    );
    describe_counter!(
        "termfold_records_dropped_total",
        "Array objects dropped for missing a search term"
    );
    describe_gauge!("termfold_keys", "Distinct aggregation keys currently held");
    describe_gauge!(
        "termfold_records_per_second",
        "Current streaming rate (records/sec)"
    );
    describe_counter!(
        "termfold_checkpoints_saved_total",
        "Checkpoints written to disk"
    );
    describe_gauge!(
        "termfold_running",
        "Whether a run is in progress (1=yes, 0=no)"
    );

    // =========================================================================
    // Upload
    // =========================================================================

    describe_counter!(
        "termfold_batches_total",
        "Batches handed to the sink (label: outcome)"
    );
    describe_counter!(
        "termfold_rows_delivered_total",
        "Rows accepted by the destination"
    );
    describe_counter!(
        "termfold_rows_rejected_total",
        "Rows rejected individually by the sink"
    );
    describe_counter!(
        "termfold_rows_spilled_total",
        "Rows written to spillover files after a transport failure"
    );
    describe_histogram!(
        "termfold_upload_duration_seconds",
        "Time spent sending one batch"
    );
    describe_gauge!(
        "termfold_upload_queue_depth",
        "Batches waiting for the upload worker"
    );
}

// =============================================================================
// Metric Recording Helpers
// =============================================================================

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Increment a counter labelled with a batch outcome.
#[inline]
pub fn increment_outcome(name: &'static str, outcome: &'static str) {
    metrics::counter!(name, "outcome" => outcome).increment(1);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_helpers_do_not_panic() {
        ensure_metrics_init();
        increment("termfold_records_total", 0);
        increment("termfold_records_total", 10);
        increment_outcome("termfold_batches_total", "delivered");
        set_gauge("termfold_keys", 42.0);
        set_gauge("termfold_keys", 0.0);
    }

    #[test]
    fn test_register_metrics_twice() {
        ensure_metrics_init();
        register_metrics();
        register_metrics();
    }
}
