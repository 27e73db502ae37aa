//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the Quarry server:
//! - HTTP request metrics (latency, counts, in flight)
//! - Queue gauges, refreshed from the orchestrator on every scrape
//! - The orchestrator's own job metrics, registered from the core crate

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "quarry_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("quarry_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "quarry_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Queue Metrics (collected dynamically)
// =============================================================================

/// Jobs waiting to start.
pub static JOBS_PENDING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("quarry_jobs_pending", "Number of jobs waiting to start").unwrap()
});

/// Jobs currently running.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("quarry_jobs_active", "Number of jobs currently running").unwrap()
});

/// Currently allowed concurrency.
pub static EFFECTIVE_CONCURRENCY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "quarry_effective_concurrency",
        "Number of jobs currently allowed to run at once",
    )
    .unwrap()
});

/// Accumulated size of stored results.
pub static STORED_BYTES: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "quarry_stored_result_bytes",
        "Accumulated size of stored results in bytes",
    )
    .unwrap()
});

static UUID_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static ARCHIVE_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/archives/[^/]+").unwrap());
static NUMERIC_SEGMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Queue
    registry.register(Box::new(JOBS_PENDING.clone())).unwrap();
    registry.register(Box::new(JOBS_ACTIVE.clone())).unwrap();
    registry
        .register(Box::new(EFFECTIVE_CONCURRENCY.clone()))
        .unwrap();
    registry.register(Box::new(STORED_BYTES.clone())).unwrap();

    // Core metrics (jobs, extraction attempts, throttling)
    for metric in quarry_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

/// Refresh the queue gauges from the orchestrator.
///
/// Called before encoding so a scrape always sees current values.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    match state.orchestrator().status().await {
        Ok(status) => {
            JOBS_PENDING.set(status.pending_count as i64);
            JOBS_ACTIVE.set(status.active_count as i64);
            EFFECTIVE_CONCURRENCY.set(status.effective_ceiling as i64);
            STORED_BYTES.set(status.stored_bytes as i64);
        }
        Err(e) => warn!("Failed to collect orchestrator metrics: {}", e),
    }
}

/// Normalize a path for metric labels (replace ids and archive keys with placeholders).
pub fn normalize_path(path: &str) -> String {
    let result = UUID_SEGMENT.replace_all(path, "{id}");
    let result = ARCHIVE_SEGMENT.replace_all(&result, "/archives/{key}");
    let result = NUMERIC_SEGMENT.replace_all(&result, "/{id}$1");
    result.to_string()
}
