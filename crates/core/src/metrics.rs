//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job lifecycle (starts, outcomes, durations)
//! - Extraction attempts
//! - Adaptive throttling

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Job Metrics
// =============================================================================

/// Jobs claimed by a runner.
pub static JOBS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("quarry_jobs_started_total", "Total jobs started").unwrap()
});

/// Jobs finished by outcome.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("quarry_jobs_finished_total", "Total jobs finished"),
        &["outcome"], // "success", "failed", "cancelled"
    )
    .unwrap()
});

/// Job duration in seconds, from claim to completion.
pub static JOB_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("quarry_job_duration_seconds", "Duration of jobs").buckets(vec![
            1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0,
        ]),
        &["outcome"],
    )
    .unwrap()
});

// =============================================================================
// Extraction Metrics
// =============================================================================

/// Extraction attempts by result.
pub static EXTRACT_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "quarry_extract_attempts_total",
            "Total extraction attempts",
        ),
        &["result"], // "success", or an error kind such as "timeout"
    )
    .unwrap()
});

// =============================================================================
// Throttle Metrics
// =============================================================================

/// Times the controller lowered its throttle after a failure.
pub static THROTTLE_BACKOFFS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "quarry_throttle_backoffs_total",
        "Total throttle reductions after failed jobs",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(JOBS_STARTED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOB_DURATION.clone()),
        Box::new(EXTRACT_ATTEMPTS.clone()),
        Box::new(THROTTLE_BACKOFFS.clone()),
    ]
}
