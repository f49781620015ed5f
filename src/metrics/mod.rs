//! Prometheus metrics for the harvester
//!
//! This module provides metrics tracking for:
//! - Runs: outcomes by trigger, duration, in-progress flag
//! - Harvest: page outcomes and records per ordering dimension
//! - Auth: credential exchange outcomes
//! - Control surface: request counts and latency
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Encoder, Gauge,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for run and harvest metrics
struct HarvestMetrics {
    runs: CounterVec,
    run_duration: HistogramVec,
    run_in_progress: Gauge,
    pages: CounterVec,
    records: CounterVec,
    companions: CounterVec,
    entities_stored: Gauge,
    auth_attempts: CounterVec,
}

/// Container for control surface metrics
struct ControlMetrics {
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static HARVEST_METRICS: OnceLock<HarvestMetrics> = OnceLock::new();

static CONTROL_METRICS: OnceLock<ControlMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// ```ignore
/// if let Err(e) = worldtally::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let harvest = HarvestMetrics {
        runs: register_counter_vec!(
            "worldtally_runs_total",
            "Finished runs by trigger and outcome",
            &["trigger", "outcome"]
        )?,
        run_duration: register_histogram_vec!(
            "worldtally_run_duration_seconds",
            "Wall time of a run in seconds",
            &["trigger"],
            vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]
        )?,
        run_in_progress: register_gauge!(
            "worldtally_run_in_progress",
            "1 while a run holds the single-flight guard"
        )?,
        pages: register_counter_vec!(
            "worldtally_pages_total",
            "Listing page requests by ordering and outcome",
            &["ordering", "outcome"]
        )?,
        records: register_counter_vec!(
            "worldtally_records_harvested_total",
            "Listing records harvested by ordering",
            &["ordering"]
        )?,
        companions: register_counter_vec!(
            "worldtally_companion_fetches_total",
            "Companion detail fetches by outcome",
            &["outcome"]
        )?,
        entities_stored: register_gauge!(
            "worldtally_entities_stored",
            "Entities in the current day's dataset"
        )?,
        auth_attempts: register_counter_vec!(
            "worldtally_auth_attempts_total",
            "Credential exchanges by outcome",
            &["outcome"]
        )?,
    };

    let control = ControlMetrics {
        api_requests: register_counter_vec!(
            "worldtally_api_requests_total",
            "Control surface requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "worldtally_api_request_duration_seconds",
            "Control surface request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
        )?,
    };

    HARVEST_METRICS.set(harvest).ok();
    CONTROL_METRICS.set(control).ok();

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a finished run
pub fn record_run(trigger: &str, outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.runs.with_label_values(&[trigger, outcome]).inc();
    }
}

/// Flip the in-progress gauge
pub fn set_run_in_progress(active: bool) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.run_in_progress.set(if active { 1.0 } else { 0.0 });
    }
}

/// Record one listing page request
pub fn record_page(ordering: &str, outcome: &str, records: usize) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    m.pages.with_label_values(&[ordering, outcome]).inc();
    if records > 0 {
        m.records
            .with_label_values(&[ordering])
            .inc_by(records as f64);
    }
}

/// Record one companion fetch (found, missing, failed)
pub fn record_companion(outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.companions.with_label_values(&[outcome]).inc();
    }
}

pub fn set_entities_stored(count: usize) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.entities_stored.set(count as f64);
    }
}

/// Record a credential exchange (authenticated, challenge, failed, refused)
pub fn record_auth_attempt(outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.auth_attempts.with_label_values(&[outcome]).inc();
    }
}

/// Record control surface request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = CONTROL_METRICS.get() else {
        return;
    };

    let status_str = status.to_string();
    m.api_requests
        .with_label_values(&[endpoint, &status_str])
        .inc();
    m.api_duration
        .with_label_values(&[endpoint])
        .observe(duration_secs);
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    fn noop() -> Self {
        Self { timer: None }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start a run timer; duration is recorded when the guard drops
pub fn start_run_timer(trigger: &str) -> MetricsTimer {
    match HARVEST_METRICS.get() {
        Some(m) => MetricsTimer::new(m.run_duration.with_label_values(&[trigger]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
