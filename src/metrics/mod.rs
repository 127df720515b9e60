//! Prometheus metrics for helper dispatch
//!
//! Tracks assignments, escalation chains, completions and API traffic.
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! Until then (or if registration fails) every record function is a no-op,
//! so library code and tests can call them unconditionally.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

struct DispatchMetrics {
    assignments: CounterVec,
    escalations: CounterVec,
    active_escalations: Gauge,
    completions: Counter,
    api_requests: CounterVec,
    api_duration: HistogramVec,
}

static DISPATCH_METRICS: OnceLock<DispatchMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once; only the first call registers anything.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = helper_dispatch::metrics::init_metrics() {
///     eprintln!("Warning: Metrics initialization failed: {}", e);
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = DispatchMetrics {
        assignments: register_counter_vec!(
            "dispatch_assignments_total",
            "Assignment requests by result",
            &["result"]
        )?,
        escalations: register_counter_vec!(
            "dispatch_escalation_chains_total",
            "Finished escalation chains by reason",
            &["reason"]
        )?,
        active_escalations: register_gauge!(
            "dispatch_active_escalations",
            "Bookings with a pending escalation timer"
        )?,
        completions: register_counter!(
            "dispatch_completions_total",
            "Bookings completed by requesters"
        )?,
        api_requests: register_counter_vec!(
            "dispatch_api_requests_total",
            "Total API requests by endpoint and status",
            &["endpoint", "status"]
        )?,
        api_duration: register_histogram_vec!(
            "dispatch_api_request_duration_seconds",
            "API request duration in seconds",
            &["endpoint"],
            vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
        )?,
    };

    DISPATCH_METRICS
        .set(metrics)
        .map_err(|_| "Dispatch metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISPATCH_METRICS.get().is_some()
}

// ============================================================================
// Recording
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record the result of an assignment request
pub fn record_assignment(result: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.assignments.with_label_values(&[result]).inc();
    }
}

/// Record an escalation chain going dormant
pub fn record_escalation(reason: &str) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.escalations.with_label_values(&[reason]).inc();
    }
}

pub fn set_active_escalations(count: usize) {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.active_escalations.set(count as f64);
    }
}

pub fn record_completion() {
    if let Some(m) = DISPATCH_METRICS.get() {
        m.completions.inc();
    }
}

/// Record API request
pub fn record_api_request(endpoint: &str, status: u16, duration_secs: f64) {
    let Some(m) = DISPATCH_METRICS.get() else {
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
