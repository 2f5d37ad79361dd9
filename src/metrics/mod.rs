//! Prometheus metrics for the maxstream server
//!
//! This module provides metrics tracking for:
//! - Streaming: active connections, observations received, updates emitted,
//!   connection outcomes
//! - Discovery: calls by operation and outcome, call latency, current
//!   registration state
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for streaming metrics
struct StreamMetrics {
    active_connections: Gauge,
    observations: Counter,
    max_updates: Counter,
    connections_closed: CounterVec,
}

/// Container for discovery metrics
struct DiscoveryMetrics {
    calls: CounterVec,
    call_duration: HistogramVec,
    registered: Gauge,
}

static STREAM_METRICS: OnceLock<StreamMetrics> = OnceLock::new();

static DISCOVERY_METRICS: OnceLock<DiscoveryMetrics> = OnceLock::new();

/// Outcome of the one registration attempt
static METRICS_INIT: OnceLock<Result<(), String>> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Registration runs once per process; later calls return the first
/// outcome. On failure the application can continue without metrics.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    METRICS_INIT
        .get_or_init(|| register_all().map_err(|e| e.to_string()))
        .clone()
        .map_err(Into::into)
}

fn register_all() -> Result<(), prometheus::Error> {
    let stream = StreamMetrics {
        active_connections: register_gauge!(
            "maxstream_active_connections",
            "Number of streaming connections currently open"
        )?,
        observations: register_counter!(
            "maxstream_observations_total",
            "Total observations received across all connections"
        )?,
        max_updates: register_counter!(
            "maxstream_max_updates_total",
            "Total running-maximum updates sent to clients"
        )?,
        connections_closed: register_counter_vec!(
            "maxstream_connections_closed_total",
            "Closed streaming connections by outcome",
            &["outcome"]
        )?,
    };

    let discovery = DiscoveryMetrics {
        calls: register_counter_vec!(
            "maxstream_discovery_calls_total",
            "Discovery resource calls by operation and outcome",
            &["operation", "outcome"]
        )?,
        call_duration: register_histogram_vec!(
            "maxstream_discovery_call_duration_seconds",
            "Discovery register/deregister duration in seconds",
            &["operation"],
            vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        )?,
        registered: register_gauge!(
            "maxstream_registered",
            "1 when this instance is advertised to discovery"
        )?,
    };

    STREAM_METRICS.set(stream).ok();
    DISCOVERY_METRICS.set(discovery).ok();

    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    STREAM_METRICS.get().is_some() && DISCOVERY_METRICS.get().is_some()
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

pub fn set_active_connections(count: usize) {
    if let Some(m) = STREAM_METRICS.get() {
        m.active_connections.set(count as f64);
    }
}

pub fn record_observation() {
    if let Some(m) = STREAM_METRICS.get() {
        m.observations.inc();
    }
}

pub fn record_max_update() {
    if let Some(m) = STREAM_METRICS.get() {
        m.max_updates.inc();
    }
}

/// Record how a connection ended (`completed`, `cancelled`, `shutdown`, `failed`)
pub fn record_connection_closed(outcome: &str) {
    if let Some(m) = STREAM_METRICS.get() {
        m.connections_closed.with_label_values(&[outcome]).inc();
    }
}

/// Record a discovery register/deregister call
pub fn record_discovery_call(operation: &str, success: bool, duration_secs: f64) {
    let Some(m) = DISCOVERY_METRICS.get() else {
        return;
    };

    let outcome = if success { "success" } else { "error" };
    m.calls.with_label_values(&[operation, outcome]).inc();
    m.call_duration
        .with_label_values(&[operation])
        .observe(duration_secs);
}

pub fn set_registered(registered: bool) {
    if let Some(m) = DISCOVERY_METRICS.get() {
        m.registered.set(if registered { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensure_metrics_initialized() {
        let _ = init_metrics();
    }

    #[test]
    fn test_init_is_idempotent() {
        ensure_metrics_initialized();
        assert!(init_metrics().is_ok());
        assert!(metrics_initialized());
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        ensure_metrics_initialized();
        set_active_connections(2);
        record_observation();
        record_max_update();

        let text = encode_metrics().unwrap();
        assert!(text.contains("maxstream_active_connections"));
        assert!(text.contains("maxstream_observations_total"));
    }

    #[test]
    fn test_discovery_recording() {
        ensure_metrics_initialized();
        record_discovery_call("register", true, 0.01);
        record_discovery_call("deregister", false, 5.0);
        set_registered(true);
        // Verify it doesn't panic
    }

    #[test]
    fn test_connection_outcome_recording() {
        ensure_metrics_initialized();
        record_connection_closed("completed");
        record_connection_closed("failed");
        // Verify it doesn't panic
    }
}
