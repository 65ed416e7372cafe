//! Prometheus metrics for the distribution loop and the control surface
//!
//! This module provides metrics tracking for:
//! - Distribution: cycles, deliveries, rate-gate skips, active destinations
//! - Control: commands handled by tag and outcome
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder, Gauge,
    TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for distribution loop metrics
struct DistributionMetrics {
    cycles: Counter,
    deliveries: CounterVec,
    skips: CounterVec,
    active_destinations: Gauge,
}

/// Container for control surface metrics
struct ControlMetrics {
    commands: CounterVec,
}

static DISTRIBUTION_METRICS: OnceLock<DistributionMetrics> = OnceLock::new();

static CONTROL_METRICS: OnceLock<ControlMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// Safe to call more than once. If registration fails the error is
/// returned and every recording function stays a no-op.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let distribution = DistributionMetrics {
        cycles: register_counter!(
            "relaycast_cycles_total",
            "Total distribution cycles started"
        )?,
        deliveries: register_counter_vec!(
            "relaycast_deliveries_total",
            "Total delivery attempts by outcome",
            &["outcome"]
        )?,
        skips: register_counter_vec!(
            "relaycast_skips_total",
            "Total destinations skipped by reason",
            &["reason"]
        )?,
        active_destinations: register_gauge!(
            "relaycast_active_destinations",
            "Destinations in the most recent cycle"
        )?,
    };

    let control = ControlMetrics {
        commands: register_counter_vec!(
            "relaycast_commands_total",
            "Total control commands by tag and outcome",
            &["command", "outcome"]
        )?,
    };

    DISTRIBUTION_METRICS
        .set(distribution)
        .map_err(|_| "Distribution metrics already initialized")?;
    CONTROL_METRICS
        .set(control)
        .map_err(|_| "Control metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    DISTRIBUTION_METRICS.get().is_some() && CONTROL_METRICS.get().is_some()
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

/// Record the start of a distribution cycle
pub fn record_cycle() {
    if let Some(m) = DISTRIBUTION_METRICS.get() {
        m.cycles.inc();
    }
}

/// Record one delivery attempt
pub fn record_delivery(success: bool) {
    if let Some(m) = DISTRIBUTION_METRICS.get() {
        let outcome = if success { "ok" } else { "failed" };
        m.deliveries.with_label_values(&[outcome]).inc();
    }
}

/// Record a destination the rate gate (or a removal) skipped
pub fn record_skip(reason: &str) {
    if let Some(m) = DISTRIBUTION_METRICS.get() {
        m.skips.with_label_values(&[reason]).inc();
    }
}

/// Update the destination count of the current cycle
pub fn set_active_destinations(count: usize) {
    if let Some(m) = DISTRIBUTION_METRICS.get() {
        m.active_destinations.set(count as f64);
    }
}

/// Record a handled control command
pub fn record_command(command: &str, outcome: &str) {
    if let Some(m) = CONTROL_METRICS.get() {
        m.commands.with_label_values(&[command, outcome]).inc();
    }
}

// ============================================================================
// Tests
// ============================================================================
