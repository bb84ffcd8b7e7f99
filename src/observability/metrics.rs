//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define client metrics (attempts, retries, rejections, breaker state, latency)
//! - Expose Prometheus-compatible metrics endpoint
//! - Track per-target metrics
//!
//! # Metrics
//! - `resilient_http_attempts_total` (counter): attempts by target, outcome
//! - `resilient_http_retries_total` (counter): retries scheduled by target
//! - `resilient_http_rejections_total` (counter): local rejections by target, reason
//! - `resilient_http_circuit_state` (gauge): 0=closed, 1=half_open, 2=open
//! - `resilient_http_call_duration_seconds` (histogram): end-to-end call latency
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; with no recorder installed
//!   every call is a no-op
//! - Labels for target, outcome, reason

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_attempt(target: &str, outcome: &'static str) {
    metrics::counter!(
        "resilient_http_attempts_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_retry(target: &str) {
    metrics::counter!("resilient_http_retries_total", "target" => target.to_string())
        .increment(1);
}

pub fn record_rejection(target: &str, reason: &'static str) {
    metrics::counter!(
        "resilient_http_rejections_total",
        "target" => target.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_circuit_state(target: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("resilient_http_circuit_state", "target" => target.to_string()).set(value);
}

pub fn record_call(target: &str, result: &'static str, start: Instant) {
    metrics::histogram!(
        "resilient_http_call_duration_seconds",
        "target" => target.to_string(),
        "result" => result
    )
    .record(start.elapsed().as_secs_f64());
}
