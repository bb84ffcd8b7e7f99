//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files, and
//! every section can be omitted.

use serde::{Deserialize, Serialize};

use crate::resilience::backoff::JitterMode;

/// Root configuration for the resilient client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Retry and backoff settings.
    pub retries: RetryConfig,

    /// Circuit breaker settings, applied per target.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Client-side rate limiting, applied per target.
    pub rate_limit: RateLimitConfig,

    /// Per-attempt timeouts and the optional total deadline.
    pub timeouts: TimeoutConfig,

    /// How request URLs map to targets.
    pub targets: TargetConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    /// Also caps server-provided `Retry-After` values.
    pub max_delay_ms: u64,

    /// Jitter applied to each backoff delay (none, full, equal).
    pub jitter: JitterMode,

    /// Treat HTTP 500 as transient.
    pub retry_on_500: bool,

    /// Retry cap for DNS failures (never above `max_retries`).
    pub max_dns_retries: u32,

    /// Fraction of requests that may be retries (retry budget).
    /// e.g., 0.1 for 10% budget. Unset disables the budget.
    pub budget_ratio: Option<f32>,

    /// Retries always allowed per window regardless of the ratio.
    pub budget_min_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter: JitterMode::Full,
            retry_on_500: false,
            max_dns_retries: 2,
            budget_ratio: None,
            budget_min_retries: 10,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable the breaker. When off every call is admitted.
    pub enabled: bool,

    /// Consecutive-window failures that open the circuit.
    pub failure_threshold: u32,

    /// Failure rate (0, 1] that opens the circuit once `minimum_calls` is reached.
    pub failure_rate_threshold: f64,

    /// Calls in the window before the failure rate is considered.
    pub minimum_calls: u32,

    /// Length of the rolling evaluation window in milliseconds.
    pub evaluation_window_ms: u64,

    /// Time spent Open before probing, in milliseconds.
    pub open_duration_ms: u64,

    /// Probes admitted in Half-Open; all must succeed to close.
    pub half_open_probe_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            evaluation_window_ms: 10_000,
            open_duration_ms: 30_000,
            half_open_probe_count: 3,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Honour server-advertised rate-limit headers.
    pub enabled: bool,

    /// Local ceiling in requests per second per target. Unset means none.
    pub local_rate_ceiling: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_rate_ceiling: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Response read timeout in milliseconds.
    pub read_timeout_ms: u64,

    /// Request write timeout in milliseconds.
    pub write_timeout_ms: u64,

    /// Total deadline across all attempts and waits. Unset means none.
    pub total_deadline_ms: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            total_deadline_ms: None,
        }
    }
}

/// Target key derivation.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TargetConfig {
    /// Leading path segments included in the target key (0 = host only).
    pub path_segments: usize,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
