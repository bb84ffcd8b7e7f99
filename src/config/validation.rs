//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (delays > 0, rates in (0, 1], timeouts > 0)
//! - Check that addresses and log levels parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<InvalidArgument>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ClientConfig;
use crate::error::InvalidArgument;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<InvalidArgument>> {
    let mut errors = Vec::new();

    let retries = &config.retries;
    if retries.base_delay_ms == 0 {
        errors.push(InvalidArgument::new(
            "retries.base_delay_ms",
            "must be greater than 0",
        ));
    }
    if retries.max_delay_ms < retries.base_delay_ms {
        errors.push(InvalidArgument::new(
            "retries.max_delay_ms",
            format!(
                "must be >= base_delay_ms ({} < {})",
                retries.max_delay_ms, retries.base_delay_ms
            ),
        ));
    }
    if let Some(ratio) = retries.budget_ratio {
        if !(ratio > 0.0 && ratio <= 1.0) {
            errors.push(InvalidArgument::new(
                "retries.budget_ratio",
                "must be in (0, 1]",
            ));
        }
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(InvalidArgument::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    if !(breaker.failure_rate_threshold > 0.0 && breaker.failure_rate_threshold <= 1.0) {
        errors.push(InvalidArgument::new(
            "circuit_breaker.failure_rate_threshold",
            "must be in (0, 1]",
        ));
    }
    if breaker.evaluation_window_ms == 0 {
        errors.push(InvalidArgument::new(
            "circuit_breaker.evaluation_window_ms",
            "must be greater than 0",
        ));
    }
    if breaker.open_duration_ms == 0 {
        errors.push(InvalidArgument::new(
            "circuit_breaker.open_duration_ms",
            "must be greater than 0",
        ));
    }
    if breaker.half_open_probe_count == 0 {
        errors.push(InvalidArgument::new(
            "circuit_breaker.half_open_probe_count",
            "must be at least 1",
        ));
    }

    if config.rate_limit.local_rate_ceiling == Some(0) {
        errors.push(InvalidArgument::new(
            "rate_limit.local_rate_ceiling",
            "must be greater than 0 when set",
        ));
    }

    let timeouts = &config.timeouts;
    for (field, value) in [
        ("timeouts.connect_timeout_ms", timeouts.connect_timeout_ms),
        ("timeouts.read_timeout_ms", timeouts.read_timeout_ms),
        ("timeouts.write_timeout_ms", timeouts.write_timeout_ms),
    ] {
        if value == 0 {
            errors.push(InvalidArgument::new(field, "must be greater than 0"));
        }
    }
    if timeouts.total_deadline_ms == Some(0) {
        errors.push(InvalidArgument::new(
            "timeouts.total_deadline_ms",
            "must be greater than 0 when set",
        ));
    }

    let observability = &config.observability;
    if !LOG_LEVELS.contains(&observability.log_level.to_ascii_lowercase().as_str()) {
        errors.push(InvalidArgument::new(
            "observability.log_level",
            format!("unknown level `{}`", observability.log_level),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(InvalidArgument::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_reports_every_error() {
        let mut config = ClientConfig::default();
        config.retries.base_delay_ms = 500;
        config.retries.max_delay_ms = 100;
        config.circuit_breaker.failure_rate_threshold = 1.5;
        config.timeouts.read_timeout_ms = 0;
        config.observability.log_level = "loud".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "retries.max_delay_ms",
                "circuit_breaker.failure_rate_threshold",
                "timeouts.read_timeout_ms",
                "observability.log_level",
            ]
        );
    }

    #[test]
    fn test_metrics_address_checked_only_when_enabled() {
        let mut config = ClientConfig::default();
        config.observability.metrics_address = "not-an-address".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
