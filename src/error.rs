//! Error types surfaced to library callers.
//!
//! Configuration problems are reported once, at construction, as
//! [`InvalidArgument`]. Everything that can go wrong while a call is in
//! flight is an [`ExecutorError`] variant so callers can pick a fallback per
//! kind (cached data, default value, degraded response).

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::resilience::outcome::AttemptFailure;
use crate::resilience::registry::TargetKey;

/// A configuration value violated its documented range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid argument `{field}`: {reason}")]
pub struct InvalidArgument {
    /// Dotted path of the offending option (e.g. `retries.max_delay_ms`).
    pub field: &'static str,
    /// Human readable explanation.
    pub reason: String,
}

impl InvalidArgument {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Why a transient failure was handed back without another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotRetried {
    /// The request is not idempotent and carries no `Idempotency-Key`.
    NotIdempotent,
    /// The executor-wide retry budget is spent.
    RetryBudgetExhausted,
}

impl fmt::Display for NotRetried {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotRetried::NotIdempotent => f.write_str("request is not idempotent"),
            NotRetried::RetryBudgetExhausted => f.write_str("retry budget exhausted"),
        }
    }
}

/// Terminal result of a failed [`RequestExecutor::execute`](crate::RequestExecutor::execute).
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Permanent outcome (4xx other than 408/429, TLS failure, ...).
    #[error("request to {target} failed permanently after {attempts} attempt(s): {failure}")]
    NonRetryableFailure {
        target: TargetKey,
        failure: AttemptFailure,
        attempts: u32,
    },

    /// Transient outcome that was eligible by status but not retried.
    #[error("transient failure from {target} not retried ({reason}): {failure}")]
    RetryableFailure {
        target: TargetKey,
        failure: AttemptFailure,
        attempts: u32,
        reason: NotRetried,
    },

    /// Every allowed retry was used; carries the last real failure.
    #[error("retries exhausted for {target} after {attempts} attempts: {last}")]
    ExhaustedRetries {
        target: TargetKey,
        last: AttemptFailure,
        attempts: u32,
    },

    /// The circuit breaker for the target rejected the call, possibly
    /// after earlier attempts of the same call tripped it.
    #[error("circuit open for {target} after {attempts} attempt(s)")]
    CircuitOpen {
        target: TargetKey,
        /// Time until the breaker will admit a trial call, when known.
        retry_in: Option<Duration>,
        last: Option<AttemptFailure>,
        attempts: u32,
    },

    /// Local throttling denied the call outright.
    #[error("rate limited for {target} after {attempts} attempt(s), retry in {retry_in:?}")]
    RateLimited {
        target: TargetKey,
        retry_in: Duration,
        last: Option<AttemptFailure>,
        attempts: u32,
    },

    /// The caller cancelled the call.
    #[error("request cancelled")]
    Cancelled { last: Option<AttemptFailure> },

    /// The total deadline ran out, or the next wait would have crossed it.
    #[error("deadline exceeded after {attempts} attempt(s)")]
    DeadlineExceeded {
        last: Option<AttemptFailure>,
        attempts: u32,
    },
}

impl ExecutorError {
    /// The last upstream failure observed before giving up, if any.
    pub fn last_failure(&self) -> Option<&AttemptFailure> {
        match self {
            ExecutorError::NonRetryableFailure { failure, .. }
            | ExecutorError::RetryableFailure { failure, .. } => Some(failure),
            ExecutorError::ExhaustedRetries { last, .. } => Some(last),
            ExecutorError::Cancelled { last }
            | ExecutorError::DeadlineExceeded { last, .. }
            | ExecutorError::CircuitOpen { last, .. }
            | ExecutorError::RateLimited { last, .. } => last.as_ref(),
        }
    }

    /// Short stable label, used for metrics and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::NonRetryableFailure { .. } => "non_retryable",
            ExecutorError::RetryableFailure { .. } => "not_retried",
            ExecutorError::ExhaustedRetries { .. } => "exhausted_retries",
            ExecutorError::CircuitOpen { .. } => "circuit_open",
            ExecutorError::RateLimited { .. } => "rate_limited",
            ExecutorError::Cancelled { .. } => "cancelled",
            ExecutorError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = InvalidArgument::new("retries.base_delay_ms", "must be greater than 0");
        assert_eq!(
            err.to_string(),
            "invalid argument `retries.base_delay_ms`: must be greater than 0"
        );
    }

    #[test]
    fn test_first_attempt_rejection_has_no_last_failure() {
        let err = ExecutorError::CircuitOpen {
            target: TargetKey::new("http://api.example.com:80"),
            retry_in: None,
            last: None,
            attempts: 0,
        };
        assert!(err.last_failure().is_none());
        assert_eq!(err.kind(), "circuit_open");
    }

    #[test]
    fn test_rejection_mid_call_keeps_last_failure() {
        let failure = AttemptFailure::Status(crate::executor::Response::new(
            http::StatusCode::SERVICE_UNAVAILABLE,
        ));
        let err = ExecutorError::RateLimited {
            target: TargetKey::new("http://api.example.com:80"),
            retry_in: Duration::from_secs(5),
            last: Some(failure),
            attempts: 2,
        };
        assert_eq!(
            err.last_failure().and_then(|f| f.status()),
            Some(http::StatusCode::SERVICE_UNAVAILABLE)
        );
    }
}
