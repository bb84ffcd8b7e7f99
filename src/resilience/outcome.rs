//! Result of one attempt, as seen by the retry policy and the breaker.

use std::fmt;
use std::time::Duration;

use http::StatusCode;

use crate::executor::Response;
use crate::transport::{TransportError, TransportErrorKind};

/// Why an attempt did not succeed.
#[derive(Debug, Clone)]
pub enum AttemptFailure {
    /// The upstream answered with an error status.
    Status(Response),
    /// No HTTP response was obtained.
    Transport(TransportError),
}

impl AttemptFailure {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            AttemptFailure::Status(response) => Some(response.status),
            AttemptFailure::Transport(_) => None,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            AttemptFailure::Status(_) => None,
            AttemptFailure::Transport(err) => Some(err.kind),
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            AttemptFailure::Status(response) => Some(response),
            AttemptFailure::Transport(_) => None,
        }
    }

    /// `Retry-After` from a 429/503 response.
    pub fn retry_after(&self) -> Option<Duration> {
        self.response().and_then(Response::retry_after)
    }

    /// Does this failure say something about upstream health?
    ///
    /// 5xx, 408, 429 and classified transport errors count; other 4xx are
    /// the caller's fault.
    pub fn is_upstream_fault(&self) -> bool {
        match self {
            AttemptFailure::Status(response) => {
                let status = response.status;
                status.is_server_error()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
            }
            AttemptFailure::Transport(err) => err.kind != TransportErrorKind::Other,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> String {
        match self {
            AttemptFailure::Status(response) => response.status.as_u16().to_string(),
            AttemptFailure::Transport(err) => err.kind.as_str().to_string(),
        }
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Status(response) => write!(f, "HTTP {}", response.status),
            AttemptFailure::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

/// Classified attempt result.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Response),
    RetryableFailure(AttemptFailure),
    NonRetryableFailure(AttemptFailure),
}

/// What the circuit breaker records for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerVerdict {
    Success,
    Failure,
    /// The upstream answered but the caller was at fault (most 4xx).
    Neutral,
}

impl Outcome {
    pub fn failure(&self) -> Option<&AttemptFailure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::RetryableFailure(f) | Outcome::NonRetryableFailure(f) => Some(f),
        }
    }

    pub fn breaker_verdict(&self) -> BreakerVerdict {
        match self.failure() {
            None => BreakerVerdict::Success,
            Some(f) if f.is_upstream_fault() => BreakerVerdict::Failure,
            Some(_) => BreakerVerdict::Neutral,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::RetryableFailure(_) => "retryable",
            Outcome::NonRetryableFailure(_) => "non_retryable",
        }
    }
}
