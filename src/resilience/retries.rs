//! Retry logic.
//!
//! # Responsibilities
//! - Classify an attempt result as success, retryable or permanent
//! - Gate retries on idempotency (method or `Idempotency-Key`)
//! - Pick the wait: `Retry-After` when the server sent one, else backoff
//! - Enforce a retry budget (retries as a share of requests per window)
//!
//! # Design Decisions
//! - 500 is only retried when `retry_on_500` is set
//! - DNS failures have their own, lower retry cap
//! - Jittered backoff prevents thundering herd
//! - Retry budget prevents retry storms under load

use std::time::Duration;

use http::StatusCode;
use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;

use crate::config::schema::RetryConfig;
use crate::error::InvalidArgument;
use crate::executor::Response;
use crate::resilience::backoff::Backoff;
use crate::resilience::outcome::{AttemptFailure, Outcome};
use crate::transport::{TransportError, TransportErrorKind};

/// Window over which the retry budget is accounted.
const BUDGET_WINDOW: Duration = Duration::from_secs(10);

/// Per-call retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempt_number: u32,
    pub idempotent: bool,
    pub max_retries: u32,
    pub last_wait: Option<Duration>,
}

impl RetryState {
    pub fn new(idempotent: bool, max_retries: u32) -> Self {
        Self {
            attempt_number: 0,
            idempotent,
            max_retries,
            last_wait: None,
        }
    }
}

/// Why the retry loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Succeeded,
    PermanentFailure,
    ExhaustedRetries,
    NotIdempotent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry(Duration),
    Stop(StopReason),
}

/// Classification table plus backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    max_dns_retries: u32,
    retry_on_500: bool,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Result<Self, InvalidArgument> {
        let backoff = Backoff::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.jitter,
        )?;
        Ok(Self {
            max_retries: config.max_retries,
            max_dns_retries: config.max_dns_retries,
            retry_on_500: config.retry_on_500,
            backoff,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Is this status transient?
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        match status.as_u16() {
            408 | 429 | 502 | 503 | 504 => true,
            500 => self.retry_on_500,
            _ => false,
        }
    }

    pub fn is_retryable_transport(&self, kind: TransportErrorKind) -> bool {
        match kind {
            TransportErrorKind::ConnectionRefused
            | TransportErrorKind::ConnectionReset
            | TransportErrorKind::ConnectTimeout
            | TransportErrorKind::ReadTimeout
            | TransportErrorKind::WriteTimeout
            | TransportErrorKind::DnsFailure => true,
            TransportErrorKind::TlsFailure | TransportErrorKind::Other => false,
        }
    }

    /// Turn a raw attempt result into an [`Outcome`].
    pub fn classify(&self, result: Result<Response, TransportError>) -> Outcome {
        match result {
            Ok(response) if response.status.as_u16() < 400 => Outcome::Success(response),
            Ok(response) => {
                let retryable = self.is_retryable_status(response.status);
                let failure = AttemptFailure::Status(response);
                if retryable {
                    Outcome::RetryableFailure(failure)
                } else {
                    Outcome::NonRetryableFailure(failure)
                }
            }
            Err(err) => {
                let retryable = self.is_retryable_transport(err.kind);
                let failure = AttemptFailure::Transport(err);
                if retryable {
                    Outcome::RetryableFailure(failure)
                } else {
                    Outcome::NonRetryableFailure(failure)
                }
            }
        }
    }

    /// Decide whether to try again; on `Retry` the state advances.
    pub fn should_retry<R: Rng + ?Sized>(
        &self,
        outcome: &Outcome,
        state: &mut RetryState,
        rng: &mut R,
    ) -> Decision {
        let failure = match outcome {
            Outcome::Success(_) => return Decision::Stop(StopReason::Succeeded),
            Outcome::NonRetryableFailure(_) => return Decision::Stop(StopReason::PermanentFailure),
            Outcome::RetryableFailure(failure) => failure,
        };

        if !state.idempotent {
            return Decision::Stop(StopReason::NotIdempotent);
        }

        let cap = match failure.transport_kind() {
            Some(TransportErrorKind::DnsFailure) => state.max_retries.min(self.max_dns_retries),
            _ => state.max_retries,
        };
        if state.attempt_number >= cap {
            return Decision::Stop(StopReason::ExhaustedRetries);
        }

        let wait = match failure.retry_after() {
            Some(server_wait) => self.backoff.clamp(server_wait),
            None => self.backoff.delay(state.attempt_number, rng),
        };
        state.attempt_number += 1;
        state.last_wait = Some(wait);
        Decision::Retry(wait)
    }
}

/// Caps retries at a share of recent requests, shared by every call on an
/// executor.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u32,
    window: Mutex<BudgetWindow>,
}

#[derive(Debug)]
struct BudgetWindow {
    started: Instant,
    requests: u32,
    retries: u32,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u32) -> Self {
        Self {
            ratio,
            min_retries,
            window: Mutex::new(BudgetWindow {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            }),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Option<Self> {
        config
            .budget_ratio
            .map(|ratio| Self::new(ratio, config.budget_min_retries))
    }

    pub fn record_request(&self) {
        let mut window = self.window.lock();
        Self::roll(&mut window);
        window.requests = window.requests.saturating_add(1);
    }

    /// Take one retry from the budget if any is left.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.window.lock();
        Self::roll(&mut window);

        let allowed = (window.requests as f32 * self.ratio) as u32;
        if window.retries < self.min_retries.max(allowed) {
            window.retries += 1;
            true
        } else {
            false
        }
    }

    fn roll(window: &mut BudgetWindow) {
        let now = Instant::now();
        if now.duration_since(window.started) >= BUDGET_WINDOW {
            window.started = now;
            window.requests = 0;
            window.retries = 0;
        }
    }
}
