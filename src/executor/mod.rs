//! Request executor.
//!
//! # Responsibilities
//! - Run one logical call: admission, breaker check, attempt, classify, retry
//! - Keep per-target breaker and budget state up to date
//! - Honour priorities, cancellation and the total deadline
//!
//! # Data Flow
//! ```text
//! execute(request, options)
//!     → RateLimiter::admit      Throttled: wait (High+) or RateLimited
//!     → CircuitBreaker::allow   Open: CircuitOpen, no transport call
//!     → Transport::send         bounded by attempt timeouts and deadline
//!     → RetryPolicy::classify   record verdict on breaker, headers on budget
//!     → RetryPolicy::should_retry
//!         Retry(wait) → breaker still Open at wake-up? CircuitOpen
//!                     → deadline, then retry budget
//!                     → sleep (cancellable) → back to admit
//!         Stop        → final result
//! ```
//!
//! # Design Decisions
//! - No lock is held across an await; shared state is touched in short
//!   critical sections before and after each attempt
//! - Attempts of one call are strictly sequential
//! - A permit dropped without a verdict (cancel, deadline) records nothing
//! - Every rejection after the first attempt carries the last real failure

pub mod request;
pub mod response;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::schema::ClientConfig;
use crate::config::validation::validate_config;
use crate::config::ConfigError;
use crate::error::{ExecutorError, NotRetried};
use crate::observability::metrics;
use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::outcome::{AttemptFailure, Outcome};
use crate::resilience::rate_limit::Admission;
use crate::resilience::registry::{TargetKey, TargetRegistry, TargetState};
use crate::resilience::retries::{Decision, RetryBudget, RetryPolicy, RetryState, StopReason};
use crate::resilience::timeouts::{AttemptTimeouts, Deadline};
use crate::transport::{HttpTransport, Transport, TransportError, TransportErrorKind};

pub use request::{CallOptions, Request, IDEMPOTENCY_KEY, X_REQUEST_ID};
pub use response::{RateLimitSnapshot, Response};

/// Runs requests through retry, circuit breaking and rate limiting.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    registry: Arc<TargetRegistry>,
    policy: RetryPolicy,
    budget: Option<RetryBudget>,
    timeouts: AttemptTimeouts,
    total_deadline: Option<Duration>,
    path_segments: usize,
    rng: Mutex<StdRng>,
}

/// Builder for [`RequestExecutor`].
pub struct RequestExecutorBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    registry: Option<Arc<TargetRegistry>>,
    rng_seed: Option<u64>,
}

impl RequestExecutorBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Transport for every attempt. Defaults to [`HttpTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share per-target state with other executors.
    pub fn registry(mut self, registry: Arc<TargetRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Seed the jitter RNG for reproducible delays.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<RequestExecutor, ConfigError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let timeouts = AttemptTimeouts::from_config(&config.timeouts);
        let policy = RetryPolicy::new(&config.retries)?;

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(TargetRegistry::new(
                &config.circuit_breaker,
                &config.rate_limit,
            )?),
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&timeouts)?),
        };

        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::debug!(
            max_retries = policy.max_retries(),
            retry_budget = config.retries.budget_ratio,
            total_deadline_ms = config.timeouts.total_deadline_ms,
            "Request executor configured"
        );

        Ok(RequestExecutor {
            transport,
            registry,
            policy,
            budget: RetryBudget::from_config(&config.retries),
            timeouts,
            total_deadline: config.timeouts.total_deadline_ms.map(Duration::from_millis),
            path_segments: config.targets.path_segments,
            rng: Mutex::new(rng),
        })
    }
}

enum Pause {
    Elapsed,
    Cancelled,
}

/// Sleep for `wait` unless `cancel` fires first.
async fn pause(wait: Duration, cancel: &CancellationToken) -> Pause {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Pause::Cancelled,
        _ = tokio::time::sleep(wait) => Pause::Elapsed,
    }
}

enum Attempt {
    Completed(Result<Response, TransportError>),
    TimedOut,
    Cancelled,
}

impl RequestExecutor {
    pub fn builder() -> RequestExecutorBuilder {
        RequestExecutorBuilder {
            config: ClientConfig::default(),
            transport: None,
            registry: None,
            rng_seed: None,
        }
    }

    /// Per-target state shared by calls through this executor.
    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Target key a request would be accounted under.
    pub fn target_for(&self, request: &Request) -> TargetKey {
        TargetKey::from_url(request.url(), self.path_segments)
    }

    /// Execute `request`, retrying transient failures.
    ///
    /// Returns the first successful response, or the error that ended the call.
    pub async fn execute(
        &self,
        mut request: Request,
        options: CallOptions,
    ) -> Result<Response, ExecutorError> {
        let request_id = request.ensure_request_id();
        let target = self.target_for(&request);
        let span = tracing::info_span!(
            "execute",
            request_id = %request_id,
            method = %request.method(),
            target = %target,
        );

        async move {
            let start = std::time::Instant::now();
            let state = self.registry.get_or_create(&target);
            let result = self.run(&request, options, &target, &state).await;

            let label = match &result {
                Ok(_) => "ok",
                Err(err) => err.kind(),
            };
            metrics::record_call(target.as_str(), label, start);
            match &result {
                Ok(response) => {
                    tracing::debug!(status = response.status.as_u16(), "Call succeeded")
                }
                Err(err) => tracing::warn!(error = %err, kind = label, "Call failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &Request,
        options: CallOptions,
        target: &TargetKey,
        state: &TargetState,
    ) -> Result<Response, ExecutorError> {
        let idempotent = options
            .idempotent
            .unwrap_or_else(|| request.is_idempotent());
        let deadline = Deadline::from_option(options.deadline.or(self.total_deadline));
        let cancel = options.cancellation.unwrap_or_default();
        let priority = options.priority;

        let mut retry = RetryState::new(idempotent, self.policy.max_retries());
        let mut last: Option<AttemptFailure> = None;
        let mut attempts: u32 = 0;

        if let Some(budget) = &self.budget {
            budget.record_request();
        }

        loop {
            if let Admission::Throttled(wait) = state.limiter.admit(priority) {
                if !priority.waits_when_throttled() {
                    metrics::record_rejection(target.as_str(), "rate_limited");
                    return Err(ExecutorError::RateLimited {
                        target: target.clone(),
                        retry_in: wait,
                        last,
                        attempts,
                    });
                }
                if deadline.would_exceed(wait) {
                    return Err(ExecutorError::DeadlineExceeded { last, attempts });
                }
                tracing::debug!(wait = ?wait, priority = %priority, "Throttled, waiting");
                if let Pause::Cancelled = pause(wait, &cancel).await {
                    return Err(ExecutorError::Cancelled { last });
                }
            }

            let permit = match state.breaker.allow() {
                Ok(permit) => permit,
                Err(rejection) => {
                    metrics::record_rejection(target.as_str(), "circuit_open");
                    return Err(ExecutorError::CircuitOpen {
                        target: target.clone(),
                        retry_in: rejection.retry_in,
                        last,
                        attempts,
                    });
                }
            };

            // Nothing is sent for a call cancelled before this point.
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled { last });
            }

            state.limiter.consume();
            attempts += 1;
            let attempt_budget = deadline.bound(self.timeouts.ceiling());

            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => Attempt::Cancelled,
                sent = tokio::time::timeout(
                    attempt_budget,
                    self.transport.send(request, &self.timeouts),
                ) => match sent {
                    Ok(result) => Attempt::Completed(result),
                    Err(_) => Attempt::TimedOut,
                },
            };

            let sent = match attempt {
                Attempt::Completed(result) => result,
                Attempt::Cancelled => return Err(ExecutorError::Cancelled { last }),
                Attempt::TimedOut if deadline.is_expired() => {
                    return Err(ExecutorError::DeadlineExceeded { last, attempts });
                }
                Attempt::TimedOut => Err(TransportError::new(
                    TransportErrorKind::ReadTimeout,
                    format!("attempt exceeded {attempt_budget:?}"),
                )),
            };

            if let Ok(response) = &sent {
                if let Some(snapshot) = response.rate_limit() {
                    state.limiter.update(snapshot);
                }
            }

            let outcome = self.policy.classify(sent);
            permit.record(outcome.breaker_verdict());
            metrics::record_attempt(target.as_str(), outcome.label());

            let decision = {
                let mut rng = self.rng.lock();
                self.policy.should_retry(&outcome, &mut retry, &mut *rng)
            };

            let failure = match outcome {
                Outcome::Success(response) => return Ok(response),
                Outcome::NonRetryableFailure(failure) => {
                    return Err(ExecutorError::NonRetryableFailure {
                        target: target.clone(),
                        failure,
                        attempts,
                    });
                }
                Outcome::RetryableFailure(failure) => failure,
            };

            let wait = match decision {
                Decision::Retry(wait) => wait,
                Decision::Stop(StopReason::NotIdempotent) => {
                    return Err(ExecutorError::RetryableFailure {
                        target: target.clone(),
                        failure,
                        attempts,
                        reason: NotRetried::NotIdempotent,
                    });
                }
                Decision::Stop(_) => {
                    return Err(ExecutorError::ExhaustedRetries {
                        target: target.clone(),
                        last: failure,
                        attempts,
                    });
                }
            };

            let breaker = state.breaker.snapshot();
            let open_at_wake = breaker.state == CircuitState::Open
                && breaker.retry_in.map_or(true, |left| left > wait);
            if open_at_wake {
                metrics::record_rejection(target.as_str(), "circuit_open");
                return Err(ExecutorError::CircuitOpen {
                    target: target.clone(),
                    retry_in: breaker.retry_in,
                    last: Some(failure),
                    attempts,
                });
            }

            if deadline.would_exceed(wait) {
                return Err(ExecutorError::DeadlineExceeded {
                    last: Some(failure),
                    attempts,
                });
            }

            if let Some(budget) = &self.budget {
                if !budget.try_acquire() {
                    return Err(ExecutorError::RetryableFailure {
                        target: target.clone(),
                        failure,
                        attempts,
                        reason: NotRetried::RetryBudgetExhausted,
                    });
                }
            }

            tracing::info!(
                attempt = attempts,
                failure = %failure,
                delay = ?wait,
                "Retrying after transient failure"
            );
            metrics::record_retry(target.as_str());
            last = Some(failure);

            if let Pause::Cancelled = pause(wait, &cancel).await {
                return Err(ExecutorError::Cancelled { last });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use http::StatusCode;

    struct Fixed(StatusCode);

    #[async_trait]
    impl Transport for Fixed {
        async fn send(
            &self,
            _request: &Request,
            _timeouts: &AttemptTimeouts,
        ) -> Result<Response, TransportError> {
            Ok(Response::new(self.0))
        }
    }

    fn executor(status: StatusCode) -> RequestExecutor {
        RequestExecutor::builder()
            .transport(Arc::new(Fixed(status)))
            .rng_seed(7)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = ClientConfig::default();
        config.retries.base_delay_ms = 0;
        let result = RequestExecutor::builder()
            .config(config)
            .transport(Arc::new(Fixed(StatusCode::OK)))
            .build();
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn test_success_registers_target() {
        let exec = executor(StatusCode::OK);
        let response = exec
            .execute(Request::get("http://api.test/a").unwrap(), CallOptions::new())
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert!(exec.registry().get(&TargetKey::new("http://api.test:80")).is_some());
    }

    #[test]
    fn test_target_for_uses_path_segments() {
        let mut config = ClientConfig::default();
        config.targets.path_segments = 1;
        let exec = RequestExecutor::builder()
            .config(config)
            .transport(Arc::new(Fixed(StatusCode::OK)))
            .build()
            .unwrap();
        let request = Request::get("https://api.test/v2/items").unwrap();
        assert_eq!(exec.target_for(&request).as_str(), "https://api.test:443/v2");
    }
}
