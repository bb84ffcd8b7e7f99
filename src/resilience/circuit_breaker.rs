//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: testing if upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures >= threshold, or failure rate >= rate threshold,
//!                over outcomes younger than the evaluation window
//! Open → Half-Open: after open_duration
//! Half-Open → Closed: every probe succeeds
//! Half-Open → Open: any probe fails
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Bounded probes in Half-Open (prevents hammering recovering upstream)
//! - Admission hands out a permit; an unrecorded permit gives its probe
//!   slot back on drop
//! - Each transition bumps a generation so late results from an earlier
//!   state are ignored
//! - The evaluation window slides: each outcome ages out on its own, so a
//!   burst is never split across two windows

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::schema::CircuitBreakerConfig;
use crate::error::InvalidArgument;
use crate::observability::metrics;
use crate::resilience::outcome::BreakerVerdict;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Validated breaker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub failure_rate_threshold: f64,
    pub minimum_calls: u32,
    pub evaluation_window: Duration,
    pub open_duration: Duration,
    pub half_open_probe_count: u32,
}

impl BreakerSettings {
    pub fn from_config(config: &CircuitBreakerConfig) -> Result<Self, InvalidArgument> {
        if config.failure_threshold == 0 {
            return Err(InvalidArgument::new(
                "circuit_breaker.failure_threshold",
                "must be at least 1",
            ));
        }
        if !(config.failure_rate_threshold > 0.0 && config.failure_rate_threshold <= 1.0) {
            return Err(InvalidArgument::new(
                "circuit_breaker.failure_rate_threshold",
                "must be in (0, 1]",
            ));
        }
        if config.half_open_probe_count == 0 {
            return Err(InvalidArgument::new(
                "circuit_breaker.half_open_probe_count",
                "must be at least 1",
            ));
        }
        if config.evaluation_window_ms == 0 || config.open_duration_ms == 0 {
            return Err(InvalidArgument::new(
                "circuit_breaker.open_duration_ms",
                "window and open duration must be greater than 0",
            ));
        }
        Ok(Self {
            enabled: config.enabled,
            failure_threshold: config.failure_threshold,
            failure_rate_threshold: config.failure_rate_threshold,
            minimum_calls: config.minimum_calls.max(1),
            evaluation_window: Duration::from_millis(config.evaluation_window_ms),
            open_duration: Duration::from_millis(config.open_duration_ms),
            half_open_probe_count: config.half_open_probe_count,
        })
    }
}

/// Closed-state outcomes, oldest first, with running counts.
#[derive(Debug, Default)]
struct OutcomeWindow {
    entries: VecDeque<(Instant, bool)>,
    failures: u32,
    successes: u32,
}

impl OutcomeWindow {
    fn push(&mut self, at: Instant, failed: bool) {
        self.entries.push_back((at, failed));
        if failed {
            self.failures += 1;
        } else {
            self.successes += 1;
        }
    }

    /// Drop outcomes at least `max_age` old.
    fn evict(&mut self, now: Instant, max_age: Duration) {
        while let Some(&(at, failed)) = self.entries.front() {
            if now.saturating_duration_since(at) < max_age {
                break;
            }
            self.entries.pop_front();
            if failed {
                self.failures -= 1;
            } else {
                self.successes -= 1;
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.failures = 0;
        self.successes = 0;
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    window: OutcomeWindow,
    opened_at: Option<Instant>,
    probes_admitted: u32,
    probe_successes: u32,
    generation: u64,
}

/// Point-in-time view, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub probes_in_flight: u32,
    /// Time left before a probe is admitted, while Open.
    #[serde(skip)]
    pub retry_in: Option<Duration>,
}

/// Rejection returned by [`CircuitBreaker::allow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    pub state: CircuitState,
    /// Time until the next probe may be admitted, if known.
    pub retry_in: Option<Duration>,
}

/// Circuit breaker for one upstream target.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                window: OutcomeWindow::default(),
                opened_at: None,
                probes_admitted: 0,
                probe_successes: 0,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask to place a call. Open (and a full Half-Open) reject immediately.
    pub fn allow(self: &Arc<Self>) -> Result<CallPermit, BreakerRejection> {
        if !self.settings.enabled {
            return Ok(CallPermit::inert());
        }

        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(self.permit(&inner, false)),
            CircuitState::Open => {
                let retry_in = inner
                    .opened_at
                    .map(|at| (at + self.settings.open_duration).saturating_duration_since(now));
                tracing::debug!(target_key = %self.name, "Circuit open, rejecting call");
                Err(BreakerRejection {
                    state: CircuitState::Open,
                    retry_in,
                })
            }
            CircuitState::HalfOpen => {
                if inner.probes_admitted < self.settings.half_open_probe_count {
                    inner.probes_admitted += 1;
                    tracing::debug!(
                        target_key = %self.name,
                        probe = inner.probes_admitted,
                        of = self.settings.half_open_probe_count,
                        "Admitting half-open probe"
                    );
                    Ok(self.permit(&inner, true))
                } else {
                    Err(BreakerRejection {
                        state: CircuitState::HalfOpen,
                        retry_in: None,
                    })
                }
            }
        }
    }

    /// Current state, applying the Open → Half-Open timer if it elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);
        BreakerSnapshot {
            state: inner.state,
            failure_count: inner.window.failures,
            success_count: inner.window.successes,
            probes_in_flight: inner.probes_admitted.saturating_sub(inner.probe_successes),
            retry_in: match inner.state {
                CircuitState::Open => inner
                    .opened_at
                    .map(|at| (at + self.settings.open_duration).saturating_duration_since(now)),
                _ => None,
            },
        }
    }

    /// Force the breaker back to Closed with fresh counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to(&mut inner, CircuitState::Closed, Instant::now());
    }

    fn permit(self: &Arc<Self>, inner: &Inner, probe: bool) -> CallPermit {
        CallPermit {
            breaker: Some(Arc::clone(self)),
            generation: inner.generation,
            probe,
            recorded: false,
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(true, |at| now.saturating_duration_since(at) >= self.settings.open_duration);
                if elapsed {
                    self.transition_to(inner, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::Closed => inner.window.evict(now, self.settings.evaluation_window),
            CircuitState::HalfOpen => {}
        }
    }

    fn record(&self, generation: u64, probe: bool, verdict: BreakerVerdict) {
        let mut inner = self.inner.lock();
        if generation != inner.generation {
            tracing::trace!(target_key = %self.name, "Ignoring result from an earlier breaker state");
            return;
        }
        let now = Instant::now();
        self.refresh(&mut inner, now);
        if generation != inner.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                match verdict {
                    BreakerVerdict::Success => inner.window.push(now, false),
                    BreakerVerdict::Failure => inner.window.push(now, true),
                    BreakerVerdict::Neutral => return,
                }
                if self.should_trip(&inner) {
                    self.transition_to(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen if probe => match verdict {
                BreakerVerdict::Failure => {
                    tracing::warn!(target_key = %self.name, "Probe failed, reopening circuit");
                    self.transition_to(&mut inner, CircuitState::Open, now);
                }
                BreakerVerdict::Success | BreakerVerdict::Neutral => {
                    inner.probe_successes += 1;
                    if inner.probe_successes >= self.settings.half_open_probe_count {
                        self.transition_to(&mut inner, CircuitState::Closed, now);
                    }
                }
            },
            CircuitState::HalfOpen | CircuitState::Open => {}
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if generation == inner.generation
            && inner.state == CircuitState::HalfOpen
            && inner.probes_admitted > inner.probe_successes
        {
            inner.probes_admitted -= 1;
        }
    }

    fn should_trip(&self, inner: &Inner) -> bool {
        let window = &inner.window;
        if window.failures >= self.settings.failure_threshold {
            return true;
        }
        let total = window.failures + window.successes;
        total >= self.settings.minimum_calls
            && f64::from(window.failures) / f64::from(total) >= self.settings.failure_rate_threshold
    }

    fn transition_to(&self, inner: &mut Inner, new_state: CircuitState, now: Instant) {
        let old_state = inner.state;
        inner.state = new_state;
        inner.generation += 1;
        inner.probes_admitted = 0;
        inner.probe_successes = 0;

        match new_state {
            CircuitState::Closed => {
                inner.window.clear();
                inner.opened_at = None;
                tracing::info!(target_key = %self.name, from = old_state.as_str(), "Circuit breaker closed");
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
                tracing::warn!(
                    target_key = %self.name,
                    from = old_state.as_str(),
                    failures = inner.window.failures,
                    successes = inner.window.successes,
                    open_for = ?self.settings.open_duration,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(target_key = %self.name, "Circuit breaker half-open");
            }
        }
        metrics::record_circuit_state(&self.name, new_state);
    }
}

/// Permission to place one call. Record its verdict when the attempt ends.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Option<Arc<CircuitBreaker>>,
    generation: u64,
    probe: bool,
    recorded: bool,
}

impl CallPermit {
    fn inert() -> Self {
        Self {
            breaker: None,
            generation: 0,
            probe: false,
            recorded: true,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record(mut self, verdict: BreakerVerdict) {
        self.recorded = true;
        if let Some(breaker) = &self.breaker {
            breaker.record(self.generation, self.probe, verdict);
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.recorded || !self.probe {
            return;
        }
        if let Some(breaker) = &self.breaker {
            breaker.release_probe(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, probes: u32) -> Arc<CircuitBreaker> {
        let config = CircuitBreakerConfig {
            failure_threshold: threshold,
            half_open_probe_count: probes,
            open_duration_ms: 1_000,
            evaluation_window_ms: 10_000,
            ..CircuitBreakerConfig::default()
        };
        Arc::new(CircuitBreaker::new(
            "http://upstream:80",
            BreakerSettings::from_config(&config).unwrap(),
        ))
    }

    fn fail(cb: &Arc<CircuitBreaker>) {
        cb.allow().unwrap().record(BreakerVerdict::Failure);
    }

    fn succeed(cb: &Arc<CircuitBreaker>) {
        cb.allow().unwrap().record(BreakerVerdict::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trips_after_threshold() {
        let cb = breaker(5, 1);
        for _ in 0..4 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        let rejection = cb.allow().unwrap_err();
        assert_eq!(rejection.state, CircuitState::Open);
        assert_eq!(rejection.retry_in, Some(Duration::from_millis(1_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_to_half_open_to_closed() {
        let cb = breaker(2, 1);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(cb.allow().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let probe = cb.allow().unwrap();
        assert!(probe.is_probe());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        probe.record(BreakerVerdict::Success);

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert_eq!(snap.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let cb = breaker(1, 3);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;

        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().retry_in, Some(Duration::from_secs(1)), "opened_at was reset");
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_needs_every_probe() {
        let cb = breaker(1, 3);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;

        let probes: Vec<CallPermit> = (0..3).map(|_| cb.allow().unwrap()).collect();
        let extra = cb.allow().unwrap_err();
        assert_eq!(extra.state, CircuitState::HalfOpen, "fourth concurrent call rejected");

        for (i, probe) in probes.into_iter().enumerate() {
            assert_eq!(cb.state(), CircuitState::HalfOpen, "still probing after {i}");
            probe.record(BreakerVerdict::Success);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_frees_slot() {
        let cb = breaker(1, 1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;

        let probe = cb.allow().unwrap();
        assert!(cb.allow().is_err());
        drop(probe);
        assert!(cb.allow().is_ok(), "cancelled probe gave its slot back");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_rate_trips_after_minimum_calls() {
        let config = CircuitBreakerConfig {
            failure_threshold: 100,
            failure_rate_threshold: 0.5,
            minimum_calls: 4,
            ..CircuitBreakerConfig::default()
        };
        let cb = Arc::new(CircuitBreaker::new("t", BreakerSettings::from_config(&config).unwrap()));
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed, "1/1 failed but below minimum calls");
        succeed(&cb);
        succeed(&cb);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open, "2/4 = 50%");
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_counts() {
        let cb = breaker(3, 1);
        fail(&cb);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_straddling_window_boundary_trip() {
        let cb = breaker(5, 1);
        tokio::time::advance(Duration::from_millis(9_900)).await;
        for _ in 0..4 {
            fail(&cb);
        }
        tokio::time::advance(Duration::from_millis(200)).await;
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open, "5 failures within 200ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_age_out_one_by_one() {
        let cb = breaker(3, 1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(6)).await;
        fail(&cb);
        succeed(&cb);
        tokio::time::advance(Duration::from_secs(5)).await;

        let snap = cb.snapshot();
        assert_eq!(snap.failure_count, 1, "only the first failure has aged out");
        assert_eq!(snap.success_count, 1);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_neutral_outcomes_do_not_count() {
        let cb = breaker(2, 1);
        for _ in 0..10 {
            cb.allow().unwrap().record(BreakerVerdict::Neutral);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_results_are_ignored() {
        let cb = breaker(1, 1);
        let slow = cb.allow().unwrap();
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Admitted while Closed; must not count as a probe.
        slow.record(BreakerVerdict::Success);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_breaker_always_allows() {
        let config = CircuitBreakerConfig {
            enabled: false,
            failure_threshold: 1,
            ..CircuitBreakerConfig::default()
        };
        let cb = Arc::new(CircuitBreaker::new("t", BreakerSettings::from_config(&config).unwrap()));
        for _ in 0..5 {
            fail(&cb);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_invalid_settings() {
        let bad = CircuitBreakerConfig {
            half_open_probe_count: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(BreakerSettings::from_config(&bad).is_err());
        let bad = CircuitBreakerConfig {
            failure_rate_threshold: 1.5,
            ..CircuitBreakerConfig::default()
        };
        assert!(BreakerSettings::from_config(&bad).is_err());
    }

    #[test]
    fn test_reset_closes() {
        let cb = breaker(1, 1);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
