//! Client-side rate limiting with tiered, priority-aware throttling.
//!
//! # Responsibilities
//! - Track the server-advertised budget (limit / remaining / reset)
//! - Throttle preemptively as the budget drains, shedding low priorities first
//! - Enforce an optional local ceiling (requests per second) with a token bucket
//!
//! # Throttling Tiers
//! ```text
//! remaining / limit   Low        Normal     High       Critical
//! > 50%               allow      allow      allow      allow
//! 25% - 50%           throttle   allow      allow      allow
//! 10% - 25%           throttle   throttle   allow      allow
//! < 10%               deny       deny       pace       allow
//! 0                   deny       deny       deny       deny     (until reset)
//! ```
//! A throttled call is told how long to wait. The executor only waits for
//! High and Critical; lower priorities fail fast.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::schema::RateLimitConfig;
use crate::executor::response::RateLimitSnapshot;

/// Reset times that move by less than this are the same window.
const RESET_TOLERANCE: Duration = Duration::from_secs(1);

/// Caller-assigned importance of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// High and above wait out a throttle instead of failing fast.
    pub fn waits_when_throttled(&self) -> bool {
        *self >= Priority::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown priority `{0}` (expected low, normal, high or critical)")]
pub struct ParsePriorityError(String);

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(ParsePriorityError(s.to_string())),
        }
    }
}

/// Result of [`RateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Throttled(Duration),
}

/// Server-advertised quota for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: Option<Instant>,
}

impl RateBudget {
    /// Apply the reset event if `reset_at` has been reached.
    fn refresh(&mut self, now: Instant) {
        if let Some(reset_at) = self.reset_at {
            if now >= reset_at {
                self.remaining = self.limit;
                self.reset_at = None;
                tracing::debug!(limit = self.limit, "Rate budget window reset");
            }
        }
    }

    fn until_reset(&self, now: Instant) -> Option<Duration> {
        self.reset_at.map(|at| at.saturating_duration_since(now))
    }

    /// Even spacing of the remaining budget across the rest of the window.
    fn pace(&self, now: Instant) -> Duration {
        match self.until_reset(now) {
            Some(left) if self.remaining > 0 => {
                let divisor = u32::try_from(self.remaining).unwrap_or(u32::MAX);
                left / divisor
            }
            _ => Duration::ZERO,
        }
    }
}

/// What a tier does to a given priority.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TierAction {
    Allow,
    /// Cut the effective rate by this fraction.
    Reduce(f64),
    /// Deny until the window resets.
    DenyUntilReset,
}

fn tier_action(remaining: u64, limit: u64, priority: Priority) -> TierAction {
    if remaining == 0 {
        return TierAction::DenyUntilReset;
    }
    let fraction = remaining as f64 / limit as f64;

    if fraction > 0.5 {
        TierAction::Allow
    } else if fraction > 0.25 {
        match priority {
            Priority::Low => TierAction::Reduce(0.25),
            _ => TierAction::Allow,
        }
    } else if fraction > 0.10 {
        match priority {
            Priority::Low | Priority::Normal => TierAction::Reduce(0.5),
            _ => TierAction::Allow,
        }
    } else {
        match priority {
            Priority::Low | Priority::Normal => TierAction::DenyUntilReset,
            Priority::High => TierAction::Reduce(1.0),
            Priority::Critical => TierAction::Allow,
        }
    }
}

/// A simple token bucket enforcing the local ceiling.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }

    /// Take a token now, or report how long until one is available.
    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> Result<(), Duration> {
        self.refill(capacity, refill_rate);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_rate))
        }
    }

    /// Take a token even if it is not there yet; returns the wait that
    /// makes the reservation good.
    fn reserve(&mut self, capacity: f64, refill_rate: f64) -> Duration {
        self.refill(capacity, refill_rate);
        self.tokens -= 1.0;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-self.tokens / refill_rate)
        }
    }
}

/// Rate limiter for one target.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    enabled: bool,
    budget: Mutex<Option<RateBudget>>,
    ceiling: Option<(f64, Mutex<TokenBucket>)>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, config: &RateLimitConfig) -> Self {
        let ceiling = config
            .local_rate_ceiling
            .filter(|rps| *rps > 0)
            .map(|rps| {
                let rps = f64::from(rps);
                (rps, Mutex::new(TokenBucket::new(rps)))
            });
        Self {
            name: name.into(),
            enabled: config.enabled,
            budget: Mutex::new(None),
            ceiling,
        }
    }

    /// Decide whether a call of `priority` may go now.
    pub fn admit(&self, priority: Priority) -> Admission {
        if !self.enabled {
            return Admission::Allowed;
        }

        let now = Instant::now();
        let mut wait = Duration::ZERO;

        {
            let mut guard = self.budget.lock();
            if let Some(budget) = guard.as_mut() {
                budget.refresh(now);
                if budget.limit > 0 {
                    match tier_action(budget.remaining, budget.limit, priority) {
                        TierAction::Allow => {}
                        TierAction::Reduce(fraction) => {
                            wait = budget.pace(now).mul_f64(fraction);
                        }
                        TierAction::DenyUntilReset => {
                            // Without a known reset there is nothing to wait for.
                            if let Some(left) = budget.until_reset(now) {
                                tracing::debug!(
                                    target_key = %self.name,
                                    priority = %priority,
                                    remaining = budget.remaining,
                                    retry_in = ?left,
                                    "Rate budget nearly spent, denying"
                                );
                                return Admission::Throttled(left);
                            }
                        }
                    }
                }
            }
        }

        if !wait.is_zero() && !priority.waits_when_throttled() {
            return Admission::Throttled(wait);
        }

        if let Some((rps, bucket)) = &self.ceiling {
            let mut bucket = bucket.lock();
            if priority.waits_when_throttled() {
                wait = wait.max(bucket.reserve(*rps, *rps));
            } else if let Err(until_token) = bucket.try_acquire(*rps, *rps) {
                return Admission::Throttled(until_token);
            }
        }

        if wait.is_zero() {
            Admission::Allowed
        } else {
            Admission::Throttled(wait)
        }
    }

    /// Account for a call actually sent.
    pub fn consume(&self) {
        if !self.enabled {
            return;
        }
        let mut guard = self.budget.lock();
        if let Some(budget) = guard.as_mut() {
            budget.refresh(Instant::now());
            budget.remaining = budget.remaining.saturating_sub(1);
        }
    }

    /// Fold in the budget the server advertised on a response.
    pub fn update(&self, snapshot: RateLimitSnapshot) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        let reset_at = snapshot.reset_in.map(|d| now + d);
        let remaining = snapshot.remaining.min(snapshot.limit);

        let mut guard = self.budget.lock();
        match guard.as_mut() {
            None => {
                *guard = Some(RateBudget {
                    limit: snapshot.limit,
                    remaining,
                    reset_at,
                });
            }
            Some(budget) => {
                budget.refresh(now);
                let new_window = match (budget.reset_at, reset_at) {
                    (Some(current), Some(next)) => next > current + RESET_TOLERANCE,
                    (None, _) => true,
                    (Some(_), None) => false,
                };
                budget.limit = snapshot.limit;
                if new_window {
                    budget.remaining = remaining;
                    budget.reset_at = reset_at;
                } else {
                    budget.remaining = budget.remaining.min(remaining);
                }
                budget.remaining = budget.remaining.min(budget.limit);
            }
        }
    }

    /// Current budget, after applying any due reset.
    pub fn budget(&self) -> Option<RateBudget> {
        let mut guard = self.budget.lock();
        if let Some(budget) = guard.as_mut() {
            budget.refresh(Instant::now());
        }
        *guard
    }
}
