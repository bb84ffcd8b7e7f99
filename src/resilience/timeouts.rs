//! Timeout enforcement.
//!
//! # Responsibilities
//! - Carry the per-attempt connect/read/write timeouts to the transport
//! - Track the optional total deadline of one logical call
//! - Bound each attempt and each wait so nothing runs past the deadline
//!
//! # Design Decisions
//! - Uses Tokio's clock so paused-time tests observe exact waits
//! - Timeout errors are distinct from other errors

use std::time::Duration;

use tokio::time::Instant;

use crate::config::schema::TimeoutConfig;

/// Timeouts applied to every single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl AttemptTimeouts {
    pub fn from_config(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_timeout_ms),
            read: Duration::from_millis(config.read_timeout_ms),
            write: Duration::from_millis(config.write_timeout_ms),
        }
    }

    /// Upper bound for a whole attempt: connect, send the body, read the reply.
    pub fn ceiling(&self) -> Duration {
        self.connect
            .saturating_add(self.write)
            .saturating_add(self.read)
    }
}

impl Default for AttemptTimeouts {
    fn default() -> Self {
        Self::from_config(&TimeoutConfig::default())
    }
}

/// Absolute end time of a logical call, if it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(total: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(total),
        }
    }

    pub fn from_option(total: Option<Duration>) -> Self {
        total.map_or_else(Self::none, Self::after)
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }

    /// True when waiting `wait` and then starting another attempt would
    /// land at or past the deadline.
    pub fn would_exceed(&self, wait: Duration) -> bool {
        self.remaining().is_some_and(|left| wait >= left)
    }

    /// Shrink an attempt budget so it ends no later than the deadline.
    pub fn bound(&self, budget: Duration) -> Duration {
        match self.remaining() {
            Some(left) => budget.min(left),
            None => budget,
        }
    }
}
