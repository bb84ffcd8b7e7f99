//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::InvalidArgument;

/// How randomness is applied to the capped exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    /// Exact capped delay.
    None,
    /// Uniform in `[0, capped]`.
    #[default]
    Full,
    /// Uniform in `[capped / 2, capped]`.
    Equal,
}

/// Compute the wait before retry number `attempt` (0-based).
///
/// `raw = base * 2^attempt`, capped at `max`, then jittered. The RNG is
/// passed in so tests can seed it.
pub fn compute_delay<R: Rng + ?Sized>(
    base: Duration,
    attempt: u32,
    max: Duration,
    jitter: JitterMode,
    rng: &mut R,
) -> Result<Duration, InvalidArgument> {
    let (base_ms, max_ms) = check_bounds(base, max)?;
    Ok(Duration::from_millis(jittered_ms(base_ms, attempt, max_ms, jitter, rng)))
}

fn check_bounds(base: Duration, max: Duration) -> Result<(u64, u64), InvalidArgument> {
    let base_ms = duration_ms(base);
    let max_ms = duration_ms(max);

    if base_ms == 0 {
        return Err(InvalidArgument::new("base_delay_ms", "must be greater than 0"));
    }
    if max_ms < base_ms {
        return Err(InvalidArgument::new(
            "max_delay_ms",
            format!("must be >= base_delay_ms ({max_ms} < {base_ms})"),
        ));
    }
    Ok((base_ms, max_ms))
}

fn jittered_ms<R: Rng + ?Sized>(
    base_ms: u64,
    attempt: u32,
    max_ms: u64,
    jitter: JitterMode,
    rng: &mut R,
) -> u64 {
    let raw = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped = raw.min(max_ms);

    match jitter {
        JitterMode::None => capped,
        JitterMode::Full => rng.gen_range(0..=capped),
        JitterMode::Equal => {
            let half = capped / 2;
            half + rng.gen_range(0..=half)
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Validated backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter: JitterMode,
}

impl Backoff {
    /// Build a backoff, rejecting `base == 0` and `max < base`.
    pub fn new(base: Duration, max: Duration, jitter: JitterMode) -> Result<Self, InvalidArgument> {
        let (base_ms, max_ms) = check_bounds(base, max)?;
        Ok(Self {
            base_ms,
            max_ms,
            jitter,
        })
    }

    /// Delay for retry number `attempt`.
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        Duration::from_millis(jittered_ms(self.base_ms, attempt, self.max_ms, self.jitter, rng))
    }

    /// Clamp a server-provided wait (`Retry-After`) to the configured maximum.
    pub fn clamp(&self, wait: Duration) -> Duration {
        wait.min(self.max())
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn jitter(&self) -> JitterMode {
        self.jitter
    }
}
