//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to upstream target:
//!     → registry.rs (per-target breaker + limiter, created on first use)
//!     → rate_limit.rs (admit by priority against the advertised budget)
//!     → circuit_breaker.rs (fail fast while Open, bounded probes in Half-Open)
//!     → timeouts.rs (per-attempt timeouts bounded by the total deadline)
//!     → outcome.rs (classify the attempt)
//!     → On failure: retries.rs (retryable? idempotent? budget left?)
//!         → backoff.rs (exponential delay with jitter, or Retry-After)
//! ```
//!
//! # Design Decisions
//! - Retries only for idempotent requests (GET, HEAD, PUT, DELETE, ...) or
//!   requests carrying an `Idempotency-Key`
//! - Per-target state is injected, never global
//! - Every piece is usable on its own; the executor only composes them

pub mod backoff;
pub mod circuit_breaker;
pub mod outcome;
pub mod rate_limit;
pub mod registry;
pub mod retries;
pub mod timeouts;
