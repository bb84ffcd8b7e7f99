//! Resilient HTTP client core.
//!
//! Wraps an arbitrary HTTP transport with retry + backoff, a per-target
//! circuit breaker and client-side rate limiting.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller
//!       │  execute(request, options)
//!       ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │                  RequestExecutor                     │
//!  │                                                      │
//!  │   TargetRegistry ──▶ RateLimiter ──▶ CircuitBreaker  │
//!  │        (per target, created on first use)            │
//!  │                                                      │
//!  │   RetryPolicy ──▶ Backoff (jitter, Retry-After)      │
//!  └──────────────────────────┬───────────────────────────┘
//!                             │ one attempt at a time
//!                             ▼
//!                   Transport (reqwest by default)
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use error::{ExecutorError, InvalidArgument, NotRetried};
pub use executor::{CallOptions, Request, RequestExecutor, RequestExecutorBuilder, Response};
pub use resilience::rate_limit::Priority;
pub use resilience::registry::{TargetKey, TargetRegistry};
pub use transport::{HttpTransport, Transport, TransportError, TransportErrorKind};
