//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Executor and breakers produce:
//!     → tracing events and spans (one `execute` span per call, carrying the
//!       request ID and target)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every attempt of a call
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
