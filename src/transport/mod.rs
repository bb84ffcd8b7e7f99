//! Transport boundary.
//!
//! # Data Flow
//! ```text
//! RequestExecutor
//!     → Transport::send(request, timeouts)   (one attempt)
//!     → Ok(Response)            any HTTP status, headers, body
//!     → Err(TransportError)     classified network-level failure
//! ```
//!
//! # Design Decisions
//! - The executor never sees a transport-specific error type; everything
//!   is mapped to a `TransportErrorKind` so the retry table stays in one place
//! - Implementations apply the per-attempt connect/read/write timeouts; the
//!   executor additionally bounds every attempt with a hard deadline

pub mod http;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::executor::{Request, Response};
use crate::resilience::timeouts::AttemptTimeouts;

pub use self::http::HttpTransport;

/// Network-level failure classes the retry policy understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    ConnectionRefused,
    ConnectionReset,
    ConnectTimeout,
    ReadTimeout,
    WriteTimeout,
    DnsFailure,
    TlsFailure,
    /// Anything that could not be classified (malformed request, ...).
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::ConnectionRefused => "connection_refused",
            TransportErrorKind::ConnectionReset => "connection_reset",
            TransportErrorKind::ConnectTimeout => "connect_timeout",
            TransportErrorKind::ReadTimeout => "read_timeout",
            TransportErrorKind::WriteTimeout => "write_timeout",
            TransportErrorKind::DnsFailure => "dns_failure",
            TransportErrorKind::TlsFailure => "tls_failure",
            TransportErrorKind::Other => "other",
        }
    }

    /// True for the timeout family.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::ConnectTimeout
                | TransportErrorKind::ReadTimeout
                | TransportErrorKind::WriteTimeout
        )
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed attempt that never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<TransportErrorKind> for TransportError {
    fn from(kind: TransportErrorKind) -> Self {
        Self::new(kind, kind.as_str())
    }
}

/// Performs a single HTTP attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &Request,
        timeouts: &AttemptTimeouts,
    ) -> Result<Response, TransportError>;
}
