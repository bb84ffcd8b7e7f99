//! HTTP transport backed by `reqwest`.
//!
//! # Responsibilities
//! - Send one attempt with the configured timeouts
//! - Read the whole body so the attempt is complete when `send` returns
//! - Map `reqwest` failures onto `TransportErrorKind`
//!
//! # Design Decisions
//! - One pooled `reqwest::Client` per transport; retries reuse connections
//! - Classification walks the error source chain, since `reqwest` exposes
//!   DNS and TLS failures only through their messages

use std::error::Error as StdError;
use std::io;

use async_trait::async_trait;

use crate::executor::{Request, Response};
use crate::resilience::timeouts::AttemptTimeouts;
use crate::transport::{Transport, TransportError, TransportErrorKind};

/// `Transport` over a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client whose connect timeout matches `timeouts`.
    pub fn new(timeouts: &AttemptTimeouts) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Other, e.to_string()))?;
        Ok(Self { client })
    }

    /// Use a caller-configured client (proxies, TLS roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &Request,
        timeouts: &AttemptTimeouts,
    ) -> Result<Response, TransportError> {
        let response = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone())
            .body(request.body_bytes().clone())
            .timeout(timeouts.write.saturating_add(timeouts.read))
            .send()
            .await
            .map_err(|e| map_error(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| map_error(&e))?;

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

fn map_error(err: &reqwest::Error) -> TransportError {
    let kind = classify(err);
    tracing::debug!(kind = %kind, error = %err, "Transport attempt failed");
    TransportError::new(kind, error_chain(err))
}

/// Map a `reqwest` error onto the retry table's failure classes.
///
/// Only the source chain is matched against message text. The top-level
/// message carries the request URL, and a host or path must never decide
/// the class.
pub fn classify(err: &reqwest::Error) -> TransportErrorKind {
    if err.is_timeout() {
        return if err.is_connect() {
            TransportErrorKind::ConnectTimeout
        } else {
            TransportErrorKind::ReadTimeout
        };
    }

    if let Some(kind) = io_kind(err) {
        match kind {
            io::ErrorKind::ConnectionRefused => return TransportErrorKind::ConnectionRefused,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => return TransportErrorKind::ConnectionReset,
            io::ErrorKind::TimedOut => {
                return if err.is_connect() {
                    TransportErrorKind::ConnectTimeout
                } else {
                    TransportErrorKind::ReadTimeout
                };
            }
            _ => {}
        }
    }

    let sources = source_chain(err).to_ascii_lowercase();
    if sources.contains("dns error") || sources.contains("failed to lookup address") {
        return TransportErrorKind::DnsFailure;
    }
    if sources.contains("certificate") || sources.contains("tls") || sources.contains("ssl") {
        return TransportErrorKind::TlsFailure;
    }

    if err.is_connect() {
        TransportErrorKind::ConnectionRefused
    } else if err.is_body() || err.is_decode() {
        TransportErrorKind::ConnectionReset
    } else {
        TransportErrorKind::Other
    }
}

fn io_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = current.source();
    }
    None
}

/// Messages of every error below `err`, without `err` itself.
fn source_chain(err: &reqwest::Error) -> String {
    let mut parts = Vec::new();
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(current) = source {
        parts.push(current.to_string());
        source = current.source();
    }
    parts.join(": ")
}

fn error_chain(err: &reqwest::Error) -> String {
    let sources = source_chain(err);
    if sources.is_empty() {
        err.to_string()
    } else {
        format!("{err}: {sources}")
    }
}
