//! Outgoing request and per-call options.
//!
//! # Responsibilities
//! - Hold the prepared request (method, URL, headers, body)
//! - Decide idempotency from the method and the `Idempotency-Key` header
//! - Attach a unique request ID for tracing
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The body is `Bytes` so every attempt re-sends a cheap clone

use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, IntoHeaderName};
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::resilience::rate_limit::Priority;

/// Header carrying the per-call correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Header whose presence makes a POST/PATCH retry-eligible.
pub const IDEMPOTENCY_KEY: &str = "idempotency-key";

/// A prepared HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::GET, Url::parse(url)?))
    }

    pub fn post(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::POST, Url::parse(url)?))
    }

    pub fn header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Mark a non-idempotent request as safe to retry.
    pub fn idempotency_key(self, key: HeaderValue) -> Self {
        self.header(HeaderName::from_static(IDEMPOTENCY_KEY), key)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn has_idempotency_key(&self) -> bool {
        self.headers.contains_key(IDEMPOTENCY_KEY)
    }

    /// GET, HEAD, PUT, DELETE, OPTIONS and TRACE are idempotent by method;
    /// anything else needs an `Idempotency-Key`.
    pub fn is_idempotent(&self) -> bool {
        self.method.is_idempotent() || self.has_idempotency_key()
    }

    /// Return the request ID, generating and attaching one if absent.
    pub fn ensure_request_id(&mut self) -> String {
        if let Some(id) = self
            .headers
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
        {
            return id.to_string();
        }

        let id = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&id) {
            self.headers.insert(X_REQUEST_ID, value);
        }
        id
    }
}

/// Per-call knobs for [`RequestExecutor::execute`](crate::RequestExecutor::execute).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub priority: Priority,
    /// Overrides the method/header based idempotency decision.
    pub idempotent: Option<bool>,
    /// Total deadline for all attempts and waits; falls back to config.
    pub deadline: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}
