//! Upstream response and the headers the resilience core reads from it.
//!
//! # Responsibilities
//! - Hold status, headers and the fully read body of one attempt
//! - Parse `Retry-After` (delta-seconds or HTTP-date)
//! - Parse rate-limit headers into a budget snapshot

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderValue, IntoHeaderName, RETRY_AFTER};
use http::{HeaderMap, StatusCode};

/// Reset values above this are Unix timestamps; below, delta-seconds.
const EPOCH_THRESHOLD_SECS: u64 = 1_000_000_000;

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header<K: IntoHeaderName>(mut self, name: K, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Server-requested wait, only honoured on 429 and 503.
    pub fn retry_after(&self) -> Option<Duration> {
        if self.status != StatusCode::TOO_MANY_REQUESTS
            && self.status != StatusCode::SERVICE_UNAVAILABLE
        {
            return None;
        }
        let value = self.headers.get(RETRY_AFTER)?.to_str().ok()?;
        parse_retry_after(value, Utc::now())
    }

    /// Rate-limit headers, if the upstream advertises a budget.
    pub fn rate_limit(&self) -> Option<RateLimitSnapshot> {
        RateLimitSnapshot::from_headers(&self.headers, unix_now())
    }
}

/// Parse a `Retry-After` value relative to `now`. Dates in the past yield zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Budget advertised by the server on one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub limit: u64,
    pub remaining: u64,
    /// Time until the window resets, when the server says.
    pub reset_in: Option<Duration>,
}

impl RateLimitSnapshot {
    /// Read `X-RateLimit-*`, falling back to the IETF `RateLimit-*` names.
    ///
    /// Both limit and remaining must be present; `remaining` is clamped to
    /// `limit`.
    pub fn from_headers(headers: &HeaderMap, now_unix: u64) -> Option<Self> {
        let limit = header_u64(headers, "x-ratelimit-limit")
            .or_else(|| header_u64(headers, "ratelimit-limit"))?;
        let remaining = header_u64(headers, "x-ratelimit-remaining")
            .or_else(|| header_u64(headers, "ratelimit-remaining"))?;
        let reset = header_u64(headers, "x-ratelimit-reset")
            .or_else(|| header_u64(headers, "ratelimit-reset"));

        let reset_in = reset.map(|value| {
            if value >= EPOCH_THRESHOLD_SECS {
                Duration::from_secs(value.saturating_sub(now_unix))
            } else {
                Duration::from_secs(value)
            }
        });

        Some(Self {
            limit,
            remaining: remaining.min(limit),
            reset_in,
        })
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("120", now), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 3 ", now), Some(Duration::from_secs(3)));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        let wait = parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now);
        assert_eq!(wait, Some(Duration::from_secs(30)));

        let past = parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now);
        assert_eq!(past, Some(Duration::ZERO));
    }

    #[test]
    fn test_retry_after_only_on_429_and_503() {
        let with = |status| {
            Response::new(status)
                .with_header(RETRY_AFTER, HeaderValue::from_static("7"))
                .retry_after()
        };
        assert_eq!(with(StatusCode::TOO_MANY_REQUESTS), Some(Duration::from_secs(7)));
        assert_eq!(with(StatusCode::SERVICE_UNAVAILABLE), Some(Duration::from_secs(7)));
        assert_eq!(with(StatusCode::BAD_GATEWAY), None);
    }

    #[test]
    fn test_rate_limit_unix_reset() {
        let h = headers(&[
            ("x-ratelimit-limit", "100"),
            ("x-ratelimit-remaining", "42"),
            ("x-ratelimit-reset", "1700000060"),
        ]);
        let snap = RateLimitSnapshot::from_headers(&h, 1_700_000_000).unwrap();
        assert_eq!(snap.limit, 100);
        assert_eq!(snap.remaining, 42);
        assert_eq!(snap.reset_in, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_rate_limit_delta_reset_and_ietf_names() {
        let h = headers(&[
            ("ratelimit-limit", "10"),
            ("ratelimit-remaining", "50"),
            ("ratelimit-reset", "30"),
        ]);
        let snap = RateLimitSnapshot::from_headers(&h, 1_700_000_000).unwrap();
        assert_eq!(snap.remaining, 10, "remaining is clamped to limit");
        assert_eq!(snap.reset_in, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_rate_limit_requires_limit_and_remaining() {
        let h = headers(&[("x-ratelimit-remaining", "5")]);
        assert!(RateLimitSnapshot::from_headers(&h, 0).is_none());
    }
}
