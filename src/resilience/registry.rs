//! Per-target shared state.
//!
//! # Responsibilities
//! - Derive a stable key for each logical upstream target
//! - Create the breaker and rate limiter for a key lazily, at most once
//! - Expose a serializable snapshot for diagnostics
//!
//! # Design Decisions
//! - The registry is owned by the executor (or injected), never a static, so
//!   independent clients in one process do not share state
//! - `DashMap` shards its locks, so targets never contend with each other;
//!   the entry API gives at-most-once construction per key

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use url::Url;

use crate::config::schema::{CircuitBreakerConfig, RateLimitConfig};
use crate::error::InvalidArgument;
use crate::resilience::circuit_breaker::{BreakerSettings, BreakerSnapshot, CircuitBreaker};
use crate::resilience::rate_limit::RateLimiter;

/// Identity of a logical upstream: scheme, host, port and an optional path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TargetKey(String);

impl TargetKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for `url`, keeping the first `path_segments` path segments.
    ///
    /// The port is always explicit so `http://a` and `http://a:80` share state.
    pub fn from_url(url: &Url, path_segments: usize) -> Self {
        let host = url.host_str().unwrap_or_default();
        let mut key = match url.port_or_known_default() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        if path_segments > 0 {
            if let Some(segments) = url.path_segments() {
                for segment in segments.filter(|s| !s.is_empty()).take(path_segments) {
                    key.push('/');
                    key.push_str(segment);
                }
            }
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything shared by calls to one target.
#[derive(Debug)]
pub struct TargetState {
    pub breaker: Arc<CircuitBreaker>,
    pub limiter: RateLimiter,
}

/// Rate budget view for snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetSnapshot {
    pub limit: u64,
    pub remaining: u64,
    pub reset_in_ms: Option<u64>,
}

/// Diagnostic view of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub target: TargetKey,
    pub breaker: BreakerSnapshot,
    pub budget: Option<BudgetSnapshot>,
}

/// Process-local registry of per-target state.
#[derive(Debug)]
pub struct TargetRegistry {
    targets: DashMap<TargetKey, Arc<TargetState>>,
    breaker: BreakerSettings,
    rate_limit: RateLimitConfig,
}

impl TargetRegistry {
    pub fn new(
        breaker: &CircuitBreakerConfig,
        rate_limit: &RateLimitConfig,
    ) -> Result<Self, InvalidArgument> {
        Ok(Self {
            targets: DashMap::new(),
            breaker: BreakerSettings::from_config(breaker)?,
            rate_limit: rate_limit.clone(),
        })
    }

    /// State for `key`, created on first use.
    pub fn get_or_create(&self, key: &TargetKey) -> Arc<TargetState> {
        if let Some(state) = self.targets.get(key) {
            return Arc::clone(state.value());
        }

        let entry = self.targets.entry(key.clone()).or_insert_with(|| {
            tracing::debug!(target_key = %key, "Registering upstream target");
            Arc::new(TargetState {
                breaker: Arc::new(CircuitBreaker::new(key.as_str(), self.breaker.clone())),
                limiter: RateLimiter::new(key.as_str(), &self.rate_limit),
            })
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, key: &TargetKey) -> Option<Arc<TargetState>> {
        self.targets.get(key).map(|state| Arc::clone(state.value()))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Snapshot of every known target, sorted by key.
    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        let mut snapshots: Vec<TargetSnapshot> = self
            .targets
            .iter()
            .map(|entry| {
                let state = entry.value();
                TargetSnapshot {
                    target: entry.key().clone(),
                    breaker: state.breaker.snapshot(),
                    budget: state.limiter.budget().map(|budget| BudgetSnapshot {
                        limit: budget.limit,
                        remaining: budget.remaining,
                        reset_in_ms: budget.reset_at.map(|at| {
                            at.saturating_duration_since(tokio::time::Instant::now())
                                .as_millis() as u64
                        }),
                    }),
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;

    fn registry() -> TargetRegistry {
        TargetRegistry::new(&CircuitBreakerConfig::default(), &RateLimitConfig::default()).unwrap()
    }

    #[test]
    fn test_target_key_from_url() {
        let url = Url::parse("https://api.example.com/v1/users/42?x=1").unwrap();
        assert_eq!(TargetKey::from_url(&url, 0).as_str(), "https://api.example.com:443");
        assert_eq!(
            TargetKey::from_url(&url, 2).as_str(),
            "https://api.example.com:443/v1/users"
        );
        assert_eq!(
            TargetKey::from_url(&url, 10).as_str(),
            "https://api.example.com:443/v1/users/42"
        );

        let explicit = Url::parse("http://api.example.com:80/").unwrap();
        let implicit = Url::parse("http://api.example.com").unwrap();
        assert_eq!(TargetKey::from_url(&explicit, 0), TargetKey::from_url(&implicit, 0));
    }

    #[tokio::test]
    async fn test_get_or_create_is_shared() {
        let registry = registry();
        let key = TargetKey::new("http://a:80");
        let first = registry.get_or_create(&key);
        let second = registry.get_or_create(&key);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&TargetKey::new("http://b:80")).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_creation_yields_one_state() {
        let registry = Arc::new(registry());
        let key = TargetKey::new("http://shared:80");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let key = key.clone();
                tokio::spawn(async move { registry.get_or_create(&key) })
            })
            .collect();

        let mut states = Vec::new();
        for handle in handles {
            states.push(handle.await.unwrap());
        }
        assert!(states.iter().all(|s| Arc::ptr_eq(s, &states[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_sorted() {
        let registry = registry();
        registry.get_or_create(&TargetKey::new("http://b:80"));
        registry.get_or_create(&TargetKey::new("http://a:80"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].target.as_str(), "http://a:80");
        assert_eq!(snapshot[0].breaker.state, CircuitState::Closed);
        assert!(snapshot[0].budget.is_none());
    }

    #[test]
    fn test_invalid_breaker_settings_rejected() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..CircuitBreakerConfig::default()
        };
        assert!(TargetRegistry::new(&config, &RateLimitConfig::default()).is_err());
    }
}
