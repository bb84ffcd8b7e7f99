//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use http::header::HeaderValue;
use http::{HeaderMap, Method, StatusCode};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::Instant;

use resilient_http::resilience::backoff::JitterMode;
use resilient_http::resilience::timeouts::AttemptTimeouts;
use resilient_http::{
    ClientConfig, Request, RequestExecutor, Response, Transport, TransportError,
    TransportErrorKind,
};

/// One scripted reaction of the fake transport.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    StatusWith(u16, Vec<(&'static str, &'static str)>),
    Fail(TransportErrorKind),
    /// Answer with the status after a delay.
    Delayed(Duration, u16),
    /// Never answer.
    Hang,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub method: Method,
    pub headers: HeaderMap,
}

/// Transport that plays back a script and records every call.
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    /// Play `steps` in order, then answer 200.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            fallback: Step::Status(200),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Answer every call with `step`.
    pub fn repeating(step: Step) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: step,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Time between consecutive calls.
    pub fn gaps(&self) -> Vec<Duration> {
        let calls = self.calls.lock();
        calls
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

fn response(status: u16, headers: &[(&'static str, &'static str)]) -> Response {
    let mut response = Response::new(StatusCode::from_u16(status).unwrap());
    for (name, value) in headers {
        response = response.with_header(*name, HeaderValue::from_static(value));
    }
    response
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: &Request,
        _timeouts: &AttemptTimeouts,
    ) -> Result<Response, TransportError> {
        let step = self
            .steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        self.calls.lock().push(RecordedCall {
            at: Instant::now(),
            method: request.method().clone(),
            headers: request.headers().clone(),
        });

        match step {
            Step::Status(status) => Ok(response(status, &[])),
            Step::StatusWith(status, headers) => Ok(response(status, &headers)),
            Step::Fail(kind) => Err(kind.into()),
            Step::Delayed(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(response(status, &[]))
            }
            Step::Hang => std::future::pending().await,
        }
    }
}

/// Deterministic config: no jitter, 100ms base, 3 retries.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.retries.jitter = JitterMode::None;
    config.retries.base_delay_ms = 100;
    config.retries.max_delay_ms = 10_000;
    config.retries.max_retries = 3;
    config
}

pub fn executor(config: ClientConfig, transport: Arc<ScriptedTransport>) -> RequestExecutor {
    RequestExecutor::builder()
        .config(config)
        .transport(transport)
        .rng_seed(42)
        .build()
        .unwrap()
}

/// A programmable upstream HTTP server on an ephemeral port.
pub struct Upstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<HeaderMap>>>,
    bodies: Arc<Mutex<Vec<Bytes>>>,
}

impl Upstream {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request headers received, in arrival order.
    pub fn seen_headers(&self) -> Vec<HeaderMap> {
        self.seen.lock().clone()
    }

    /// Request bodies received, in arrival order.
    pub fn seen_bodies(&self) -> Vec<Bytes> {
        self.bodies.lock().clone()
    }
}

/// Start an upstream whose reply is computed from the 0-based hit number.
pub async fn start_upstream<F, Fut>(f: F) -> Upstream
where
    F: Fn(u32) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = (StatusCode, HeaderMap, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let app: Router = {
        let hits = Arc::clone(&hits);
        let seen = Arc::clone(&seen);
        let bodies = Arc::clone(&bodies);
        Router::new().fallback(move |headers: HeaderMap, body: Bytes| {
            let f = f.clone();
            let hits = Arc::clone(&hits);
            let seen = Arc::clone(&seen);
            let bodies = Arc::clone(&bodies);
            async move {
                seen.lock().push(headers);
                bodies.lock().push(body);
                let n = hits.fetch_add(1, Ordering::SeqCst);
                f(n).await
            }
        })
    };

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Upstream {
        addr,
        hits,
        seen,
        bodies,
    }
}

/// A local address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
