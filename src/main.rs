//! resilient-probe
//!
//! Fires requests at a URL through the resilient executor and reports what
//! happened to each call, plus the per-target breaker and budget state at
//! the end. Useful for checking a config against a real upstream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::stream::{self, StreamExt};
use http::header::{HeaderName, HeaderValue};
use http::Method;
use serde_json::json;
use url::Url;

use resilient_http::config::load_config;
use resilient_http::observability::{logging, metrics};
use resilient_http::{
    CallOptions, ClientConfig, ExecutorError, Priority, Request, RequestExecutor, Response,
};

#[derive(Parser)]
#[command(name = "resilient-probe")]
#[command(about = "Send requests through the resilient HTTP executor", long_about = None)]
struct Cli {
    /// Target URL.
    url: String,

    /// TOML config file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP method.
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Number of calls to make.
    #[arg(short = 'n', long, default_value_t = 1)]
    count: usize,

    /// Calls in flight at once.
    #[arg(short = 'j', long, default_value_t = 1)]
    concurrency: usize,

    /// Call priority (low, normal, high, critical).
    #[arg(short, long, default_value = "normal")]
    priority: Priority,

    /// Attach an Idempotency-Key so POST/PATCH become retryable.
    #[arg(long)]
    idempotency_key: Option<String>,

    /// Extra header, `Name: value`. May be repeated.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body.
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };

    logging::init_logging(&config.observability)?;

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let template = build_request(&cli)?;
    let executor = Arc::new(RequestExecutor::builder().config(config).build()?);

    tracing::info!(
        url = %cli.url,
        count = cli.count,
        concurrency = cli.concurrency,
        priority = %cli.priority,
        "Probe starting"
    );

    let mut results: Vec<(usize, Duration, Result<Response, ExecutorError>)> =
        stream::iter(0..cli.count)
            .map(|call| {
                let executor = Arc::clone(&executor);
                let request = template.clone();
                let options = CallOptions::new().priority(cli.priority);
                async move {
                    let started = Instant::now();
                    let result = executor.execute(request, options).await;
                    (call, started.elapsed(), result)
                }
            })
            .buffer_unordered(cli.concurrency.max(1))
            .collect()
            .await;
    results.sort_by_key(|(call, _, _)| *call);

    let targets = executor.registry().snapshot();

    if cli.json {
        let calls: Vec<_> = results
            .iter()
            .map(|(call, elapsed, result)| match result {
                Ok(response) => json!({
                    "call": call,
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "status": response.status.as_u16(),
                    "body_bytes": response.body.len(),
                }),
                Err(err) => json!({
                    "call": call,
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "error": err.kind(),
                    "message": err.to_string(),
                }),
            })
            .collect();
        let report = json!({ "calls": calls, "targets": targets });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for (call, elapsed, result) in &results {
        match result {
            Ok(response) => println!(
                "#{call:<4} {:>4}  {:>8.1?}  {} bytes",
                response.status.as_u16(),
                elapsed,
                response.body.len()
            ),
            Err(err) => println!("#{call:<4} FAIL  {elapsed:>8.1?}  {err}"),
        }
    }

    let ok = results.iter().filter(|(_, _, r)| r.is_ok()).count();
    println!();
    println!("{ok}/{} calls succeeded", results.len());

    for target in &targets {
        println!(
            "{}: circuit {} (failures {}, successes {})",
            target.target,
            target.breaker.state.as_str(),
            target.breaker.failure_count,
            target.breaker.success_count
        );
        if let Some(budget) = &target.budget {
            println!(
                "  rate budget {}/{} (reset in {} ms)",
                budget.remaining,
                budget.limit,
                budget
                    .reset_in_ms
                    .map_or_else(|| "?".to_string(), |ms| ms.to_string())
            );
        }
    }

    Ok(())
}

fn build_request(cli: &Cli) -> Result<Request, Box<dyn std::error::Error>> {
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())?;
    let mut request = Request::new(method, Url::parse(&cli.url)?);

    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("invalid header `{header}`, expected `Name: value`"))?;
        request = request.header(
            HeaderName::from_bytes(name.trim().as_bytes())?,
            HeaderValue::from_str(value.trim())?,
        );
    }

    if let Some(key) = &cli.idempotency_key {
        request = request.idempotency_key(HeaderValue::from_str(key)?);
    }
    if let Some(data) = &cli.data {
        request = request.body(data.clone());
    }

    Ok(request)
}
