//! Retry-aware HTTP access layer.
//!
//! Every network call in the enricher goes through [`RestClient`]: backend
//! API, object storage, vector index, cache and providers. That makes it the
//! one place where attempts, latency and failures are observed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use enricher_shared::{ApiErrorKind, EnricherError, Result};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// User-Agent string for every outgoing request.
const USER_AGENT: &str = concat!("node-enricher/", env!("CARGO_PKG_VERSION"));

/// Backoff doubling stops after this many steps.
const MAX_BACKOFF_SHIFT: u32 = 5;

// ---------------------------------------------------------------------------
// Credentials & config
// ---------------------------------------------------------------------------

/// How a client authenticates.
#[derive(Clone)]
pub enum Credential {
    /// A key sent in a named header (the backend uses `X-API-Key`).
    Header { name: &'static str, value: String },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    None,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header { name, .. } => write!(f, "Header({name}: ***)"),
            Self::Bearer(_) => write!(f, "Bearer(***)"),
            Self::None => write!(f, "None"),
        }
    }
}

/// Settings for one [`RestClient`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub credential: Credential,
    /// Timeout for each individual attempt.
    pub timeout: Duration,
    /// Retries after the first attempt. Zero means a single attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff: Duration,
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            base_url: base_url.into(),
            credential,
            timeout: Duration::from_secs(8),
            max_retries: 3,
            backoff: Duration::from_millis(250),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// No retries at all (for calls too expensive to repeat).
    pub fn single_attempt(self) -> Self {
        self.max_retries(0)
    }
}

// ---------------------------------------------------------------------------
// CallStats
// ---------------------------------------------------------------------------

/// Cumulative call counters, shared by every client of one run.
#[derive(Debug, Default)]
pub struct CallStats {
    calls: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    latency_ms: AtomicU64,
}

/// Point-in-time copy of [`CallStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CallStatsSnapshot {
    pub calls: u64,
    pub retries: u64,
    pub failures: u64,
    pub total_latency_ms: u64,
}

impl CallStats {
    pub fn snapshot(&self) -> CallStatsSnapshot {
        CallStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_latency_ms: self.latency_ms.load(Ordering::Relaxed),
        }
    }

    fn record_attempt(&self, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.fetch_add(ms, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// RestClient
// ---------------------------------------------------------------------------

/// What a successful call returned.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Parse the body as JSON. An empty body is `Value::Null`.
    pub fn json(&self, path: &str) -> Result<Value> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| EnricherError::parse(format!("{path}: invalid JSON response: {e}")))
    }
}

/// One outcome of a single attempt.
enum Attempt {
    Done(RawResponse),
    Retry(String),
    Fail(EnricherError),
}

/// HTTP client with per-attempt timeouts and bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    config: RestConfig,
    stats: Arc<CallStats>,
}

impl RestClient {
    /// Build a client with its own stats counter.
    pub fn new(config: RestConfig) -> Result<Self> {
        Self::with_stats(config, Arc::new(CallStats::default()))
    }

    /// Build a client that reports into a shared stats counter.
    pub fn with_stats(config: RestConfig, stats: Arc<CallStats>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| EnricherError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<CallStats> {
        Arc::clone(&self.stats)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.send(Method::GET, path, query, None).await?.json(path)
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, path, &[], Some(body)).await?.json(path)
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value> {
        self.send(Method::PATCH, path, &[], Some(body)).await?.json(path)
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::DELETE, path, &[], None).await?.json(path)
    }

    /// Issue a request, retrying transient failures.
    ///
    /// Timeouts, connection errors, 408, 429 and 5xx are retried up to
    /// `max_retries` times. Any other non-success status fails at once with
    /// [`ApiErrorKind::Rejected`]; an exhausted budget fails with
    /// [`ApiErrorKind::Unavailable`].
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<RawResponse> {
        let url = self.url(path);
        let attempts = self.config.max_retries + 1;

        for attempt in 1..=attempts {
            let started = Instant::now();
            let outcome = self.attempt(method.clone(), &url, query, body).await;
            let elapsed = started.elapsed();
            self.stats.record_attempt(elapsed);

            match outcome {
                Attempt::Done(response) => {
                    debug!(
                        %method,
                        path,
                        status = response.status.as_u16(),
                        attempt,
                        latency_ms = elapsed.as_millis() as u64,
                        "request completed"
                    );
                    return Ok(response);
                }
                Attempt::Fail(err) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%method, path, attempt, error = %err, "request rejected");
                    return Err(err);
                }
                Attempt::Retry(reason) if attempt < attempts => {
                    let delay = self.backoff_for(attempt);
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        %method,
                        path,
                        attempt,
                        %reason,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Retry(reason) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(%method, path, attempt, %reason, "retries exhausted");
                }
            }
        }

        Err(EnricherError::api(path, ApiErrorKind::Unavailable))
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Attempt {
        let mut request = self.http.request(method, url);
        if !query.is_empty() {
            request = request.query(query);
        }
        request = match &self.config.credential {
            Credential::Header { name, value } => request.header(*name, value),
            Credential::Bearer(token) => request.bearer_auth(token),
            Credential::None => request,
        };
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if is_retryable_error(&e) => return Attempt::Retry(e.to_string()),
            Err(e) => {
                return Attempt::Fail(EnricherError::api(
                    self.path_of(url),
                    rejected(0, e.to_string()),
                ));
            }
        };

        let status = response.status();
        let bytes = match response.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => return Attempt::Retry(format!("failed to read body: {e}")),
        };

        if status.is_success() {
            return Attempt::Done(RawResponse {
                status,
                body: bytes,
            });
        }
        if should_retry(status) {
            return Attempt::Retry(format!("HTTP {status}"));
        }

        let body = String::from_utf8_lossy(&bytes).into_owned();
        Attempt::Fail(EnricherError::api(
            self.path_of(url),
            rejected(status.as_u16(), body),
        ))
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn path_of<'a>(&self, url: &'a str) -> &'a str {
        url.strip_prefix(self.config.base_url.trim_end_matches('/'))
            .unwrap_or(url)
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = (attempt - 1).min(MAX_BACKOFF_SHIFT);
        self.config.backoff * (1u32 << shift)
    }
}

fn rejected(status: u16, body: String) -> ApiErrorKind {
    ApiErrorKind::Rejected { status, body }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
}
