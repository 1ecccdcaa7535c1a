//! Resilient HTTP client for the GitHub REST API.
//!
//! Every network call made by the crate goes through [`ApiClient::execute`],
//! which retries transient failures with exponential backoff and waits out
//! rate limits. The wire layer ([`Transport`]) and time source ([`Clock`])
//! are injected so the retry behavior can be tested without real sockets or
//! real timers.

use crate::error::{SyncError, TransportError};
use crate::types::{RepoSlug, SyncConfig, Token};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE,
    USER_AGENT,
};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const GITHUB_JSON: &str = "application/vnd.github+json";
const OCTET_STREAM: &str = "application/octet-stream";
const API_VERSION: &str = "2022-11-28";

const X_GITHUB_API_VERSION: &str = "x-github-api-version";
const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Body of an outgoing request.
///
/// File bodies are reopened on every attempt so a retried upload always
/// sends the whole file.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    File { path: PathBuf, len: u64 },
}

/// A fully described outgoing request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

/// Response returned by a [`Transport`], with a streaming body.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: BodyStream,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: BodyStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn into_body(self) -> BodyStream {
        self.body
    }

    /// Collects the whole body into memory. Only used for small JSON payloads.
    pub async fn bytes(self) -> Result<Vec<u8>, TransportError> {
        let mut body = self.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    fn header_u64(&self, name: &str) -> Option<u64> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    }

    fn is_rate_limited(&self) -> bool {
        self.status == StatusCode::TOO_MANY_REQUESTS
    }

    /// GitHub answers 403 with `x-ratelimit-remaining: 0` once the primary quota runs out.
    fn is_quota_exhausted(&self) -> bool {
        self.status == StatusCode::FORBIDDEN && self.header_u64(X_RATELIMIT_REMAINING) == Some(0)
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Sends a single request. Implementations must not retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError>;
}

/// [`Transport`] backed by `reqwest`.
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SyncError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::File { path, len } => {
                let file = tokio::fs::File::open(path).await?;
                builder
                    .header(CONTENT_LENGTH, *len)
                    .body(reqwest::Body::from(file))
            }
        };

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map_err(TransportError::from).boxed();
        Ok(HttpResponse::new(status, headers, body))
    }
}

/// Time source used for rate-limit arithmetic and waits.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    async fn sleep(&self, duration: Duration);
}

/// Wall clock with tokio timers.
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry and rate-limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts for transient failures, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub base_delay: Duration,
    /// Lower bound on any rate-limit wait.
    pub min_rate_limit_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            min_rate_limit_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the failed attempt with zero-based index `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(31))
    }

    /// Wait before retrying a rate-limited request.
    ///
    /// A missing reset timestamp is treated as "resets now".
    pub fn rate_limit_wait(&self, reset_epoch: Option<u64>, now: SystemTime) -> Duration {
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let until_reset = reset_epoch.unwrap_or(0).saturating_sub(now_secs);
        Duration::from_secs(until_reset).max(self.min_rate_limit_wait)
    }
}

/// Authenticated GitHub API client shared by every component of one sync.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    authorization: HeaderValue,
    user_agent: HeaderValue,
    base_url: String,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        config: &SyncConfig,
    ) -> Result<Self, SyncError> {
        Ok(Self {
            transport,
            clock,
            policy: config.retry,
            authorization: bearer(&config.token)?,
            user_agent: HeaderValue::from_str(&config.user_agent).map_err(|_| {
                SyncError::Configuration(format!("invalid user agent '{}'", config.user_agent))
            })?,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client talking to the real API with the system clock.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::new(
            Arc::new(ReqwestTransport::new()?),
            Arc::new(SystemClock),
            config,
        )
    }

    /// `{base}/repos/{owner}/{repo}/{segments...}`, each segment percent-encoded.
    pub fn repo_url(&self, repo: &RepoSlug, segments: &[&str]) -> Result<String, SyncError> {
        let invalid = || SyncError::Configuration(format!("invalid API URL '{}'", self.base_url));
        let mut url = Url::parse(&format!("{}/repos/{}", self.base_url, repo))
            .map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .extend(segments);
        Ok(url.to_string())
    }

    fn request(&self, method: Method, url: &str, accept: &'static str) -> ApiRequest {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, self.authorization.clone());
        headers.insert(USER_AGENT, self.user_agent.clone());
        headers.insert(ACCEPT, HeaderValue::from_static(accept));
        headers.insert(
            HeaderName::from_static(X_GITHUB_API_VERSION),
            HeaderValue::from_static(API_VERSION),
        );
        ApiRequest {
            method,
            url: url.to_string(),
            headers,
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Request against the JSON API.
    pub fn json_request(&self, method: Method, url: &str) -> ApiRequest {
        self.request(method, url, GITHUB_JSON)
    }

    /// Binary asset download.
    pub fn download_request(&self, url: &str) -> ApiRequest {
        self.request(Method::GET, url, OCTET_STREAM)
    }

    /// Binary asset upload streamed from a local file.
    pub fn upload_request(&self, url: &str, name: &str, path: PathBuf, len: u64) -> ApiRequest {
        let mut request = self.request(Method::POST, url, GITHUB_JSON);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
        request.query.push(("name".to_string(), name.to_string()));
        request.body = RequestBody::File { path, len };
        request
    }

    /// Sends `request`, retrying transient failures and waiting out rate limits.
    ///
    /// Connection errors and 5xx answers consume one of the policy's attempts;
    /// 429 answers never do. A 403 with an exhausted quota waits for the reset
    /// like a 429 but consumes an attempt, and the last one surfaces as an API
    /// error. Any other non-2xx status fails at once.
    pub async fn execute(&self, request: &ApiRequest) -> Result<HttpResponse, SyncError> {
        let mut attempt = 0u32;
        loop {
            debug!("{} {}", request.method, request.url);
            let failure = match self.transport.send(request).await {
                Ok(response) if response.is_rate_limited() => {
                    self.wait_for_reset(&response).await;
                    continue;
                }
                Ok(response) if response.is_quota_exhausted() => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        return Err(api_error(&request.url, response).await);
                    }
                    self.wait_for_reset(&response).await;
                    continue;
                }
                Ok(response) if response.status.is_success() => return Ok(response),
                Ok(response) if response.status.is_server_error() => TransportError::Server {
                    status: response.status,
                    url: request.url.clone(),
                },
                Ok(response) => return Err(api_error(&request.url, response).await),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= self.policy.max_attempts {
                return Err(SyncError::RetriesExhausted {
                    attempts: attempt,
                    source: failure,
                });
            }
            let delay = self.policy.backoff(attempt - 1);
            warn!(
                "Request failed (attempt {}), retrying in {}: {}",
                attempt,
                humantime::format_duration(delay),
                failure
            );
            self.clock.sleep(delay).await;
        }
    }

    async fn wait_for_reset(&self, response: &HttpResponse) {
        let reset = response.header_u64(X_RATELIMIT_RESET);
        let wait = self.policy.rate_limit_wait(reset, self.clock.now());
        warn!(
            "Rate limited. Waiting {}...",
            humantime::format_duration(wait)
        );
        self.clock.sleep(wait).await;
    }

    /// Sends `request` and decodes the JSON answer.
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<T, SyncError> {
        let response = self.execute(request).await?;
        let body = response.bytes().await.map_err(|e| SyncError::TransferFailed {
            asset: request.url.clone(),
            reason: e.to_string(),
        })?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        self.execute_json(&self.json_request(Method::GET, url)).await
    }
}

fn bearer(token: &Token) -> Result<HeaderValue, SyncError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
        .map_err(|_| SyncError::Configuration("token contains invalid characters".to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Builds the error for a non-retryable status, using GitHub's `message` field when present.
async fn api_error(url: &str, response: HttpResponse) -> SyncError {
    let status = response.status;
    let message = response
        .bytes()
        .await
        .ok()
        .and_then(|body| serde_json::from_slice::<serde_json::Value>(&body).ok())
        .and_then(|json| json.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    SyncError::Api {
        status,
        url: url.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{client, FakeClock, FakeTransport, Reply, NOW};
    use serde_json::json;

    const URL: &str = "https://api.test/repos/acme/app/releases/latest";

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_rate_limit_wait_has_a_floor() {
        let policy = RetryPolicy::default();
        let now = UNIX_EPOCH + Duration::from_secs(NOW);
        assert_eq!(
            policy.rate_limit_wait(Some(NOW + 120), now),
            Duration::from_secs(120)
        );
        assert_eq!(
            policy.rate_limit_wait(Some(NOW + 10), now),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.rate_limit_wait(Some(NOW - 10), now),
            Duration::from_secs(60)
        );
        assert_eq!(policy.rate_limit_wait(None, now), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_rate_limit_then_success_matches_immediate_success() {
        let body = json!({"tag_name": "v1.0.0"});

        let transport = FakeTransport::new();
        transport.route(Method::GET, URL, Reply::rate_limited(NOW + 90));
        transport.route(Method::GET, URL, Reply::json(200, body.clone()));
        let clock = FakeClock::new();
        let api = client(transport.clone(), clock.clone());
        let limited: serde_json::Value = api.get_json(URL).await.unwrap();

        let transport = FakeTransport::new();
        transport.route(Method::GET, URL, Reply::json(200, body.clone()));
        let direct_clock = FakeClock::new();
        let api = client(transport, direct_clock.clone());
        let direct: serde_json::Value = api.get_json(URL).await.unwrap();

        assert_eq!(limited, direct);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(90)]);
        assert!(direct_clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_waits_do_not_consume_attempts() {
        let transport = FakeTransport::new();
        for _ in 0..5 {
            transport.route(Method::GET, URL, Reply::rate_limited(NOW));
        }
        transport.route(Method::GET, URL, Reply::fail("connection reset"));
        transport.route(Method::GET, URL, Reply::fail("connection reset"));
        transport.route(Method::GET, URL, Reply::json(200, json!({})));
        let clock = FakeClock::new();
        let api = client(transport.clone(), clock.clone());

        let _: serde_json::Value = api.get_json(URL).await.unwrap();
        assert_eq!(transport.requests().len(), 8);
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 7);
        assert!(sleeps[..5].iter().all(|d| *d == Duration::from_secs(60)));
        assert_eq!(sleeps[5..], [Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn test_forbidden_with_exhausted_quota_is_rate_limit() {
        let transport = FakeTransport::new();
        transport.route(
            Method::GET,
            URL,
            Reply::status(403)
                .with_header("x-ratelimit-remaining", "0")
                .with_header("x-ratelimit-reset", &(NOW + 300).to_string()),
        );
        transport.route(Method::GET, URL, Reply::json(200, json!({"ok": true})));
        let clock = FakeClock::new();
        let api = client(transport, clock.clone());

        let value: serde_json::Value = api.get_json(URL).await.unwrap();
        assert_eq!(value, json!({"ok": true}));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(300)]);
    }

    #[tokio::test]
    async fn test_exhausted_quota_gives_up_after_max_attempts() {
        let transport = FakeTransport::new();
        transport.route(
            Method::GET,
            URL,
            Reply::json(403, json!({"message": "API rate limit exceeded"}))
                .with_header("x-ratelimit-remaining", "0"),
        );
        let clock = FakeClock::new();
        let api = client(transport.clone(), clock.clone());

        let err = api.get_json::<serde_json::Value>(URL).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Api);
        assert!(err.to_string().contains("API rate limit exceeded"));
        assert_eq!(transport.count(Method::GET, URL), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_secs(60)]
        );
    }

    #[tokio::test]
    async fn test_transient_failures_exhaust_retries() {
        let transport = FakeTransport::new();
        transport.route(Method::GET, URL, Reply::fail("timed out"));
        let clock = FakeClock::new();
        let api = client(transport.clone(), clock.clone());

        let err = api.get_json::<serde_json::Value>(URL).await.unwrap_err();
        match err {
            SyncError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 3);
                assert_eq!(source.to_string(), "connection failed: timed out");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let transport = FakeTransport::new();
        transport.route(Method::GET, URL, Reply::status(502));
        transport.route(Method::GET, URL, Reply::json(200, json!({"id": 7})));
        let clock = FakeClock::new();
        let api = client(transport.clone(), clock.clone());

        let value: serde_json::Value = api.get_json(URL).await.unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_client_errors_fail_without_retry() {
        let transport = FakeTransport::new();
        transport.route(
            Method::GET,
            URL,
            Reply::json(401, json!({"message": "Bad credentials"})),
        );
        let clock = FakeClock::new();
        let api = client(transport.clone(), clock.clone());

        let err = api.get_json::<serde_json::Value>(URL).await.unwrap_err();
        match err {
            SyncError::Api {
                status, message, ..
            } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "Bad credentials");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.requests().len(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_requests_carry_auth_and_media_type() {
        let transport = FakeTransport::new();
        transport.route(Method::GET, URL, Reply::json(200, json!({})));
        transport.route(Method::GET, "https://api.test/asset/1", Reply::bytes(200, b"x"));
        let api = client(transport.clone(), FakeClock::new());

        let _: serde_json::Value = api.get_json(URL).await.unwrap();
        api.execute(&api.download_request("https://api.test/asset/1"))
            .await
            .unwrap();

        let requests = transport.requests();
        assert_eq!(requests[0].header(AUTHORIZATION), "Bearer test-token");
        assert_eq!(requests[0].header(ACCEPT), GITHUB_JSON);
        assert_eq!(requests[0].header(X_GITHUB_API_VERSION), API_VERSION);
        assert_eq!(requests[1].header(AUTHORIZATION), "Bearer test-token");
        assert_eq!(requests[1].header(ACCEPT), OCTET_STREAM);
    }

    #[test]
    fn test_repo_url_encodes_segments() {
        let api = client(FakeTransport::new(), FakeClock::new());
        let repo = RepoSlug::parse("acme/app").unwrap();
        assert_eq!(
            api.repo_url(&repo, &["releases", "tags", "v1.0.0"]).unwrap(),
            "https://api.test/repos/acme/app/releases/tags/v1.0.0"
        );
        assert_eq!(
            api.repo_url(&repo, &["releases", "tags", "build/42"]).unwrap(),
            "https://api.test/repos/acme/app/releases/tags/build%2F42"
        );
    }
}
