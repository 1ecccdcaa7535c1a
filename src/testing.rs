//! Test doubles for the transport and clock seams.

use crate::error::TransportError;
use crate::http::{ApiClient, ApiRequest, Clock, HttpResponse, RequestBody, Transport};
use crate::types::{RepoSlug, SyncConfig, Token};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{AsHeaderName, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Epoch seconds every [`FakeClock`] starts at.
pub(crate) const NOW: u64 = 1_700_000_000;

pub(crate) const API: &str = "https://api.test";

/// Scripted answer for one request.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Respond {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Fail(String),
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Respond {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn bytes(status: u16, body: &[u8]) -> Self {
        Reply::Respond {
            status,
            headers: Vec::new(),
            body: body.to_vec(),
        }
    }

    pub fn json(status: u16, value: serde_json::Value) -> Self {
        Reply::bytes(status, value.to_string().as_bytes())
    }

    pub fn rate_limited(reset_epoch: u64) -> Self {
        Reply::status(429).with_header("x-ratelimit-reset", &reset_epoch.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Reply::Fail(message.to_string())
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Reply::Respond { headers, .. } = &mut self {
            headers.push((name.to_string(), value.to_string()));
        }
        self
    }
}

/// A request as seen by [`FakeTransport`].
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    /// File contents of an upload, read when the request was sent.
    pub file: Option<Vec<u8>>,
}

impl Recorded {
    pub fn header<K: AsHeaderName>(&self, key: K) -> &str {
        self.headers
            .get(key)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

/// In-memory transport answering from per-route queues.
///
/// Replies for a route are consumed in order; the last one repeats. Unknown
/// routes answer 404 like the GitHub API does.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Reply>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, method: Method, url: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_string()))
            .or_default()
            .push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    /// Requests that would change state on the server.
    pub fn mutating_calls(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != Method::GET)
            .collect()
    }

    fn next_reply(&self, method: &Method, url: &str) -> Option<Reply> {
        let mut routes = self.routes.lock().unwrap();
        let queue = routes.get_mut(&(method.clone(), url.to_string()))?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest) -> Result<HttpResponse, TransportError> {
        let (json, file) = match &request.body {
            RequestBody::Empty => (None, None),
            RequestBody::Json(value) => (Some(value.clone()), None),
            RequestBody::File { path, .. } => (None, Some(std::fs::read(path)?)),
        };
        self.requests.lock().unwrap().push(Recorded {
            method: request.method.clone(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            query: request.query.clone(),
            json,
            file,
        });

        let reply = self
            .next_reply(&request.method, &request.url)
            .unwrap_or_else(|| Reply::json(404, serde_json::json!({"message": "Not Found"})));
        match reply {
            Reply::Fail(message) => Err(TransportError::Connection(message)),
            Reply::Respond {
                status,
                headers,
                body,
            } => {
                let mut header_map = HeaderMap::new();
                for (name, value) in headers {
                    header_map.insert(
                        HeaderName::from_bytes(name.as_bytes()).unwrap(),
                        HeaderValue::from_str(&value).unwrap(),
                    );
                }
                // Small chunks so consumers see a real multi-chunk stream.
                let chunks: Vec<Result<Bytes, TransportError>> = body
                    .chunks(100)
                    .map(|c| Ok(Bytes::copy_from_slice(c)))
                    .collect();
                Ok(HttpResponse::new(
                    StatusCode::from_u16(status).unwrap(),
                    header_map,
                    stream::iter(chunks).boxed(),
                ))
            }
        }
    }
}

/// Virtual clock: sleeping records the duration and advances time.
pub(crate) struct FakeClock {
    now: Mutex<SystemTime>,
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(UNIX_EPOCH + Duration::from_secs(NOW)),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        *self.now.lock().unwrap() += duration;
    }
}

/// Config for `acme/private` -> `acme/public` against [`API`].
pub(crate) fn test_config(staging_dir: &Path) -> SyncConfig {
    let mut config = SyncConfig::new(
        RepoSlug::parse("acme/private").unwrap(),
        RepoSlug::parse("acme/public").unwrap(),
        Token::new("test-token").unwrap(),
    );
    config.api_base_url = API.to_string();
    config.staging_dir = staging_dir.to_path_buf();
    config
}

pub(crate) fn client(transport: Arc<FakeTransport>, clock: Arc<FakeClock>) -> ApiClient {
    ApiClient::new(transport, clock, &test_config(Path::new("unused"))).unwrap()
}
