//! HTTP seam between scenarios and the network.
//!
//! A [`Transport`] never fails: connection errors, timeouts and malformed
//! URLs come back as a [`Response`] with status 0 and `error` set, so the
//! caller records them like any other unsuccessful response.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use vibeload_common::{LoadError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl Request {
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::Get, url: url.into(), headers: Vec::new(), body: None }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self { method: Method::Post, url: url.into(), headers: Vec::new(), body: Some(body.into()) }
    }

    /// POST with a JSON body and `Content-Type: application/json`.
    pub fn post_json<T: Serialize>(url: impl Into<String>, payload: &T) -> Result<Self> {
        let body = serde_json::to_vec(payload).map_err(|e| LoadError::Message(format!("encode payload: {}", e)))?;
        Ok(Self::post(url, body).header("Content-Type", "application/json"))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    /// From handing the request to the client until the body has been read.
    /// Unlike k6's `timings.duration`, this includes DNS lookup, connect and
    /// TLS handshake whenever the pool has no idle connection to reuse.
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub timings: Timings,
    pub error: Option<String>,
}

impl Response {
    pub fn transport_error(error: impl ToString, elapsed: Duration) -> Self {
        Self { status: 0, body: Vec::new(), timings: Timings { duration: elapsed }, error: Some(error.to_string()) }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200 && self.error.is_none()
    }

    pub fn duration_ms(&self) -> f64 {
        self.timings.duration.as_secs_f64() * 1_000.0
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request) -> Response;
}

/// reqwest-backed transport; one pooled client shared by every virtual user.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vibeload/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LoadError::Message(format!("http client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Response {
        let start = Instant::now();
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        match builder.send().await {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.bytes().await {
                    Ok(bytes) => Response {
                        status,
                        body: bytes.to_vec(),
                        timings: Timings { duration: start.elapsed() },
                        error: None,
                    },
                    Err(e) => {
                        tracing::debug!(target: "http", url = %request.url, "body read failed: {}", e);
                        Response::transport_error(e, start.elapsed())
                    }
                }
            }
            Err(e) => {
                tracing::debug!(target: "http", url = %request.url, "request failed: {}", e);
                Response::transport_error(e, start.elapsed())
            }
        }
    }
}

#[cfg(feature = "mock")]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub enum MockReply {
        Status(u16),
        Body(u16, Vec<u8>),
        Error(String),
    }

    type ReplyFn = Box<dyn Fn(&Request) -> MockReply + Send + Sync>;

    /// In-process stand-in for the target service.
    pub struct MockTransport {
        reply: ReplyFn,
        latency: Duration,
        sent: AtomicU64,
        log: Option<Mutex<Vec<Request>>>,
    }

    impl MockTransport {
        pub fn new<F>(reply: F) -> Self
        where
            F: Fn(&Request) -> MockReply + Send + Sync + 'static,
        {
            Self { reply: Box::new(reply), latency: Duration::ZERO, sent: AtomicU64::new(0), log: None }
        }

        pub fn ok() -> Self {
            Self::new(|_| MockReply::Status(200))
        }

        pub fn unreachable() -> Self {
            Self::new(|_| MockReply::Error("connection refused".into()))
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        /// Keep every request for later inspection.
        pub fn recording(mut self) -> Self {
            self.log = Some(Mutex::new(Vec::new()));
            self
        }

        pub fn sent(&self) -> u64 {
            self.sent.load(Ordering::Relaxed)
        }

        pub fn requests(&self) -> Vec<Request> {
            match &self.log {
                Some(log) => log.lock().map(|g| g.clone()).unwrap_or_default(),
                None => Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: Request) -> Response {
            let start = Instant::now();
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.sent.fetch_add(1, Ordering::Relaxed);
            let reply = (self.reply)(&request);
            if let Some(log) = &self.log {
                if let Ok(mut g) = log.lock() { g.push(request); }
            }
            let timings = Timings { duration: start.elapsed() };
            match reply {
                MockReply::Status(status) => Response { status, body: Vec::new(), timings, error: None },
                MockReply::Body(status, body) => Response { status, body, timings, error: None },
                MockReply::Error(e) => Response::transport_error(e, timings.duration),
            }
        }
    }
}
