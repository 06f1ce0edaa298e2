use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vibeload_common::Result;
use vibeload_http::{Request, Response, Transport};
use vibeload_metrics::{builtin, Counter, Metrics, Rate, Trend};

/// One scenario function. The runner calls [`Scenario::iteration`] in a loop
/// on every virtual user; implementations must not fail, only record.
#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &'static str;
    async fn iteration(&self, ctx: &VuContext);
}

#[derive(Clone)]
pub(crate) struct HttpBuiltins {
    reqs: Counter,
    duration: Trend,
    failed: Rate,
}

impl HttpBuiltins {
    pub(crate) fn new(metrics: &Metrics) -> Result<Self> {
        Ok(Self {
            reqs: metrics.counter(builtin::HTTP_REQS)?,
            duration: metrics.trend(builtin::HTTP_REQ_DURATION)?,
            failed: metrics.rate(builtin::HTTP_REQ_FAILED)?,
        })
    }
}

/// What a scenario sees of the harness while running on one virtual user.
pub struct VuContext {
    /// 1-based virtual user id.
    pub vu: usize,
    /// Completed iterations on this virtual user so far.
    pub iteration: u64,
    transport: Arc<dyn Transport>,
    metrics: Metrics,
    http: HttpBuiltins,
    pause: Duration,
}

impl VuContext {
    pub(crate) fn new(vu: usize, transport: Arc<dyn Transport>, metrics: Metrics, http: HttpBuiltins, pause: Duration) -> Self {
        Self { vu, iteration: 0, transport, metrics, http, pause }
    }

    /// Sends `request` and records `http_reqs`, `http_req_duration` and
    /// `http_req_failed` for it.
    pub async fn request(&self, request: Request) -> Response {
        let res = self.transport.send(request).await;
        self.http.reqs.inc();
        self.http.duration.add(res.duration_ms());
        self.http.failed.add(!res.is_ok());
        if let Some(e) = &res.error {
            tracing::trace!(target: "vu", vu = self.vu, "transport error: {}", e);
        }
        res
    }

    pub fn check(&self, name: &str, passed: bool) -> bool {
        self.metrics.check(name, passed)
    }

    pub fn check_status(&self, name: &str, res: &Response, expected: u16) -> bool {
        self.check(name, res.status == expected && res.error.is_none())
    }

    /// The configured post-iteration pause.
    pub async fn pause(&self) {
        if !self.pause.is_zero() {
            tokio::time::sleep(self.pause).await;
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
