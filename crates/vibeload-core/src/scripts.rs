//! Built-in load scripts against the recommendation API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use vibeload_common::{LoadError, Result};
use vibeload_http::Request;
use vibeload_metrics::{Counter, Metrics, Trend};

use crate::payload::{EmotionMode, RecommendRequest};
use crate::scenario::{Scenario, VuContext};

pub const RECOMMEND: &str = "recommend";
pub const RECOMMEND_SOURCE: &str = "recommend-source";
pub const ENDPOINT_PROBE: &str = "endpoint-probe";

/// Stands in for a backend address nobody filled in yet.
pub const PLACEHOLDER_HOST: &str = "http://<backend-host>";

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDefaults {
    pub vus: usize,
    pub duration: Duration,
    pub sleep: Duration,
    pub base_url: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptInfo {
    pub name: &'static str,
    pub about: &'static str,
    pub defaults: ScriptDefaults,
    pub payload: Option<RecommendRequest>,
}

pub fn catalog() -> Vec<ScriptInfo> {
    vec![
        ScriptInfo {
            name: RECOMMEND,
            about: "POST /v1/recommend and check for 200",
            defaults: ScriptDefaults {
                vus: 50,
                duration: Duration::from_secs(10),
                sleep: Duration::from_millis(500),
                base_url: "http://host.docker.internal:8080",
            },
            payload: Some(Recommend::payload()),
        },
        ScriptInfo {
            name: RECOMMEND_SOURCE,
            about: "compare /v1/recommend served from cache against direct search",
            defaults: ScriptDefaults {
                vus: 50,
                duration: Duration::from_secs(30),
                sleep: Duration::ZERO,
                base_url: "http://localhost:8080",
            },
            payload: Some(RecommendBySource::payload()),
        },
        ScriptInfo {
            name: ENDPOINT_PROBE,
            about: "GET a single endpoint with a one second pause",
            defaults: ScriptDefaults {
                vus: 20,
                duration: Duration::from_secs(30),
                sleep: Duration::from_secs(1),
                base_url: PLACEHOLDER_HOST,
            },
            payload: None,
        },
    ]
}

pub fn info(name: &str) -> Result<ScriptInfo> {
    catalog()
        .into_iter()
        .find(|s| s.name == name)
        .ok_or_else(|| LoadError::UnknownScript(name.to_string()))
}

/// Instantiates a script, declaring its custom metrics on `metrics`.
pub fn build(name: &str, base_url: &str, metrics: &Metrics) -> Result<Arc<dyn Scenario>> {
    let base = base_url.trim_end_matches('/');
    if base.contains('<') {
        tracing::warn!(target: "scripts", "base url `{}` still holds a placeholder; requests will fail", base);
    }
    let scenario: Arc<dyn Scenario> = match name {
        RECOMMEND => Arc::new(Recommend::new(base)?),
        RECOMMEND_SOURCE => Arc::new(RecommendBySource::new(base, metrics)?),
        ENDPOINT_PROBE => Arc::new(EndpointProbe::new(base)),
        other => return Err(LoadError::UnknownScript(other.to_string())),
    };
    Ok(scenario)
}

pub struct Recommend {
    request: Request,
}

impl Recommend {
    pub const CHECK: &'static str = "status is 200";

    pub fn payload() -> RecommendRequest {
        RecommendRequest { text: String::new(), user_valence: 0.7, user_energy: 0.5, mode: EmotionMode::Maintain }
    }

    pub fn new(base: &str) -> Result<Self> {
        Ok(Self { request: Request::post_json(format!("{}/v1/recommend", base), &Self::payload())? })
    }
}

#[async_trait]
impl Scenario for Recommend {
    fn name(&self) -> &'static str {
        RECOMMEND
    }

    async fn iteration(&self, ctx: &VuContext) {
        let res = ctx.request(self.request.clone()).await;
        ctx.check_status(Self::CHECK, &res, 200);
        ctx.pause().await;
    }
}

struct SourceProbe {
    request: Request,
    check: &'static str,
    duration: Trend,
    success: Counter,
    fail: Counter,
}

impl SourceProbe {
    fn new(base: &str, source: &str, prefix: &str, check: &'static str, metrics: &Metrics) -> Result<Self> {
        Ok(Self {
            request: Request::post_json(
                format!("{}/v1/recommend?source={}", base, source),
                &RecommendBySource::payload(),
            )?,
            check,
            duration: metrics.trend(&format!("{}_duration", prefix))?,
            success: metrics.counter(&format!("{}_success", prefix))?,
            fail: metrics.counter(&format!("{}_fail", prefix))?,
        })
    }

    async fn hit(&self, ctx: &VuContext) {
        let res = ctx.request(self.request.clone()).await;
        self.duration.add(res.duration_ms());
        if res.is_ok() {
            self.success.inc();
        } else {
            self.fail.inc();
        }
        ctx.check_status(self.check, &res, 200);
    }
}

/// Two calls per iteration: the cached pool, then a direct search query.
pub struct RecommendBySource {
    cache: SourceProbe,
    direct: SourceProbe,
}

impl RecommendBySource {
    pub const CACHE_CHECK: &'static str = "cache status is 200";
    pub const DIRECT_CHECK: &'static str = "direct status is 200";

    pub fn payload() -> RecommendRequest {
        RecommendRequest { text: String::new(), user_valence: 0.3, user_energy: 0.2, mode: EmotionMode::Elevate }
    }

    pub fn new(base: &str, metrics: &Metrics) -> Result<Self> {
        Ok(Self {
            cache: SourceProbe::new(base, "cache", "cache", Self::CACHE_CHECK, metrics)?,
            direct: SourceProbe::new(base, "es", "direct", Self::DIRECT_CHECK, metrics)?,
        })
    }
}

#[async_trait]
impl Scenario for RecommendBySource {
    fn name(&self) -> &'static str {
        RECOMMEND_SOURCE
    }

    async fn iteration(&self, ctx: &VuContext) {
        self.cache.hit(ctx).await;
        self.direct.hit(ctx).await;
        ctx.pause().await;
    }
}

pub struct EndpointProbe {
    request: Request,
}

impl EndpointProbe {
    pub fn new(base: &str) -> Self {
        Self { request: Request::get(format!("{}/api/endpoint", base)) }
    }
}

#[async_trait]
impl Scenario for EndpointProbe {
    fn name(&self) -> &'static str {
        ENDPOINT_PROBE
    }

    async fn iteration(&self, ctx: &VuContext) {
        ctx.request(self.request.clone()).await;
        ctx.pause().await;
    }
}
