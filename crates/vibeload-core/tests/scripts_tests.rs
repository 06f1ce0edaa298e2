use std::sync::Arc;
use std::time::Duration;

use vibeload_common::config::LoadConfig;
use vibeload_core::payload::{EmotionMode, RecommendRequest};
use vibeload_core::scripts::{self, Recommend};
use vibeload_core::{RunOptions, RunPlan, Runner};
use vibeload_http::mock::MockTransport;
use vibeload_http::Method;
use vibeload_metrics::{MetricKind, Metrics};

#[test]
fn payload_uses_service_field_names() {
    let body = serde_json::to_value(RecommendRequest {
        text: "rainy day".into(),
        user_valence: 0.1,
        user_energy: 0.9,
        mode: EmotionMode::CalmDown,
    })
    .unwrap();
    assert_eq!(
        body,
        serde_json::json!({"text": "rainy day", "userValence": 0.1, "userEnergy": 0.9, "mode": "CALM_DOWN"})
    );
}

#[tokio::test]
async fn recommend_posts_the_maintain_payload() {
    let metrics = Metrics::new();
    let mock = Arc::new(MockTransport::ok().recording());
    let scenario = scripts::build(scripts::RECOMMEND, "http://svc:8080/", &metrics).unwrap();
    let options = RunOptions {
        vus: 1,
        duration: Duration::from_millis(50),
        sleep: Duration::from_millis(20),
        graceful_stop: Duration::from_secs(1),
    };
    Runner::new(options, mock.clone(), metrics.clone()).unwrap().run(scenario).await.unwrap();

    let reqs = mock.requests();
    assert!(!reqs.is_empty());
    let req = &reqs[0];
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.url, "http://svc:8080/v1/recommend");
    assert_eq!(req.header_value("Content-Type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(req.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, serde_json::json!({"text": "", "userValence": 0.7, "userEnergy": 0.5, "mode": "MAINTAIN"}));

    let check = &metrics.checks()[0];
    assert_eq!(check.name, Recommend::CHECK);
    assert_eq!(check.fails, 0);
}

#[tokio::test]
async fn source_script_hits_cache_then_search() {
    let metrics = Metrics::new();
    let mock = Arc::new(MockTransport::ok().recording());
    let scenario = scripts::build(scripts::RECOMMEND_SOURCE, "http://svc", &metrics).unwrap();
    let options = RunOptions {
        vus: 1,
        duration: Duration::from_millis(30),
        sleep: Duration::from_millis(50),
        graceful_stop: Duration::from_secs(1),
    };
    Runner::new(options, mock.clone(), metrics.clone()).unwrap().run(scenario).await.unwrap();

    let urls: Vec<String> = mock.requests().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["http://svc/v1/recommend?source=cache", "http://svc/v1/recommend?source=es"]);
    for name in ["cache_success", "cache_fail", "direct_success", "direct_fail"] {
        assert_eq!(metrics.kind_of(name), Some(MetricKind::Counter), "{}", name);
    }
    assert_eq!(metrics.kind_of("cache_duration"), Some(MetricKind::Trend));
}

#[tokio::test]
async fn probe_issues_a_bare_get() {
    let metrics = Metrics::new();
    let mock = Arc::new(MockTransport::ok().recording());
    let scenario = scripts::build(scripts::ENDPOINT_PROBE, "http://backend", &metrics).unwrap();
    let options = RunOptions {
        vus: 1,
        duration: Duration::from_millis(20),
        sleep: Duration::from_millis(40),
        graceful_stop: Duration::from_secs(1),
    };
    Runner::new(options, mock.clone(), metrics.clone()).unwrap().run(scenario).await.unwrap();

    let req = &mock.requests()[0];
    assert_eq!(req.method, Method::Get);
    assert_eq!(req.url, "http://backend/api/endpoint");
    assert!(req.body.is_none());
    assert!(metrics.checks().is_empty());
}

#[test]
fn unknown_scripts_are_rejected() {
    assert!(scripts::build("nope", "http://x", &Metrics::new()).is_err());
    assert!(scripts::info("nope").is_err());
    assert!(RunPlan::resolve("nope", &LoadConfig::default()).is_err());
}

#[test]
fn plan_layers_config_over_script_defaults() {
    let plan = RunPlan::resolve(scripts::RECOMMEND, &LoadConfig::default()).unwrap();
    assert_eq!(plan.vus, 50);
    assert_eq!(plan.duration, Duration::from_secs(10));
    assert_eq!(plan.sleep, Duration::from_millis(500));
    assert_eq!(plan.base_url, "http://host.docker.internal:8080");
    assert_eq!(plan.timeout, Duration::from_secs(60));
    assert_eq!(plan.graceful_stop, Duration::from_secs(30));

    let cfg = LoadConfig {
        vus: Some(3),
        base_url: Some("http://staging:8080".into()),
        ..Default::default()
    };
    let plan = RunPlan::resolve(scripts::ENDPOINT_PROBE, &cfg).unwrap();
    assert_eq!(plan.vus, 3);
    assert_eq!(plan.duration, Duration::from_secs(30));
    assert_eq!(plan.sleep, Duration::from_secs(1));
    assert_eq!(plan.base_url, "http://staging:8080");

    let json = plan.to_json();
    assert_eq!(json["duration"], "30s");
    assert!(json["payload"].is_null());
}

#[test]
fn probe_defaults_to_a_placeholder() {
    let plan = RunPlan::resolve(scripts::ENDPOINT_PROBE, &LoadConfig::default()).unwrap();
    assert_eq!(plan.base_url, scripts::PLACEHOLDER_HOST);
}
