use std::time::Duration;

use vibeload_metrics::Metrics;
use vibeload_obs::{render, serve, spawn_host_polling, system_stats};

fn sample_metrics() -> Metrics {
    let m = Metrics::new();
    m.counter("cache_fail").unwrap().add(3);
    m.trend("cache_duration").unwrap().add(42.0);
    m.check("cache status is 200", true);
    m.check("cache status is 200", false);
    m
}

#[test]
fn exposition_lists_every_metric() {
    let text = render(&sample_metrics()).unwrap();
    assert!(text.contains(r#"vibeload_counter_total{metric="cache_fail"} 3"#), "{}", text);
    assert!(text.contains(r#"vibeload_trend_ms{metric="cache_duration",stat="avg"} 42"#), "{}", text);
    assert!(text.contains(r#"vibeload_rate{metric="checks"} 0.5"#), "{}", text);
    assert!(text.contains(r#"vibeload_checks_total{check="cache status is 200",result="fail"} 1"#), "{}", text);
    assert!(text.contains(r#"vibeload_counter_total{metric="http_reqs"} 0"#), "{}", text);
}

#[tokio::test]
async fn serves_metrics_over_http() {
    let (addr, srv) = serve("127.0.0.1:0", sample_metrics()).await.unwrap();
    let base = format!("http://{}", addr);
    let client = reqwest::Client::new();

    let r = client.get(format!("{}/healthz", base)).send().await.unwrap();
    assert!(r.status().is_success());

    let r = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert!(r.status().is_success());
    let body = r.text().await.unwrap();
    assert!(body.contains("vibeload_counter_total"));

    srv.abort();
}

#[tokio::test]
async fn host_polling_fills_system_stats() {
    let poller = spawn_host_polling();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = system_stats();
    assert!(stats.memory_total_mib > 0);
    assert!(stats.memory_used_mib <= stats.memory_total_mib);
    poller.abort();
}
