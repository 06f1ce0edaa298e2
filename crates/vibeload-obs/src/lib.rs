//! Observability utilities: Prometheus exposition and load-generator host stats

use std::net::SocketAddr;
use std::time::Duration;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use vibeload_common::{LoadError, Result};
use vibeload_metrics::{MetricKind, Metrics};

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

static HOST_CPU: Lazy<Gauge> = Lazy::new(|| prometheus::register_gauge!("vibeload_host_cpu_percent", "Load generator CPU usage percent").expect("gauge"));
static HOST_MEM_USED: Lazy<IntGauge> = Lazy::new(|| prometheus::register_int_gauge!("vibeload_host_memory_used_bytes", "Load generator memory in use (bytes)").expect("gauge"));
static HOST_MEM_TOTAL: Lazy<IntGauge> = Lazy::new(|| prometheus::register_int_gauge!("vibeload_host_memory_total_bytes", "Load generator memory total (bytes)").expect("gauge"));

fn prom_err(e: prometheus::Error) -> LoadError {
    LoadError::Message(format!("prometheus: {}", e))
}

/// Prometheus text exposition of the run's metrics plus host gauges.
pub fn render(metrics: &Metrics) -> Result<String> {
    let registry = Registry::new();
    let counters = IntCounterVec::new(Opts::new("vibeload_counter_total", "Counter metrics"), &["metric"]).map_err(prom_err)?;
    let trends = GaugeVec::new(Opts::new("vibeload_trend_ms", "Trend aggregates in milliseconds"), &["metric", "stat"]).map_err(prom_err)?;
    let rates = GaugeVec::new(Opts::new("vibeload_rate", "Fraction of true samples"), &["metric"]).map_err(prom_err)?;
    let checks = IntCounterVec::new(Opts::new("vibeload_checks_total", "Check outcomes"), &["check", "result"]).map_err(prom_err)?;
    registry.register(Box::new(counters.clone())).map_err(prom_err)?;
    registry.register(Box::new(trends.clone())).map_err(prom_err)?;
    registry.register(Box::new(rates.clone())).map_err(prom_err)?;
    registry.register(Box::new(checks.clone())).map_err(prom_err)?;

    for snap in metrics.snapshot() {
        let name = snap.name.as_str();
        match snap.kind {
            MetricKind::Counter => {
                let count = snap.values.get("count").copied().unwrap_or(0.0);
                counters.with_label_values(&[name]).inc_by(count as u64);
            }
            MetricKind::Rate => {
                if let Some(rate) = snap.values.get("rate") {
                    rates.with_label_values(&[name]).set(*rate);
                }
            }
            MetricKind::Trend => {
                for (stat, v) in &snap.values {
                    trends.with_label_values(&[name, stat.as_str()]).set(*v);
                }
            }
        }
    }
    for c in metrics.checks() {
        checks.with_label_values(&[c.name.as_str(), "pass"]).inc_by(c.passes);
        checks.with_label_values(&[c.name.as_str(), "fail"]).inc_by(c.fails);
    }

    let mut families = registry.gather();
    families.extend(prometheus::gather());
    let mut buffer = Vec::new();
    ENCODER.encode(&families, &mut buffer).map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| LoadError::Message(e.to_string()))
}

async fn metrics_handler(State(metrics): State<Metrics>) -> impl IntoResponse {
    match render(&metrics) {
        Ok(body) => ([("content-type", ENCODER.format_type().to_string())], body).into_response(),
        Err(e) => {
            tracing::warn!(target: "obs", "render failed: {}", e);
            (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

pub fn router(metrics: Metrics) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

/// Binds `addr` and serves `/metrics` until the returned task is aborted.
/// Returns the bound address, which differs from `addr` when its port is 0.
pub async fn serve(addr: &str, metrics: Metrics) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    tracing::info!(target: "obs", "metrics on http://{}/metrics", local);
    let app = router(metrics);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(target: "obs", "metrics server stopped: {}", e);
        }
    });
    Ok((local, handle))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub memory_used_mib: u64,
    pub memory_total_mib: u64,
}

/// Samples CPU and memory every second into the host gauges.
pub fn spawn_host_polling() -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sys = sysinfo::System::new();
        loop {
            sys.refresh_cpu();
            sys.refresh_memory();
            HOST_CPU.set(sys.global_cpu_info().cpu_usage() as f64);
            HOST_MEM_USED.set(sys.used_memory() as i64);
            HOST_MEM_TOTAL.set(sys.total_memory() as i64);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    })
}

/// Last values seen by [`spawn_host_polling`]; zeros if it never ran.
pub fn system_stats() -> SystemStats {
    SystemStats {
        cpu_percent: HOST_CPU.get(),
        memory_used_mib: HOST_MEM_USED.get().max(0) as u64 / 1024 / 1024,
        memory_total_mib: HOST_MEM_TOTAL.get().max(0) as u64 / 1024 / 1024,
    }
}
