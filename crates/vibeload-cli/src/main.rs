use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use opentelemetry_otlp::WithExportConfig;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vibeload_common::config::LoadConfig;
use vibeload_common::duration;
use vibeload_core::{scripts, RunPlan, Runner};
use vibeload_http::{mock::MockTransport, HttpTransport, Transport};
use vibeload_metrics::{builtin, Metrics, Summary, Thresholds};

/// Exit status when the run completed but a threshold did not hold.
const THRESHOLDS_FAILED: u8 = 99;

#[derive(Parser, Debug)]
#[command(name = "vibeload", version, about = "Load generator for the recommendation API")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a built-in script
    Run(RunArgs),
    /// List built-in scripts with their defaults
    List,
    /// Print the resolved run plan of a script as JSON
    Inspect(InspectArgs),
    Version,
}

#[derive(Args, Debug)]
struct Overrides {
    /// YAML config file (defaults to $VIBELOAD_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(long)]
    vus: Option<usize>,
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,
    /// Pause at the end of every iteration
    #[arg(long, value_parser = parse_duration)]
    sleep: Option<Duration>,
    #[arg(long)]
    base_url: Option<String>,
    /// Per-request timeout
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,
    /// How long in-flight iterations may run once the duration is over
    #[arg(long, value_parser = parse_duration)]
    graceful_stop: Option<Duration>,
    /// METRIC:EXPR, e.g. `http_req_duration:p(95)<500`; repeatable
    #[arg(long = "threshold", value_parser = parse_threshold)]
    thresholds: Vec<(String, String)>,
    /// Fail the run unless every check passed
    #[arg(long)]
    strict_checks: bool,
    /// Write the end-of-run summary as JSON
    #[arg(long)]
    summary_export: Option<PathBuf>,
    /// Serve Prometheus metrics on this address during the run
    #[arg(long)]
    metrics_addr: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    script: String,
    /// Answer every request in-process with 200 instead of hitting the network
    #[arg(long)]
    dry_run: bool,
    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Args, Debug)]
struct InspectArgs {
    script: String,
    #[command(flatten)]
    overrides: Overrides,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    duration::parse(s).map_err(|e| e.to_string())
}

fn parse_threshold(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((metric, expr)) if !metric.trim().is_empty() && !expr.trim().is_empty() => {
            Ok((metric.trim().to_string(), expr.trim().to_string()))
        }
        _ => Err(format!("expected METRIC:EXPR, got `{}`", s)),
    }
}

impl Overrides {
    fn to_config(&self) -> LoadConfig {
        let mut cfg = LoadConfig {
            vus: self.vus,
            duration: self.duration,
            sleep: self.sleep,
            base_url: self.base_url.clone(),
            timeout: self.timeout,
            graceful_stop: self.graceful_stop,
            summary_export: self.summary_export.clone(),
            metrics_addr: self.metrics_addr.clone(),
            ..Default::default()
        };
        for (metric, expr) in &self.thresholds {
            cfg.thresholds.entry(metric.clone()).or_default().push(expr.clone());
        }
        if self.strict_checks {
            cfg.thresholds.entry(builtin::CHECKS.to_string()).or_default().push("rate==1".to_string());
        }
        cfg
    }

    fn resolve(&self, script: &str) -> anyhow::Result<RunPlan> {
        let cfg = LoadConfig::load(self.config.as_deref())
            .context("loading configuration")?
            .overlay(self.to_config());
        Ok(RunPlan::resolve(script, &cfg)?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::List => list(),
        Commands::Inspect(args) => inspect(args),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(ExitCode::SUCCESS)
        }
    };
    opentelemetry::global::shutdown_tracer_provider();
    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let plan = args.overrides.resolve(&args.script)?;
    let metrics = Metrics::new();
    let scenario = scripts::build(plan.script, &plan.base_url, &metrics)?;
    let thresholds = Thresholds::from_map(&plan.thresholds)?;
    thresholds.validate(&metrics)?;

    let transport: Arc<dyn Transport> = if args.dry_run {
        tracing::info!("dry run: requests are answered in-process");
        Arc::new(MockTransport::ok().with_latency(Duration::from_millis(2)))
    } else {
        Arc::new(HttpTransport::new(plan.timeout)?)
    };

    let exporter = match &plan.metrics_addr {
        Some(addr) => Some(
            vibeload_obs::serve(addr, metrics.clone())
                .await
                .with_context(|| format!("binding metrics endpoint {}", addr))?
                .1,
        ),
        None => None,
    };
    let poller = vibeload_obs::spawn_host_polling();

    let runner = Runner::new(plan.run_options(), transport, metrics.clone())?;
    let stop = runner.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping");
            stop.stop();
        }
    });
    let report = runner.run(scenario).await?;

    let host = vibeload_obs::system_stats();
    poller.abort();
    if let Some(exporter) = exporter {
        exporter.abort();
    }

    let outcomes = thresholds.evaluate(&metrics, report.elapsed);
    let summary = Summary::collect(plan.script, plan.vus, report.elapsed, report.interrupted, &metrics, outcomes);
    print!("{}", summary.render_text());
    println!(
        "\n   host: cpu {:.1}%  memory {} / {} MiB\n",
        host.cpu_percent, host.memory_used_mib, host.memory_total_mib
    );

    if let Some(path) = &plan.summary_export {
        std::fs::write(path, summary.to_json()?).with_context(|| format!("writing summary to {}", path.display()))?;
        tracing::info!("summary written to {}", path.display());
    }

    if summary.thresholds_passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!("some thresholds have failed");
        Ok(ExitCode::from(THRESHOLDS_FAILED))
    }
}

fn list() -> anyhow::Result<ExitCode> {
    println!("{:<18} {:>4} {:>8} {:>7}  {:<34} about", "script", "vus", "duration", "sleep", "base url");
    for s in scripts::catalog() {
        let d = &s.defaults;
        println!(
            "{:<18} {:>4} {:>8} {:>7}  {:<34} {}",
            s.name,
            d.vus,
            duration::format(d.duration),
            duration::format(d.sleep),
            d.base_url,
            s.about
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn inspect(args: InspectArgs) -> anyhow::Result<ExitCode> {
    let plan = args.overrides.resolve(&args.script)?;
    println!("{}", serde_json::to_string_pretty(&plan.to_json())?);
    Ok(ExitCode::SUCCESS)
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
