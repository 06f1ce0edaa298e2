use std::process::{Command, Output};

fn vibeload(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vibeload"))
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("VIBELOAD_CONFIG")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
        .output()
        .expect("spawn vibeload")
}

#[test]
fn list_shows_every_script() {
    let out = vibeload(&["list"]);
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    for name in ["recommend", "recommend-source", "endpoint-probe"] {
        assert!(stdout.contains(name), "{}", stdout);
    }
}

#[test]
fn inspect_applies_cli_overrides() {
    let out = vibeload(&["inspect", "recommend", "--vus", "4", "--base-url", "http://svc:9000"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let plan: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(plan["vus"], 4);
    assert_eq!(plan["duration"], "10s");
    assert_eq!(plan["base_url"], "http://svc:9000");
    assert_eq!(plan["payload"]["mode"], "MAINTAIN");
}

#[test]
fn dry_run_passes_when_thresholds_hold() {
    let out = vibeload(&[
        "run",
        "recommend",
        "--dry-run",
        "--vus",
        "2",
        "--duration",
        "300ms",
        "--sleep",
        "50ms",
        "--strict-checks",
    ]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("status is 200"), "{}", stdout);
    assert!(stdout.contains("http_req_duration"), "{}", stdout);
}

#[test]
fn failed_threshold_exits_99() {
    let out = vibeload(&[
        "run",
        "recommend",
        "--dry-run",
        "--vus",
        "2",
        "--duration",
        "300ms",
        "--threshold",
        "http_reqs:count==0",
    ]);
    assert_eq!(out.status.code(), Some(99));
}

#[test]
fn threshold_on_unknown_metric_is_an_error() {
    let out = vibeload(&["run", "recommend", "--dry-run", "--duration", "100ms", "--threshold", "nope:count==0"]);
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn summary_export_writes_json() {
    let path = std::env::temp_dir().join(format!("vibeload-summary-{}.json", std::process::id()));
    let out = vibeload(&[
        "run",
        "recommend-source",
        "--dry-run",
        "--vus",
        "1",
        "--duration",
        "200ms",
        "--sleep",
        "20ms",
        "--summary-export",
        path.to_str().unwrap(),
    ]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let summary: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(summary["script"], "recommend-source");
    assert!(summary["metrics"]["cache_success"]["values"]["count"].as_f64().unwrap() >= 1.0);
    assert_eq!(summary["metrics"]["cache_duration"]["type"], "trend");
    let _ = std::fs::remove_file(path);
}
