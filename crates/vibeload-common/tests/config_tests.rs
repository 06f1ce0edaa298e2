use std::collections::HashMap;
use std::time::Duration;

use vibeload_common::config::LoadConfig;
use vibeload_common::duration;

#[test]
fn parses_duration_forms() {
    assert_eq!(duration::parse("500ms").unwrap(), Duration::from_millis(500));
    assert_eq!(duration::parse("0.5s").unwrap(), Duration::from_millis(500));
    assert_eq!(duration::parse("10s").unwrap(), Duration::from_secs(10));
    assert_eq!(duration::parse("1m30s").unwrap(), Duration::from_secs(90));
    assert_eq!(duration::parse("2h").unwrap(), Duration::from_secs(7200));
    assert_eq!(duration::parse("3").unwrap(), Duration::from_secs(3));
    assert_eq!(duration::parse(" 0 ").unwrap(), Duration::ZERO);
}

#[test]
fn rejects_bad_durations() {
    for bad in ["", "  ", "10x", "-1s", "-3", "s", "1.2.3s", "10 s", "inf"] {
        assert!(duration::parse(bad).is_err(), "accepted {bad:?}");
    }
}

#[test]
fn rejects_durations_out_of_range() {
    for huge in ["1e30", "1e300", "99999999999999999999h", "99999999999999999999s", "9999999999999999.5h"] {
        assert!(duration::parse(huge).is_err(), "accepted {huge:?}");
    }
    assert!(LoadConfig::from_yaml_str("sleep: 1e300\n").is_err());
    assert!(LoadConfig::from_yaml_str("duration: \"1e30\"\n").is_err());
    assert!(LoadConfig::from_env_with(|k| (k == "VIBELOAD_TIMEOUT").then(|| "1e30".to_string())).is_err());
}

#[test]
fn formats_durations() {
    assert_eq!(duration::format(Duration::ZERO), "0s");
    assert_eq!(duration::format(Duration::from_millis(250)), "250ms");
    assert_eq!(duration::format(Duration::from_millis(1500)), "1.5s");
    assert_eq!(duration::format(Duration::from_secs(90)), "1m30s");
    assert_eq!(duration::format(Duration::from_secs(3600)), "1h");
}

#[test]
fn yaml_layer_reads_durations_and_thresholds() {
    let cfg = LoadConfig::from_yaml_str(
        r#"
vus: 5
duration: 1m
sleep: 0.25
base_url: http://localhost:9090
thresholds:
  http_req_duration: ["p(95)<500"]
  cache_fail: ["count==0"]
"#,
    )
    .unwrap();
    assert_eq!(cfg.vus, Some(5));
    assert_eq!(cfg.duration, Some(Duration::from_secs(60)));
    assert_eq!(cfg.sleep, Some(Duration::from_millis(250)));
    assert_eq!(cfg.base_url.as_deref(), Some("http://localhost:9090"));
    assert_eq!(cfg.thresholds["cache_fail"], vec!["count==0".to_string()]);
    assert!(cfg.timeout.is_none());
}

#[test]
fn yaml_layer_rejects_unknown_keys() {
    assert!(LoadConfig::from_yaml_str("vu: 3\n").is_err());
}

#[test]
fn env_layer_and_precedence() {
    let vars: HashMap<&str, &str> = [("VIBELOAD_VUS", "7"), ("VIBELOAD_SLEEP", "100ms")].into_iter().collect();
    let env = LoadConfig::from_env_with(|k| vars.get(k).map(|v| v.to_string())).unwrap();
    assert_eq!(env.vus, Some(7));

    let file = LoadConfig {
        vus: Some(2),
        duration: Some(Duration::from_secs(5)),
        ..Default::default()
    };
    let cli = LoadConfig {
        sleep: Some(Duration::ZERO),
        ..Default::default()
    };
    let merged = file.overlay(env).overlay(cli);
    assert_eq!(merged.vus, Some(7));
    assert_eq!(merged.duration, Some(Duration::from_secs(5)));
    assert_eq!(merged.sleep, Some(Duration::ZERO));
}

#[test]
fn env_layer_rejects_garbage() {
    assert!(LoadConfig::from_env_with(|k| (k == "VIBELOAD_VUS").then(|| "many".to_string())).is_err());
    assert!(LoadConfig::from_env_with(|k| (k == "VIBELOAD_DURATION").then(|| "soon".to_string())).is_err());
}
