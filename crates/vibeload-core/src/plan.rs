use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use vibeload_common::config::LoadConfig;
use vibeload_common::{duration, Result};
use vibeload_http::HttpTransport;

use crate::runner::{RunOptions, DEFAULT_GRACEFUL_STOP};
use crate::scripts;

/// Script defaults with every configuration layer applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub script: &'static str,
    pub vus: usize,
    pub duration: Duration,
    pub sleep: Duration,
    pub base_url: String,
    pub timeout: Duration,
    pub graceful_stop: Duration,
    pub thresholds: BTreeMap<String, Vec<String>>,
    pub summary_export: Option<PathBuf>,
    pub metrics_addr: Option<String>,
}

impl RunPlan {
    pub fn resolve(script: &str, cfg: &LoadConfig) -> Result<Self> {
        let info = scripts::info(script)?;
        let d = info.defaults;
        Ok(Self {
            script: info.name,
            vus: cfg.vus.unwrap_or(d.vus),
            duration: cfg.duration.unwrap_or(d.duration),
            sleep: cfg.sleep.unwrap_or(d.sleep),
            base_url: cfg.base_url.clone().unwrap_or_else(|| d.base_url.to_string()),
            timeout: cfg.timeout.unwrap_or(HttpTransport::DEFAULT_TIMEOUT),
            graceful_stop: cfg.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
            thresholds: cfg.thresholds.clone(),
            summary_export: cfg.summary_export.clone(),
            metrics_addr: cfg.metrics_addr.clone(),
        })
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions { vus: self.vus, duration: self.duration, sleep: self.sleep, graceful_stop: self.graceful_stop }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let payload = scripts::info(self.script).ok().and_then(|i| i.payload);
        serde_json::json!({
            "script": self.script,
            "vus": self.vus,
            "duration": duration::format(self.duration),
            "sleep": duration::format(self.sleep),
            "base_url": self.base_url,
            "timeout": duration::format(self.timeout),
            "graceful_stop": duration::format(self.graceful_stop),
            "thresholds": self.thresholds,
            "payload": payload,
        })
    }
}
