use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::{self, deserialize_opt};
use crate::{LoadError, Result};

pub const CONFIG_ENV: &str = "VIBELOAD_CONFIG";

/// One layer of run configuration. Every field is optional so layers can be
/// stacked: script defaults, YAML file, environment, command line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    pub vus: Option<usize>,
    #[serde(deserialize_with = "deserialize_opt")]
    pub duration: Option<Duration>,
    #[serde(deserialize_with = "deserialize_opt")]
    pub sleep: Option<Duration>,
    pub base_url: Option<String>,
    #[serde(deserialize_with = "deserialize_opt")]
    pub timeout: Option<Duration>,
    #[serde(deserialize_with = "deserialize_opt")]
    pub graceful_stop: Option<Duration>,
    /// metric name -> threshold expressions, e.g. `http_req_duration: ["p(95)<500"]`
    pub thresholds: BTreeMap<String, Vec<String>>,
    pub summary_export: Option<PathBuf>,
    pub metrics_addr: Option<String>,
}

impl LoadConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str::<LoadConfig>(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Reads `VIBELOAD_*` variables through `get`, so callers can supply
    /// something other than the process environment.
    pub fn from_env_with<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = get("VIBELOAD_VUS") {
            let vus = v
                .trim()
                .parse()
                .map_err(|_| LoadError::Config(format!("VIBELOAD_VUS must be an integer, got `{}`", v)))?;
            cfg.vus = Some(vus);
        }
        if let Some(v) = get("VIBELOAD_DURATION") { cfg.duration = Some(duration::parse(&v)?); }
        if let Some(v) = get("VIBELOAD_SLEEP") { cfg.sleep = Some(duration::parse(&v)?); }
        if let Some(v) = get("VIBELOAD_TIMEOUT") { cfg.timeout = Some(duration::parse(&v)?); }
        if let Some(v) = get("VIBELOAD_GRACEFUL_STOP") { cfg.graceful_stop = Some(duration::parse(&v)?); }
        if let Some(v) = get("VIBELOAD_BASE_URL") { cfg.base_url = Some(v); }
        Ok(cfg)
    }

    /// File layer (explicit path, else `VIBELOAD_CONFIG`) overlaid with the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => env::var(CONFIG_ENV).ok().map(PathBuf::from),
        };
        let base = match file {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        Ok(base.overlay(Self::from_env_with(|k| env::var(k).ok())?))
    }

    /// Fields set in `upper` win; threshold lists are merged per metric.
    pub fn overlay(mut self, upper: LoadConfig) -> LoadConfig {
        if upper.vus.is_some() { self.vus = upper.vus; }
        if upper.duration.is_some() { self.duration = upper.duration; }
        if upper.sleep.is_some() { self.sleep = upper.sleep; }
        if upper.base_url.is_some() { self.base_url = upper.base_url; }
        if upper.timeout.is_some() { self.timeout = upper.timeout; }
        if upper.graceful_stop.is_some() { self.graceful_stop = upper.graceful_stop; }
        if upper.summary_export.is_some() { self.summary_export = upper.summary_export; }
        if upper.metrics_addr.is_some() { self.metrics_addr = upper.metrics_addr; }
        for (metric, exprs) in upper.thresholds {
            let entry = self.thresholds.entry(metric).or_default();
            for e in exprs {
                if !entry.contains(&e) { entry.push(e); }
            }
        }
        self
    }
}
