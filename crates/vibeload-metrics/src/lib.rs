//! Append-only metric registry shared by every virtual user.
//!
//! Three metric kinds exist: [`Counter`] (monotonic tally), [`Trend`]
//! (series of millisecond observations) and [`Rate`] (fraction of true
//! samples). Handles are cheap to clone and safe to record from any task.

pub mod summary;
pub mod threshold;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use vibeload_common::{LoadError, Result};

pub use summary::Summary;
pub use threshold::{Threshold, ThresholdOutcome, Thresholds};

/// Metrics every run records regardless of the scenario.
pub mod builtin {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const CHECKS: &str = "checks";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Trend,
    Rate,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Trend => "trend",
            MetricKind::Rate => "rate",
        }
    }
}

#[derive(Clone)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1)
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
pub struct Rate {
    trues: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl Rate {
    pub fn add(&self, hit: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.trues.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn trues(&self) -> u64 {
        self.trues.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn value(&self) -> Option<f64> {
        let total = self.total();
        (total > 0).then(|| self.trues() as f64 / total as f64)
    }
}

struct TrendData {
    // microseconds; exact sum/min/max are kept beside it
    hist: Histogram<u64>,
    count: u64,
    sum_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl TrendData {
    fn new() -> Self {
        Self {
            hist: Histogram::new(3).expect("3 significant figures is a valid histogram precision"),
            count: 0,
            sum_ms: 0.0,
            min_ms: f64::INFINITY,
            max_ms: 0.0,
        }
    }
}

#[derive(Clone)]
pub struct Trend {
    data: Arc<Mutex<TrendData>>,
}

/// Aggregates of a trend, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrendStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Trend {
    pub fn add(&self, ms: f64) {
        if !ms.is_finite() {
            tracing::debug!(target: "metrics", "dropping non-finite trend sample");
            return;
        }
        let ms = ms.max(0.0);
        let mut d = self.data.lock();
        d.hist.saturating_record((ms * 1_000.0).round() as u64);
        d.count += 1;
        d.sum_ms += ms;
        d.min_ms = d.min_ms.min(ms);
        d.max_ms = d.max_ms.max(ms);
    }

    pub fn add_duration(&self, d: Duration) {
        self.add(d.as_secs_f64() * 1_000.0)
    }

    pub fn count(&self) -> u64 {
        self.data.lock().count
    }

    /// `q` in `0.0..=100.0`; `None` while empty.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        let d = self.data.lock();
        if d.count == 0 { return None; }
        let v = d.hist.value_at_quantile((q / 100.0).clamp(0.0, 1.0)) as f64 / 1_000.0;
        // the histogram rounds to bucket edges; never report outside observed bounds
        Some(v.clamp(d.min_ms, d.max_ms))
    }

    pub fn stats(&self) -> Option<TrendStats> {
        let (count, sum, min, max) = {
            let d = self.data.lock();
            (d.count, d.sum_ms, d.min_ms, d.max_ms)
        };
        if count == 0 { return None; }
        Some(TrendStats {
            count,
            avg: sum / count as f64,
            min,
            med: self.percentile(50.0)?,
            max,
            p90: self.percentile(90.0)?,
            p95: self.percentile(95.0)?,
            p99: self.percentile(99.0)?,
        })
    }
}

#[derive(Clone)]
enum Entry {
    Counter(Counter),
    Trend(Trend),
    Rate(Rate),
}

impl Entry {
    fn kind(&self) -> MetricKind {
        match self {
            Entry::Counter(_) => MetricKind::Counter,
            Entry::Trend(_) => MetricKind::Trend,
            Entry::Rate(_) => MetricKind::Rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    /// `count` for counters, `passes`/`fails`/`rate` for rates,
    /// `count`/`avg`/`min`/`med`/`max`/`p(N)` for trends.
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

struct Inner {
    series: RwLock<BTreeMap<String, Entry>>,
    // declaration order, as scenarios list them
    checks: Mutex<Vec<CheckTally>>,
    checks_rate: Rate,
}

/// Process-wide aggregation point; clone freely.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

/// Aggregations a threshold or report can ask for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Agg {
    Count,
    Rate,
    Avg,
    Min,
    Med,
    Max,
    Percentile(f64),
}

impl Metrics {
    pub fn new() -> Self {
        let checks_rate = Rate { trues: Arc::default(), total: Arc::default() };
        let metrics = Self {
            inner: Arc::new(Inner {
                series: RwLock::new(BTreeMap::new()),
                checks: Mutex::new(Vec::new()),
                checks_rate: checks_rate.clone(),
            }),
        };
        {
            let mut series = metrics.inner.series.write();
            for name in [builtin::HTTP_REQS, builtin::ITERATIONS] {
                series.insert(name.into(), Entry::Counter(Counter { value: Arc::default() }));
            }
            for name in [builtin::HTTP_REQ_DURATION, builtin::ITERATION_DURATION] {
                series.insert(name.into(), Entry::Trend(Trend { data: Arc::new(Mutex::new(TrendData::new())) }));
            }
            series.insert(builtin::HTTP_REQ_FAILED.into(), Entry::Rate(Rate { trues: Arc::default(), total: Arc::default() }));
            series.insert(builtin::CHECKS.into(), Entry::Rate(checks_rate));
        }
        metrics
    }

    fn declare(&self, name: &str, kind: MetricKind) -> Result<Entry> {
        if let Some(e) = self.inner.series.read().get(name) {
            return Self::same_kind(name, e, kind);
        }
        let mut series = self.inner.series.write();
        if let Some(e) = series.get(name) {
            return Self::same_kind(name, e, kind);
        }
        let entry = match kind {
            MetricKind::Counter => Entry::Counter(Counter { value: Arc::default() }),
            MetricKind::Trend => Entry::Trend(Trend { data: Arc::new(Mutex::new(TrendData::new())) }),
            MetricKind::Rate => Entry::Rate(Rate { trues: Arc::default(), total: Arc::default() }),
        };
        series.insert(name.to_string(), entry.clone());
        tracing::debug!(target: "metrics", metric = name, kind = kind.as_str(), "declared");
        Ok(entry)
    }

    fn same_kind(name: &str, entry: &Entry, kind: MetricKind) -> Result<Entry> {
        if entry.kind() == kind {
            Ok(entry.clone())
        } else {
            Err(LoadError::MetricKind { name: name.to_string(), existing: entry.kind().as_str() })
        }
    }

    /// Declare-or-get; fails when `name` already exists with another kind.
    pub fn counter(&self, name: &str) -> Result<Counter> {
        match self.declare(name, MetricKind::Counter)? {
            Entry::Counter(c) => Ok(c),
            _ => unreachable!("declare checks the kind"),
        }
    }

    pub fn trend(&self, name: &str) -> Result<Trend> {
        match self.declare(name, MetricKind::Trend)? {
            Entry::Trend(t) => Ok(t),
            _ => unreachable!("declare checks the kind"),
        }
    }

    pub fn rate(&self, name: &str) -> Result<Rate> {
        match self.declare(name, MetricKind::Rate)? {
            Entry::Rate(r) => Ok(r),
            _ => unreachable!("declare checks the kind"),
        }
    }

    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.inner.series.read().get(name).map(Entry::kind)
    }

    pub fn names(&self) -> Vec<String> {
        self.inner.series.read().keys().cloned().collect()
    }

    /// Tallies a named check and feeds the `checks` rate. Returns `passed`.
    pub fn check(&self, name: &str, passed: bool) -> bool {
        {
            let mut checks = self.inner.checks.lock();
            let idx = match checks.iter().position(|c| c.name == name) {
                Some(i) => i,
                None => {
                    checks.push(CheckTally { name: name.to_string(), ..Default::default() });
                    checks.len() - 1
                }
            };
            if passed {
                checks[idx].passes += 1;
            } else {
                checks[idx].fails += 1;
            }
        }
        self.inner.checks_rate.add(passed);
        passed
    }

    pub fn checks(&self) -> Vec<CheckTally> {
        self.inner.checks.lock().clone()
    }

    /// `Ok(None)` means the metric has no samples yet. `elapsed` turns a
    /// counter total into a per-second rate.
    pub fn aggregate(&self, name: &str, agg: Agg, elapsed: Duration) -> Result<Option<f64>> {
        let entry = self
            .inner
            .series
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LoadError::Message(format!("unknown metric `{}`", name)))?;
        let unsupported = || LoadError::Message(format!("{:?} is not defined for {} `{}`", agg, entry.kind().as_str(), name));
        match (&entry, agg) {
            (Entry::Counter(c), Agg::Count) => Ok(Some(c.get() as f64)),
            (Entry::Counter(c), Agg::Rate) => {
                let secs = elapsed.as_secs_f64();
                Ok(Some(if secs > 0.0 { c.get() as f64 / secs } else { 0.0 }))
            }
            (Entry::Rate(r), Agg::Rate) => Ok(r.value()),
            (Entry::Trend(t), Agg::Count) => Ok(Some(t.count() as f64)),
            (Entry::Trend(t), Agg::Avg) => Ok(t.stats().map(|s| s.avg)),
            (Entry::Trend(t), Agg::Min) => Ok(t.stats().map(|s| s.min)),
            (Entry::Trend(t), Agg::Max) => Ok(t.stats().map(|s| s.max)),
            (Entry::Trend(t), Agg::Med) => Ok(t.percentile(50.0)),
            (Entry::Trend(t), Agg::Percentile(q)) => Ok(t.percentile(q)),
            _ => Err(unsupported()),
        }
    }

    /// Point-in-time values of every declared metric, ordered by name.
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        let series: Vec<(String, Entry)> = self.inner.series.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        series
            .into_iter()
            .map(|(name, entry)| {
                let mut values = BTreeMap::new();
                match &entry {
                    Entry::Counter(c) => {
                        values.insert("count".to_string(), c.get() as f64);
                    }
                    Entry::Rate(r) => {
                        values.insert("passes".to_string(), r.trues() as f64);
                        values.insert("fails".to_string(), r.total().saturating_sub(r.trues()) as f64);
                        if let Some(v) = r.value() { values.insert("rate".to_string(), v); }
                    }
                    Entry::Trend(t) => {
                        values.insert("count".to_string(), t.count() as f64);
                        if let Some(s) = t.stats() {
                            values.insert("avg".to_string(), s.avg);
                            values.insert("min".to_string(), s.min);
                            values.insert("med".to_string(), s.med);
                            values.insert("max".to_string(), s.max);
                            values.insert("p(90)".to_string(), s.p90);
                            values.insert("p(95)".to_string(), s.p95);
                            values.insert("p(99)".to_string(), s.p99);
                        }
                    }
                }
                MetricSnapshot { name, kind: entry.kind(), values }
            })
            .collect()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
