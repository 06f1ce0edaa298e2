//! End-of-run report: text for the terminal, JSON for `--summary-export`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;
use vibeload_common::{LoadError, Result};

use crate::{CheckTally, MetricKind, Metrics, ThresholdOutcome};

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub script: String,
    pub vus: usize,
    pub elapsed_secs: f64,
    pub interrupted_iterations: u64,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub checks: Vec<CheckTally>,
    pub thresholds: Vec<ThresholdOutcome>,
}

impl Summary {
    pub fn collect(
        script: &str,
        vus: usize,
        elapsed: Duration,
        interrupted_iterations: u64,
        metrics: &Metrics,
        thresholds: Vec<ThresholdOutcome>,
    ) -> Self {
        let secs = elapsed.as_secs_f64();
        let metrics_map = metrics
            .snapshot()
            .into_iter()
            .map(|snap| {
                let mut values = snap.values;
                if snap.kind == MetricKind::Counter {
                    let count = values.get("count").copied().unwrap_or(0.0);
                    values.insert("rate".to_string(), if secs > 0.0 { count / secs } else { 0.0 });
                }
                (snap.name, MetricSummary { kind: snap.kind, values })
            })
            .collect();
        Self {
            script: script.to_string(),
            vus,
            elapsed_secs: secs,
            interrupted_iterations,
            metrics: metrics_map,
            checks: metrics.checks(),
            thresholds,
        }
    }

    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| LoadError::Message(format!("encode summary: {}", e)))
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "\n  script: {}   vus: {}   elapsed: {:.1}s   interrupted iterations: {}\n",
            self.script, self.vus, self.elapsed_secs, self.interrupted_iterations
        );

        for c in &self.checks {
            let total = c.passes + c.fails;
            if c.fails == 0 {
                let _ = writeln!(out, "     ✓ {}", c.name);
            } else {
                let pct = if total > 0 { c.passes as f64 * 100.0 / total as f64 } else { 0.0 };
                let _ = writeln!(out, "     ✗ {}", c.name);
                let _ = writeln!(out, "      ↳  {:.0}% : ✓ {} / ✗ {}", pct, c.passes, c.fails);
            }
        }
        if !self.checks.is_empty() {
            out.push('\n');
        }

        for (name, m) in &self.metrics {
            let marker = match self.verdict(name) {
                Some(true) => "✓ ",
                Some(false) => "✗ ",
                None => "  ",
            };
            let dots = ".".repeat(28usize.saturating_sub(name.len()));
            let _ = writeln!(out, "   {}{}{}: {}", marker, name, dots, render_values(m));
        }

        if !self.thresholds.is_empty() {
            out.push('\n');
            for t in &self.thresholds {
                let observed = t.observed.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "no samples".into());
                let _ = writeln!(
                    out,
                    "     {} {}: {} (observed {})",
                    if t.passed { "✓" } else { "✗" },
                    t.metric,
                    t.expr,
                    observed
                );
            }
        }
        out
    }

    /// `None` when no threshold targets `metric`.
    fn verdict(&self, metric: &str) -> Option<bool> {
        let mut relevant = self.thresholds.iter().filter(|t| t.metric == metric).peekable();
        relevant.peek()?;
        Some(relevant.all(|t| t.passed))
    }
}

fn render_values(m: &MetricSummary) -> String {
    let v = |k: &str| m.values.get(k).copied().unwrap_or(0.0);
    match m.kind {
        MetricKind::Counter => format!("{:<8} {:.2}/s", v("count") as u64, v("rate")),
        MetricKind::Rate => {
            let rate = m.values.get("rate").map(|r| format!("{:.2}%", r * 100.0)).unwrap_or_else(|| "-".into());
            format!("{:<8} ✓ {} ✗ {}", rate, v("passes") as u64, v("fails") as u64)
        }
        MetricKind::Trend if v("count") == 0.0 => "no samples".to_string(),
        MetricKind::Trend => format!(
            "avg={} min={} med={} max={} p(90)={} p(95)={}",
            fmt_ms(v("avg")),
            fmt_ms(v("min")),
            fmt_ms(v("med")),
            fmt_ms(v("max")),
            fmt_ms(v("p(90)")),
            fmt_ms(v("p(95)")),
        ),
    }
}

pub fn fmt_ms(ms: f64) -> String {
    if ms >= 1_000.0 {
        format!("{:.2}s", ms / 1_000.0)
    } else if ms >= 1.0 {
        format!("{:.2}ms", ms)
    } else {
        format!("{:.0}µs", ms * 1_000.0)
    }
}
