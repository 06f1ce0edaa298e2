//! Pass/fail criteria over metric aggregates, e.g. `p(95)<500` or `count==0`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use vibeload_common::{LoadError, Result};

use crate::{Agg, MetricKind, Metrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Op {
    fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Op::Lt => lhs < rhs,
            Op::Le => lhs <= rhs,
            Op::Gt => lhs > rhs,
            Op::Ge => lhs >= rhs,
            Op::Eq => lhs == rhs,
            Op::Ne => lhs != rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub metric: String,
    pub expr: String,
    agg: Agg,
    op: Op,
    bound: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub metric: String,
    pub expr: String,
    /// `None` when the metric had no samples.
    pub observed: Option<f64>,
    pub passed: bool,
}

impl Threshold {
    pub fn parse(metric: &str, expr: &str) -> Result<Self> {
        let bad = |reason: &str| LoadError::InvalidThreshold {
            metric: metric.to_string(),
            expr: expr.to_string(),
            reason: reason.to_string(),
        };
        let op_at = expr.find(&['<', '>', '=', '!'][..]).ok_or_else(|| bad("missing comparison operator"))?;
        let (lhs, rest) = expr.split_at(op_at);
        let (op, rhs) = if let Some(r) = rest.strip_prefix("<=") {
            (Op::Le, r)
        } else if let Some(r) = rest.strip_prefix(">=") {
            (Op::Ge, r)
        } else if let Some(r) = rest.strip_prefix("==") {
            (Op::Eq, r)
        } else if let Some(r) = rest.strip_prefix("!=") {
            (Op::Ne, r)
        } else if let Some(r) = rest.strip_prefix('<') {
            (Op::Lt, r)
        } else if let Some(r) = rest.strip_prefix('>') {
            (Op::Gt, r)
        } else {
            return Err(bad("unknown comparison operator"));
        };

        let agg = match lhs.trim() {
            "count" => Agg::Count,
            "rate" => Agg::Rate,
            "avg" => Agg::Avg,
            "min" => Agg::Min,
            "med" => Agg::Med,
            "max" => Agg::Max,
            other => {
                let q = other
                    .strip_prefix("p(")
                    .and_then(|s| s.strip_suffix(')'))
                    .ok_or_else(|| bad("unknown aggregation"))?;
                let q: f64 = q.trim().parse().map_err(|_| bad("percentile is not a number"))?;
                if !(0.0..=100.0).contains(&q) {
                    return Err(bad("percentile must be within 0..=100"));
                }
                Agg::Percentile(q)
            }
        };
        let bound: f64 = rhs.trim().parse().map_err(|_| bad("bound is not a number"))?;
        if !bound.is_finite() {
            return Err(bad("bound must be finite"));
        }
        Ok(Self { metric: metric.to_string(), expr: expr.to_string(), agg, op, bound })
    }

    fn supported_by(&self, kind: MetricKind) -> bool {
        matches!(
            (kind, self.agg),
            (MetricKind::Counter, Agg::Count | Agg::Rate)
                | (MetricKind::Rate, Agg::Rate)
                | (MetricKind::Trend, Agg::Count | Agg::Avg | Agg::Min | Agg::Med | Agg::Max | Agg::Percentile(_))
        )
    }

    pub fn evaluate(&self, metrics: &Metrics, elapsed: Duration) -> ThresholdOutcome {
        let observed = match metrics.aggregate(&self.metric, self.agg, elapsed) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(target: "metrics", "threshold `{}` on `{}`: {}", self.expr, self.metric, e);
                return ThresholdOutcome { metric: self.metric.clone(), expr: self.expr.clone(), observed: None, passed: false };
            }
        };
        let passed = match observed {
            Some(v) => self.op.holds(v, self.bound),
            None => true,
        };
        ThresholdOutcome { metric: self.metric.clone(), expr: self.expr.clone(), observed, passed }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Thresholds(Vec<Threshold>);

impl Thresholds {
    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut all = Vec::new();
        for (metric, exprs) in map {
            for e in exprs {
                all.push(Threshold::parse(metric, e)?);
            }
        }
        Ok(Self(all))
    }

    /// Every threshold must name a declared metric and an aggregation that
    /// metric's kind supports.
    pub fn validate(&self, metrics: &Metrics) -> Result<()> {
        for t in &self.0 {
            let kind = metrics.kind_of(&t.metric).ok_or_else(|| LoadError::InvalidThreshold {
                metric: t.metric.clone(),
                expr: t.expr.clone(),
                reason: "no such metric".into(),
            })?;
            if !t.supported_by(kind) {
                return Err(LoadError::InvalidThreshold {
                    metric: t.metric.clone(),
                    expr: t.expr.clone(),
                    reason: format!("aggregation not available on a {}", kind.as_str()),
                });
            }
        }
        Ok(())
    }

    pub fn evaluate(&self, metrics: &Metrics, elapsed: Duration) -> Vec<ThresholdOutcome> {
        self.0.iter().map(|t| t.evaluate(metrics, elapsed)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
