//! Human-friendly durations: `500ms`, `0.5s`, `10s`, `1m30s`, `2h`.
//! A bare number is read as seconds. Whole-unit forms go through humantime.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::{LoadError, Result};

pub fn parse(text: &str) -> Result<Duration> {
    let s = text.trim();
    let invalid = || LoadError::InvalidDuration(text.to_string());
    if s.is_empty() || s.contains(char::is_whitespace) || s.starts_with(&['-', '+'][..]) {
        return Err(invalid());
    }
    if let Ok(secs) = s.parse::<f64>() {
        return from_secs(secs).ok_or_else(invalid);
    }
    if let Some(d) = fractional(s) {
        return d.ok_or_else(invalid);
    }
    humantime::parse_duration(s).map_err(|_| invalid())
}

/// `0.5s`, `1.5m`: a single fractional component, which humantime rejects.
/// `None` when `s` is not of that shape.
fn fractional(s: &str) -> Option<Option<Duration>> {
    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
    let (num, unit) = s.split_at(split);
    if !num.contains('.') {
        return None;
    }
    let factor = match unit {
        "ms" => 0.001,
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3_600.0,
        _ => return Some(None),
    };
    Some(num.parse::<f64>().ok().and_then(|v| from_secs(v * factor)))
}

/// Non-negative, finite and representable, or `None`.
fn from_secs(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

/// Inverse of [`parse`] at millisecond resolution.
pub fn format(d: Duration) -> String {
    let total_ms = d.as_millis();
    if total_ms == 0 {
        return "0s".into();
    }
    if total_ms < 1_000 {
        return format!("{}ms", total_ms);
    }
    let mut out = String::new();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let rem_ms = total_ms % 60_000;
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if rem_ms > 0 {
        if rem_ms % 1_000 == 0 {
            out.push_str(&format!("{}s", rem_ms / 1_000));
        } else {
            out.push_str(&format!("{}s", rem_ms as f64 / 1_000.0));
        }
    }
    out
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Text(String),
    Seconds(f64),
}

/// serde adapter for optional duration fields written as `"10s"` or `10`.
pub fn deserialize_opt<'de, D>(deserializer: D) -> core::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawDuration>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(RawDuration::Text(text)) => parse(&text).map(Some).map_err(serde::de::Error::custom),
        Some(RawDuration::Seconds(secs)) => from_secs(secs)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration `{}`", secs))),
    }
}
