//! Metric kinds and naming rules.
//!
//! Names are checked once, at registration. The hot path never re-validates.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

/// Base-unit suffixes accepted for non-counter metrics.
pub const UNIT_SUFFIXES: [&str; 9] = [
    "_seconds", "_bytes", "_ratio", "_meters", "_grams", "_joules", "_volts", "_amperes",
    "_celsius",
];

/// Kind of aggregated series a metric produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Histogram,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Validate `name` against the export naming convention for `kind`.
pub fn validate_metric_name(name: &str, kind: MetricKind) -> Result<()> {
    let bad = |why: &str| Err(TallyError::Configuration(format!("metric name `{name}`: {why}")));

    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {}
        Some(_) => return bad("must start with a lowercase letter"),
        None => return bad("must not be empty"),
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return bad("only lowercase letters, digits and '_' are allowed");
    }
    if name.ends_with('_') || name.contains("__") {
        return bad("underscores must separate words");
    }

    match kind {
        MetricKind::Counter => {
            if !name.ends_with("_total") {
                return bad("counters must end in `_total`");
            }
        }
        MetricKind::Histogram => {
            if name.ends_with("_total") {
                return bad("`_total` is reserved for counters");
            }
            if !UNIT_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                return bad("histograms must end in a base unit suffix such as `_seconds`");
            }
        }
    }
    Ok(())
}
