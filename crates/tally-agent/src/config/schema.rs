use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tally_core::error::{Result, TallyError};
use tally_core::labels::{LabelSpec, Normalization, SanitizerOptions};
use tally_core::store::StoreOptions;
use tally_core::{MetricKind, MetricsOptions};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub version: u32,

    #[serde(default)]
    pub export: ExportSection,

    #[serde(default)]
    pub limits: LimitsSection,

    /// Extra label keys refused at registration, on top of the built-in denylist.
    #[serde(default)]
    pub denied_label_keys: Vec<String>,

    /// Register the HTTP request metrics used by `RequestTracker`.
    #[serde(default = "default_http")]
    pub http: bool,

    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(TallyError::Configuration(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        if !self.http && self.metrics.is_empty() {
            return Err(TallyError::Configuration(
                "no metrics declared and http metrics disabled".into(),
            ));
        }

        self.export.validate()?;
        self.limits.validate()?;

        let mut seen = HashSet::new();
        for m in &self.metrics {
            if !seen.insert(m.name.as_str()) {
                return Err(TallyError::Configuration(format!(
                    "metric `{}` declared twice",
                    m.name
                )));
            }
            m.validate()?;
        }
        Ok(())
    }

    pub fn metrics_options(&self) -> MetricsOptions {
        MetricsOptions {
            sanitizer: SanitizerOptions {
                extra_denied_keys: self.denied_label_keys.clone(),
            },
            store: StoreOptions {
                max_series_per_metric: self.limits.max_series_per_metric,
            },
        }
    }
}

fn default_http() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Summary line per export via `tracing`.
    #[default]
    Log,
    /// One JSON document per export on stdout.
    Json,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default)]
    pub format: ExportFormat,
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            format: ExportFormat::default(),
        }
    }
}

impl ExportSection {
    pub fn validate(&self) -> Result<()> {
        if !(1000..=300000).contains(&self.interval_ms) {
            return Err(TallyError::Configuration(
                "export.interval_ms must be between 1000 and 300000".into(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

// matches common scrape intervals
fn default_interval_ms() -> u64 {
    15000
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    #[serde(default)]
    pub max_series_per_metric: Option<usize>,
}

impl LimitsSection {
    pub fn validate(&self) -> Result<()> {
        if self.max_series_per_metric == Some(0) {
            return Err(TallyError::Configuration(
                "limits.max_series_per_metric must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricConfig {
    pub name: String,
    pub kind: MetricKind,

    #[serde(default)]
    pub labels: Vec<LabelConfig>,

    /// Histogram bucket upper bounds, in the unit the metric name declares.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
}

impl MetricConfig {
    pub fn validate(&self) -> Result<()> {
        if self.kind == MetricKind::Counter && self.buckets.is_some() {
            return Err(TallyError::Configuration(format!(
                "metric `{}`: counters do not take buckets",
                self.name
            )));
        }
        Ok(())
    }

    pub fn label_specs(&self) -> Vec<LabelSpec> {
        self.labels
            .iter()
            .map(|l| LabelSpec { key: l.key.clone(), normalize: l.normalize })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelConfig {
    pub key: String,
    #[serde(default)]
    pub normalize: Normalization,
}
