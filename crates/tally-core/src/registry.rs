//! `Metrics`: the instrumentation entry point.
//!
//! Wires sanitizer -> key builder -> store. Construct once at startup, share
//! via `Arc`, and pass it to call sites and exporters; there is no global
//! registry.
//!
//! Registration errors are returned (fatal at startup). Hot-path calls come in
//! two flavours: `try_*` returns the error, the plain variant records it in
//! [`Diagnostics`] and does nothing, so a bad call site never takes down the
//! request it is observing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::diag::{Diagnostics, DiagnosticsSnapshot};
use crate::error::{Result, TallyError};
use crate::key::build_key;
use crate::labels::{LabelSpec, Sanitizer, SanitizerOptions};
use crate::metric::{validate_metric_name, MetricKind};
use crate::store::{validate_bounds, AggregationStore, Snapshot, StoreOptions};

/// Second-based buckets suited to HTTP request durations.
pub const DEFAULT_DURATION_BUCKETS_SECONDS: [f64; 11] =
    [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Debug, Clone, Default)]
pub struct MetricsOptions {
    pub sanitizer: SanitizerOptions,
    pub store: StoreOptions,
}

pub struct Metrics {
    kinds: DashMap<String, MetricKind>,
    sanitizer: Sanitizer,
    store: AggregationStore,
    diagnostics: Arc<Diagnostics>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(MetricsOptions::default())
    }
}

impl Metrics {
    pub fn new(opts: MetricsOptions) -> Self {
        let diagnostics = Arc::new(Diagnostics::default());
        Self {
            kinds: DashMap::new(),
            sanitizer: Sanitizer::new(opts.sanitizer, Arc::clone(&diagnostics)),
            store: AggregationStore::new(opts.store),
            diagnostics,
        }
    }

    pub fn register_counter(&self, name: &str, labels: &[LabelSpec]) -> Result<()> {
        validate_metric_name(name, MetricKind::Counter)?;
        self.check_kind_free(name, MetricKind::Counter)?;
        self.sanitizer.register(name, labels)?;
        self.kinds.insert(name.to_string(), MetricKind::Counter);
        tracing::info!(metric = name, kind = "counter", labels = labels.len(), "metric registered");
        Ok(())
    }

    pub fn register_histogram(&self, name: &str, labels: &[LabelSpec], bounds: &[f64]) -> Result<()> {
        validate_metric_name(name, MetricKind::Histogram)?;
        self.check_kind_free(name, MetricKind::Histogram)?;
        // bad bounds must not leave a label schema behind
        validate_bounds(name, bounds)?;
        self.sanitizer.register(name, labels)?;
        self.store.register_buckets(name, bounds)?;

        if looks_like_millis(name, bounds) {
            tracing::warn!(
                metric = name,
                ?bounds,
                "bucket bounds look like milliseconds but the metric is in seconds"
            );
        }

        self.kinds.insert(name.to_string(), MetricKind::Histogram);
        tracing::info!(metric = name, kind = "histogram", labels = labels.len(), buckets = bounds.len(), "metric registered");
        Ok(())
    }

    pub fn kind(&self, metric: &str) -> Option<MetricKind> {
        self.kinds.get(metric).map(|k| *k)
    }

    /// Registered metrics, sorted by name.
    pub fn registered(&self) -> Vec<(String, MetricKind)> {
        let mut out: Vec<_> = self.kinds.iter().map(|e| (e.key().clone(), *e.value())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn try_add(&self, metric: &str, labels: &[(&str, &str)], amount: i64) -> Result<()> {
        self.expect_kind(metric, MetricKind::Counter)?;
        let clean = self.sanitizer.sanitize(metric, labels)?;
        self.store.increment_counter(&build_key(metric, &clean), amount)
    }

    pub fn try_inc(&self, metric: &str, labels: &[(&str, &str)]) -> Result<()> {
        self.try_add(metric, labels, 1)
    }

    pub fn try_observe(&self, metric: &str, labels: &[(&str, &str)], value: f64) -> Result<()> {
        self.expect_kind(metric, MetricKind::Histogram)?;
        let clean = self.sanitizer.sanitize(metric, labels)?;
        self.store.observe_histogram(&build_key(metric, &clean), value)
    }

    pub fn add(&self, metric: &str, labels: &[(&str, &str)], amount: i64) {
        if let Err(e) = self.try_add(metric, labels, amount) {
            self.report(metric, &e);
        }
    }

    pub fn inc(&self, metric: &str, labels: &[(&str, &str)]) {
        self.add(metric, labels, 1);
    }

    pub fn observe(&self, metric: &str, labels: &[(&str, &str)], value: f64) {
        if let Err(e) = self.try_observe(metric, labels, value) {
            self.report(metric, &e);
        }
    }

    /// Observe a duration in seconds.
    pub fn observe_duration(&self, metric: &str, labels: &[(&str, &str)], d: Duration) {
        self.observe(metric, labels, d.as_secs_f64());
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn series_count(&self) -> usize {
        self.store.series_count()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    fn report(&self, metric: &str, err: &TallyError) {
        self.diagnostics.record(err);
        tracing::debug!(metric, error = %err, "instrumentation call dropped");
    }

    fn expect_kind(&self, metric: &str, kind: MetricKind) -> Result<()> {
        match self.kind(metric) {
            Some(k) if k == kind => Ok(()),
            Some(_) => Err(TallyError::WrongKind {
                metric: metric.to_string(),
                expected: kind.as_str(),
            }),
            None => Err(TallyError::UnknownMetric(metric.to_string())),
        }
    }

    fn check_kind_free(&self, name: &str, kind: MetricKind) -> Result<()> {
        match self.kind(name) {
            Some(existing) if existing != kind => Err(TallyError::Configuration(format!(
                "metric `{name}` already registered as a {}",
                existing.as_str()
            ))),
            _ => Ok(()),
        }
    }
}

/// Second-unit histogram whose smallest bound is already >= 1s and largest >= 100s.
fn looks_like_millis(name: &str, bounds: &[f64]) -> bool {
    match (bounds.first(), bounds.last()) {
        (Some(&lo), Some(&hi)) => name.ends_with("_seconds") && lo >= 1.0 && hi >= 100.0,
        _ => false,
    }
}
