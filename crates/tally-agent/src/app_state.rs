//! Shared application state for the tally agent.
//!
//! Everything here is built once at startup. Any registration error is
//! returned as-is so `main` can refuse to start: a silently skipped metric is
//! how cardinality bugs go unnoticed.

use std::sync::Arc;

use tally_core::error::{Result, TallyError};
use tally_core::{MetricKind, Metrics, DEFAULT_DURATION_BUCKETS_SECONDS};

use crate::config::{AgentConfig, ExportFormat};
use crate::export::{Exporter, JsonExporter, LogExporter};
use crate::http::RequestTracker;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
    metrics: Arc<Metrics>,
    tracker: Option<Arc<RequestTracker>>,
}

struct AppStateInner {
    cfg: AgentConfig,
}

impl AppState {
    pub fn new(cfg: AgentConfig) -> Result<Self> {
        // 1) Store + sanitizer with configured limits
        let metrics = Arc::new(Metrics::new(cfg.metrics_options()));

        // 2) Built-in HTTP metrics
        let tracker = if cfg.http {
            Some(Arc::new(RequestTracker::register(Arc::clone(&metrics))?))
        } else {
            None
        };

        // 3) Declared metrics
        for m in &cfg.metrics {
            let labels = m.label_specs();
            let res = match m.kind {
                MetricKind::Counter => metrics.register_counter(&m.name, &labels),
                MetricKind::Histogram => {
                    let bounds = m
                        .buckets
                        .as_deref()
                        .unwrap_or(&DEFAULT_DURATION_BUCKETS_SECONDS);
                    metrics.register_histogram(&m.name, &labels, bounds)
                }
            };
            if let Err(e) = res {
                tracing::error!(metric = %m.name, error = %e, phase = e.phase().as_str(), "metric registration failed");
                return Err(e);
            }
        }

        if metrics.registered().is_empty() {
            return Err(TallyError::Configuration("no metrics registered".into()));
        }

        Ok(Self {
            inner: Arc::new(AppStateInner { cfg }),
            metrics,
            tracker,
        })
    }

    pub fn cfg(&self) -> &AgentConfig {
        &self.inner.cfg
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    pub fn tracker(&self) -> Option<Arc<RequestTracker>> {
        self.tracker.clone()
    }

    /// Exporter for the configured format.
    pub fn exporter(&self) -> Arc<dyn Exporter> {
        match self.cfg().export.format {
            ExportFormat::Log => Arc::new(LogExporter),
            ExportFormat::Json => Arc::new(JsonExporter::new(tokio::io::stdout())),
        }
    }
}
