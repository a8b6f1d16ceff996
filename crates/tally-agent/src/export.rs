//! Export seam.
//!
//! The core never formats or transmits anything. An [`Exporter`] pulls a
//! snapshot on a fixed interval and hands it to whatever backend it speaks.
//! Counters are cumulative; an exporter that needs deltas diffs consecutive
//! snapshots itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;

use tally_core::diag::DiagnosticsSnapshot;
use tally_core::error::{Result, TallyError};
use tally_core::{Metrics, Snapshot};

#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn export(&self, snapshot: &Snapshot, diagnostics: &DiagnosticsSnapshot) -> Result<()>;
}

/// Logs a one-line summary per export.
#[derive(Debug, Default)]
pub struct LogExporter;

#[async_trait]
impl Exporter for LogExporter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn export(&self, snapshot: &Snapshot, diagnostics: &DiagnosticsSnapshot) -> Result<()> {
        tracing::info!(
            series = snapshot.series_count(),
            counters = snapshot.counters.len(),
            histograms = snapshot.histograms.len(),
            dropped_labels = diagnostics.dropped_label_count,
            rejected_calls = diagnostics.rejected_calls(),
            "metrics snapshot"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    series_count: usize,
    diagnostics: &'a DiagnosticsSnapshot,
    #[serde(flatten)]
    snapshot: &'a Snapshot,
}

/// Writes one JSON document per export, newline separated.
pub struct JsonExporter<W> {
    out: Mutex<W>,
}

impl<W> JsonExporter<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> Exporter for JsonExporter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &'static str {
        "json"
    }

    async fn export(&self, snapshot: &Snapshot, diagnostics: &DiagnosticsSnapshot) -> Result<()> {
        let doc = ExportDocument {
            series_count: snapshot.series_count(),
            diagnostics,
            snapshot,
        };
        let mut line = serde_json::to_vec(&doc)
            .map_err(|e| TallyError::Internal(format!("encode snapshot failed: {e}")))?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| TallyError::Internal(format!("write snapshot failed: {e}")))?;
        out.flush()
            .await
            .map_err(|e| TallyError::Internal(format!("flush snapshot failed: {e}")))?;
        Ok(())
    }
}

/// Take one snapshot and hand it to `exporter`. Failures are logged, not returned.
pub async fn export_once(metrics: &Metrics, exporter: &dyn Exporter) -> bool {
    let snapshot = metrics.snapshot();
    let diagnostics = metrics.diagnostics();
    match exporter.export(&snapshot, &diagnostics).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(exporter = exporter.name(), error = %e, "export failed");
            false
        }
    }
}

/// Export every `every` until `shutdown` flips to true (or its sender is
/// dropped), then export one last time. Returns the number of successful exports.
pub async fn run_export_loop(
    metrics: Arc<Metrics>,
    exporter: Arc<dyn Exporter>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    tracing::info!(exporter = exporter.name(), interval_ms = every.as_millis() as u64, "export loop started");

    let mut ok = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if export_once(&metrics, exporter.as_ref()).await {
                    ok += 1;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if export_once(&metrics, exporter.as_ref()).await {
        ok += 1;
    }
    tracing::info!(exporter = exporter.name(), exports = ok, "export loop stopped");
    ok
}
