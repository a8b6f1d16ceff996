//! Internal diagnostic counters.
//!
//! These are plain atomics, deliberately not aggregated series: a label drop
//! must not be able to create new series of its own.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::error::TallyError;

#[derive(Debug, Default)]
pub struct Diagnostics {
    dropped_labels: AtomicU64,
    unknown_metric: AtomicU64,
    wrong_kind: AtomicU64,
    invalid_amount: AtomicU64,
    invalid_observation: AtomicU64,
    unregistered_metric: AtomicU64,
    series_limit_rejections: AtomicU64,
}

/// Point-in-time copy of [`Diagnostics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub dropped_label_count: u64,
    pub unknown_metric: u64,
    pub wrong_kind: u64,
    pub invalid_amount: u64,
    pub invalid_observation: u64,
    pub unregistered_metric: u64,
    pub series_limit_rejections: u64,
}

impl DiagnosticsSnapshot {
    /// Sum of all rejected instrumentation calls (label drops excluded).
    pub fn rejected_calls(&self) -> u64 {
        self.unknown_metric
            + self.wrong_kind
            + self.invalid_amount
            + self.invalid_observation
            + self.unregistered_metric
            + self.series_limit_rejections
    }
}

impl Diagnostics {
    pub fn add_dropped_labels(&self, n: u64) {
        self.dropped_labels.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dropped_label_count(&self) -> u64 {
        self.dropped_labels.load(Ordering::Relaxed)
    }

    /// Count a swallowed hot-path error.
    pub fn record(&self, err: &TallyError) {
        let slot = match err {
            TallyError::UnknownMetric(_) => &self.unknown_metric,
            TallyError::WrongKind { .. } => &self.wrong_kind,
            TallyError::InvalidAmount(_) => &self.invalid_amount,
            TallyError::InvalidObservation(_) => &self.invalid_observation,
            TallyError::UnregisteredMetric(_) => &self.unregistered_metric,
            TallyError::SeriesLimitExceeded { .. } => &self.series_limit_rejections,
            // startup-phase errors never reach the hot path
            _ => return,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            dropped_label_count: self.dropped_labels.load(Ordering::Relaxed),
            unknown_metric: self.unknown_metric.load(Ordering::Relaxed),
            wrong_kind: self.wrong_kind.load(Ordering::Relaxed),
            invalid_amount: self.invalid_amount.load(Ordering::Relaxed),
            invalid_observation: self.invalid_observation.load(Ordering::Relaxed),
            unregistered_metric: self.unregistered_metric.load(Ordering::Relaxed),
            series_limit_rejections: self.series_limit_rejections.load(Ordering::Relaxed),
        }
    }
}
