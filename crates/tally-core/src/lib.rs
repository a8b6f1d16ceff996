//! tally core: bounded-cardinality metrics aggregation.
//!
//! Instrumentation events flow through three stages before they touch any
//! shared state:
//!
//! 1. [`labels::Sanitizer`] drops label keys that were not declared for the
//!    metric and normalizes values (e.g. status codes to their class).
//! 2. [`key::build_key`] turns the sanitized set into a canonical
//!    [`key::SeriesKey`].
//! 3. [`store::AggregationStore`] updates the counter or histogram for that key.
//!
//! [`registry::Metrics`] wires the stages together and is what call sites and
//! exporters hold on to.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Metrics collection
//! must never take down the process it observes, so every fallible path
//! surfaces as `TallyError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod diag;
pub mod error;
pub mod key;
pub mod labels;
pub mod metric;
pub mod registry;
pub mod store;

pub use error::{ErrorPhase, Result, TallyError};
pub use key::{build_key, SeriesKey};
pub use labels::{LabelSpec, Normalization, SanitizedLabels, Sanitizer, SanitizerOptions};
pub use metric::MetricKind;
pub use registry::{Metrics, MetricsOptions, DEFAULT_DURATION_BUCKETS_SECONDS};
pub use store::{AggregationStore, CounterSample, HistogramSample, Snapshot};
