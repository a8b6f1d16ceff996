//! HTTP request instrumentation.
//!
//! The request counter is keyed by method, route template and status class;
//! the duration histogram by method and route template. Callers must pass the
//! route *template* (`/api/users/{id}`), never the raw path. There is no way
//! to attach a user or request identifier: those would turn every user into a
//! new series.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tally_core::error::Result;
use tally_core::{LabelSpec, Metrics, DEFAULT_DURATION_BUCKETS_SECONDS};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";

/// Methods kept verbatim; everything else becomes `OTHER`.
const KNOWN_METHODS: [&str; 9] =
    ["GET", "HEAD", "POST", "PUT", "DELETE", "CONNECT", "OPTIONS", "TRACE", "PATCH"];

/// Collapse a request method into a fixed set of values.
pub fn normalize_method(method: &str) -> &'static str {
    KNOWN_METHODS
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .copied()
        .unwrap_or("OTHER")
}

pub struct RequestTracker {
    metrics: Arc<Metrics>,
}

impl RequestTracker {
    /// Register the HTTP metrics on `metrics`. Registering twice is harmless.
    pub fn register(metrics: Arc<Metrics>) -> Result<Self> {
        metrics.register_counter(
            HTTP_REQUESTS_TOTAL,
            &[
                LabelSpec::verbatim("method"),
                LabelSpec::verbatim("path"),
                LabelSpec::status_class("status"),
            ],
        )?;
        metrics.register_histogram(
            HTTP_REQUEST_DURATION_SECONDS,
            &[LabelSpec::verbatim("method"), LabelSpec::verbatim("path")],
            &DEFAULT_DURATION_BUCKETS_SECONDS,
        )?;
        Ok(Self { metrics })
    }

    pub fn track_request(&self, method: &str, route: &str, status: u16, duration: Duration) {
        let method = normalize_method(method);
        let status = status.to_string();

        self.metrics.inc(
            HTTP_REQUESTS_TOTAL,
            &[("method", method), ("path", route), ("status", status.as_str())],
        );
        self.metrics.observe_duration(
            HTTP_REQUEST_DURATION_SECONDS,
            &[("method", method), ("path", route)],
            duration,
        );
    }

    /// Start timing a request; call [`InFlight::finish`] with the status.
    pub fn start<'a>(&'a self, method: &'a str, route: &'a str) -> InFlight<'a> {
        InFlight {
            tracker: self,
            method,
            route,
            started: Instant::now(),
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// A request being timed.
pub struct InFlight<'a> {
    tracker: &'a RequestTracker,
    method: &'a str,
    route: &'a str,
    started: Instant,
}

impl InFlight<'_> {
    pub fn finish(self, status: u16) {
        self.tracker
            .track_request(self.method, self.route, status, self.started.elapsed());
    }
}
