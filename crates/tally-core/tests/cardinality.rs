//! Series count stays bounded by the declared label dimensions.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use tally_core::{LabelSpec, Metrics, TallyError, DEFAULT_DURATION_BUCKETS_SECONDS};

const REQUESTS: &str = "http_requests_total";
const DURATION: &str = "http_request_duration_seconds";

fn http_metrics() -> Metrics {
    let m = Metrics::default();
    m.register_counter(
        REQUESTS,
        &[
            LabelSpec::verbatim("method"),
            LabelSpec::verbatim("path"),
            LabelSpec::status_class("status"),
        ],
    )
    .unwrap();
    m.register_histogram(
        DURATION,
        &[LabelSpec::verbatim("method"), LabelSpec::verbatim("path")],
        &DEFAULT_DURATION_BUCKETS_SECONDS,
    )
    .unwrap();
    m
}

/// Call site that still passes the user id along with everything else.
fn track(m: &Metrics, method: &str, path: &str, status: u16, secs: f64, user: &str) {
    let status = status.to_string();
    m.inc(
        REQUESTS,
        &[("method", method), ("path", path), ("status", status.as_str()), ("user_id", user)],
    );
    m.observe(DURATION, &[("method", method), ("path", path), ("user_id", user)], secs);
}

#[test]
fn thousand_users_make_two_series() {
    let m = http_metrics();
    for i in 0..1000 {
        track(&m, "GET", "/api/users", 200, 0.05, &format!("user_{i}"));
    }

    assert_eq!(m.series_count(), 2);
    assert_eq!(m.diagnostics().dropped_label_count, 2000);

    let snap = m.snapshot();
    let counters: Vec<_> = snap.counters_for(REQUESTS).collect();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].value, 1000);
    assert_eq!(counters[0].key.label("status"), Some("2xx"));
    assert_eq!(counters[0].key.label("user_id"), None);

    let hist: Vec<_> = snap.histograms_for(DURATION).collect();
    assert_eq!(hist.len(), 1);
    assert_eq!(hist[0].count, 1000);
}

#[test]
fn bounded_by_product_of_dimensions() {
    let m = http_metrics();
    let methods = ["GET", "POST", "PUT"];
    let routes = ["/a", "/b/{id}", "/c", "/d"];
    let statuses = [200, 201, 204, 301, 404, 418, 500, 503];

    let mut n = 0;
    for user in 0..50 {
        for method in methods {
            for route in routes {
                for status in statuses {
                    n += 1;
                    track(&m, method, route, status, 0.01 * (n % 7) as f64, &format!("u{user}"));
                }
            }
        }
    }

    // 2xx, 3xx, 4xx, 5xx
    let classes = 4;
    let bound = methods.len() * routes.len() * classes + methods.len() * routes.len();
    assert_eq!(m.series_count(), bound);
    assert_eq!(m.snapshot().series_count(), bound);
}

#[test]
fn unsafe_label_never_creates_series() {
    let m = Metrics::default();
    let err = m
        .register_counter(
            "logins_total",
            &[LabelSpec::verbatim("method"), LabelSpec::verbatim("user_id")],
        )
        .unwrap_err();
    assert!(matches!(err, TallyError::UnsafeLabel { ref key, .. } if key == "user_id"));
    assert!(err.is_fatal());

    m.inc("logins_total", &[("method", "GET"), ("user_id", "42")]);
    assert!(matches!(
        m.try_inc("logins_total", &[("method", "GET")]),
        Err(TallyError::UnknownMetric(_))
    ));
    // try_* hands the error back instead of recording it
    assert_eq!(m.diagnostics().unknown_metric, 1);

    m.inc("logins_total", &[("method", "POST")]);
    assert_eq!(m.series_count(), 0);
    assert_eq!(m.diagnostics().unknown_metric, 2);
}

#[test]
fn series_ceiling_is_a_last_line_guard() {
    use tally_core::store::StoreOptions;
    use tally_core::MetricsOptions;

    let m = Metrics::new(MetricsOptions {
        store: StoreOptions { max_series_per_metric: Some(3) },
        ..MetricsOptions::default()
    });
    m.register_counter("jobs_total", &[LabelSpec::verbatim("queue")]).unwrap();
    for q in 0..10 {
        m.inc("jobs_total", &[("queue", format!("q{q}").as_str())]);
    }
    assert_eq!(m.series_count(), 3);
    assert_eq!(m.diagnostics().series_limit_rejections, 7);
}
