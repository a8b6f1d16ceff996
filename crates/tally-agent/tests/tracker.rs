#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use tally_agent::app_state::AppState;
use tally_agent::config;
use tally_agent::http::{RequestTracker, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use tally_core::Metrics;

fn tracker() -> RequestTracker {
    RequestTracker::register(Arc::new(Metrics::default())).unwrap()
}

#[test]
fn thousand_users_two_series() {
    let t = tracker();
    // each iteration stands for a different user hitting the same route
    for _user in 0..1000 {
        t.track_request("GET", "/api/users", 200, Duration::from_millis(50));
    }
    let m = t.metrics();
    assert_eq!(m.series_count(), 2);

    let snap = m.snapshot();
    let c: Vec<_> = snap.counters_for(HTTP_REQUESTS_TOTAL).collect();
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].value, 1000);
    assert_eq!(c[0].key.canonical(), "http_requests_total{method=GET,path=/api/users,status=2xx}");

    let h: Vec<_> = snap.histograms_for(HTTP_REQUEST_DURATION_SECONDS).collect();
    assert_eq!(h[0].count, 1000);
    assert_eq!(h[0].bucket(0.05), Some(1000));
    assert_eq!(h[0].bucket(0.025), Some(0));
}

#[test]
fn status_codes_share_class_series() {
    let t = tracker();
    for status in [500, 502, 503, 504] {
        t.track_request("post", "/api/orders/{id}", status, Duration::from_millis(5));
    }
    t.track_request("BREW", "/api/orders/{id}", 418, Duration::from_millis(5));

    let snap = t.metrics().snapshot();
    let c: Vec<_> = snap.counters_for(HTTP_REQUESTS_TOTAL).collect();
    assert_eq!(c.len(), 2);
    assert_eq!(c[0].key.label("method"), Some("OTHER"));
    assert_eq!(c[0].key.label("status"), Some("4xx"));
    assert_eq!(c[1].key.label("method"), Some("POST"));
    assert_eq!(c[1].value, 4);
}

#[test]
fn in_flight_timer_records() {
    let t = tracker();
    let req = t.start("GET", "/healthz");
    req.finish(204);

    let snap = t.metrics().snapshot();
    assert_eq!(snap.series_count(), 2);
    assert_eq!(snap.histograms[0].count, 1);
}

#[test]
fn registering_twice_is_harmless() {
    let m = Arc::new(Metrics::default());
    RequestTracker::register(Arc::clone(&m)).unwrap();
    RequestTracker::register(Arc::clone(&m)).unwrap();
    assert_eq!(m.registered().len(), 2);
}

#[test]
fn embedding_host_records_through_app_state() {
    let cfg = config::load_from_str("version: 1\n").unwrap();
    let state = AppState::new(cfg).unwrap();
    let t = state.tracker().expect("http tracker is on by default");

    t.track_request("GET", "/health", 200, Duration::from_millis(3));
    t.track_request("GET", "/health", 204, Duration::from_millis(4));

    let m = state.metrics();
    assert_eq!(m.series_count(), 2);
    let c: Vec<_> = m.snapshot().counters_for(HTTP_REQUESTS_TOTAL).cloned().collect();
    assert_eq!(c[0].value, 2);
}
