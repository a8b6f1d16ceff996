#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use tally_agent::{app_state::AppState, config};
use tally_core::{ErrorPhase, MetricKind, Normalization, TallyError};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
metrics:
  - name: jobs_total
    kind: counter
    lables: [{ key: queue }] # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert!(matches!(err, TallyError::Configuration(_)));
    assert_eq!(err.phase(), ErrorPhase::Startup);
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert!(cfg.http);
    assert_eq!(cfg.export.interval_ms, 15000);
    assert!(cfg.metrics.is_empty());
}

#[test]
fn full_config_parses() {
    let s = r#"
version: 1
export: { interval_ms: 5000, format: json }
limits: { max_series_per_metric: 500 }
denied_label_keys: [tenant_slug]
http: false
metrics:
  - name: upstream_responses_total
    kind: counter
    labels:
      - { key: upstream }
      - { key: status, normalize: status_class }
  - name: job_duration_seconds
    kind: histogram
    buckets: [0.1, 1.0]
"#;
    let cfg = config::load_from_str(s).expect("must parse");
    assert_eq!(cfg.export.format, config::ExportFormat::Json);
    assert_eq!(cfg.limits.max_series_per_metric, Some(500));
    assert_eq!(cfg.metrics[0].kind, MetricKind::Counter);
    assert_eq!(cfg.metrics[0].labels[1].normalize, Normalization::StatusClass);
    assert_eq!(cfg.metrics[1].buckets.as_deref(), Some(&[0.1, 1.0][..]));
}

#[test]
fn rejects_bad_values() {
    for bad in [
        "version: 2\n",
        "version: 1\nexport: { interval_ms: 10 }\n",
        "version: 1\nlimits: { max_series_per_metric: 0 }\n",
        "version: 1\nhttp: false\n",
        "version: 1\nmetrics:\n  - { name: a_total, kind: counter, buckets: [1.0] }\n",
        "version: 1\nmetrics:\n  - { name: a_total, kind: counter }\n  - { name: a_total, kind: counter }\n",
        "version: 1\nmetrics:\n  - { name: a_total, kind: gauge }\n",
    ] {
        assert!(config::load_from_str(bad).is_err(), "{bad}");
    }
}

#[test]
fn unsafe_label_in_config_aborts_startup() {
    let s = r#"
version: 1
metrics:
  - name: logins_total
    kind: counter
    labels: [{ key: user_id }]
"#;
    let cfg = config::load_from_str(s).expect("syntax is fine");
    let err = AppState::new(cfg).err().expect("must fail");
    assert!(matches!(err, TallyError::UnsafeLabel { .. }));
    assert!(err.is_fatal());
}

#[test]
fn extra_denied_keys_from_config() {
    let s = r#"
version: 1
denied_label_keys: [tenant_slug]
metrics:
  - name: jobs_total
    kind: counter
    labels: [{ key: tenant_slug }]
"#;
    let cfg = config::load_from_str(s).unwrap();
    assert!(matches!(
        AppState::new(cfg).err(),
        Some(TallyError::UnsafeLabel { .. })
    ));
}

#[test]
fn millisecond_named_histogram_rejected() {
    let s = r#"
version: 1
metrics:
  - name: http_request_duration_ms
    kind: histogram
"#;
    let cfg = config::load_from_str(s).unwrap();
    assert!(matches!(
        AppState::new(cfg).err(),
        Some(TallyError::Configuration(_))
    ));
}

#[test]
fn state_registers_everything() {
    let s = r#"
version: 1
metrics:
  - name: jobs_total
    kind: counter
    labels: [{ key: queue }]
  - name: job_duration_seconds
    kind: histogram
"#;
    let state = AppState::new(config::load_from_str(s).unwrap()).unwrap();
    let names: Vec<_> = state
        .metrics()
        .registered()
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(
        names,
        vec![
            "http_request_duration_seconds",
            "http_requests_total",
            "job_duration_seconds",
            "jobs_total",
        ]
    );
    assert!(state.tracker().is_some());
    assert_eq!(
        state.metrics().store().buckets("job_duration_seconds").unwrap().len(),
        11
    );
}
