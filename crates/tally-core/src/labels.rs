//! Label allow-lists and sanitization.
//!
//! Every metric declares, once, the finite set of label keys it accepts. On the
//! hot path, anything outside that set is dropped before a series key is built,
//! so the number of series is bounded by the declared dimensions and never by
//! the number of distinct raw inputs.
//!
//! Route templates are a caller contract: the HTTP layer must pass
//! `/api/users/{id}`, not `/api/users/42`. The sanitizer trusts them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::diag::Diagnostics;
use crate::error::{Result, TallyError};

/// Exact key names whose values have unbounded domains.
const DENIED_NAMES: &[&str] = &[
    "id", "user", "uid", "username", "user_name", "user_agent", "ip", "email", "token",
    "session", "uuid", "guid", "url", "query", "remote_addr", "cookie", "traceparent",
    "tracestate", "api_key", "apikey",
];

/// `<entity>_id` / `<entity>id` for these entities is always unbounded, also as
/// the trailing part of a prefixed key (`x_request_id`).
const DENIED_ID_ENTITIES: &[&str] = &[
    "user", "request", "req", "trace", "span", "session", "correlation", "transaction", "txn",
    "customer", "account", "device", "order", "client", "visitor", "message", "msg",
];

/// Any underscore-separated segment equal to one of these is rejected.
const DENIED_SEGMENTS: &[&str] = &["uuid", "guid", "token", "session", "email", "addr", "address"];

/// How a label value is normalized before it becomes part of a series key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Value is used as-is. The caller guarantees a small domain.
    #[default]
    Verbatim,
    /// HTTP status code collapsed to `1xx`..`5xx` (anything else: `other`).
    StatusClass,
}

impl Normalization {
    pub fn apply(self, value: &str) -> String {
        match self {
            Normalization::Verbatim => value.to_string(),
            Normalization::StatusClass => status_class(value),
        }
    }
}

fn status_class(value: &str) -> String {
    match value.parse::<u16>() {
        Ok(code @ 100..=599) => format!("{}xx", code / 100),
        _ if is_status_class(value) => value.to_string(),
        _ => "other".to_string(),
    }
}

fn is_status_class(value: &str) -> bool {
    let b = value.as_bytes();
    b.len() == 3 && (b'1'..=b'5').contains(&b[0]) && &b[1..] == b"xx"
}

/// One allowed label dimension of a metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSpec {
    pub key: String,
    pub normalize: Normalization,
}

impl LabelSpec {
    pub fn verbatim(key: impl Into<String>) -> Self {
        Self { key: key.into(), normalize: Normalization::Verbatim }
    }

    pub fn status_class(key: impl Into<String>) -> Self {
        Self { key: key.into(), normalize: Normalization::StatusClass }
    }
}

/// Label set that has passed through a [`Sanitizer`].
///
/// Only the sanitizer can build one, so a raw label set can never reach
/// [`crate::key::build_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedLabels(BTreeMap<String, String>);

impl SanitizedLabels {
    pub(crate) fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_pairs(&self) -> Vec<(&str, &str)> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SanitizerOptions {
    /// Extra label keys to refuse at registration, on top of the built-in denylist.
    pub extra_denied_keys: Vec<String>,
}

struct Schema {
    /// Sorted by key.
    specs: Vec<LabelSpec>,
    dropped: AtomicU64,
    warned: AtomicBool,
}

impl Schema {
    fn spec(&self, key: &str) -> Option<&LabelSpec> {
        self.specs
            .binary_search_by(|s| s.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.specs[i])
    }
}

/// Per-metric label allow-list registry.
pub struct Sanitizer {
    schemas: DashMap<String, Schema>,
    extra_denied: Vec<String>,
    diagnostics: Arc<Diagnostics>,
}

impl Sanitizer {
    pub fn new(opts: SanitizerOptions, diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            schemas: DashMap::new(),
            extra_denied: opts
                .extra_denied_keys
                .iter()
                .map(|k| normalize_key(k))
                .collect(),
            diagnostics,
        }
    }

    /// Declare the allowed label keys for `metric`.
    ///
    /// Registering the same set again is a no-op; a different set is a
    /// configuration error.
    pub fn register(&self, metric: &str, allowed: &[LabelSpec]) -> Result<()> {
        let specs = self.compile(metric, allowed)?;

        match self.schemas.entry(metric.to_string()) {
            Entry::Occupied(e) => {
                if e.get().specs == specs {
                    Ok(())
                } else {
                    Err(TallyError::Configuration(format!(
                        "metric `{metric}` already registered with a different label set"
                    )))
                }
            }
            Entry::Vacant(e) => {
                tracing::debug!(metric, keys = specs.len(), "label schema registered");
                e.insert(Schema {
                    specs,
                    dropped: AtomicU64::new(0),
                    warned: AtomicBool::new(false),
                });
                Ok(())
            }
        }
    }

    pub fn is_registered(&self, metric: &str) -> bool {
        self.schemas.contains_key(metric)
    }

    /// Keep only allow-listed keys, normalizing their values.
    ///
    /// If a key repeats, the last occurrence wins.
    pub fn sanitize(&self, metric: &str, labels: &[(&str, &str)]) -> Result<SanitizedLabels> {
        let schema = self
            .schemas
            .get(metric)
            .ok_or_else(|| TallyError::UnknownMetric(metric.to_string()))?;

        let mut out = BTreeMap::new();
        let mut dropped = 0u64;
        for &(k, v) in labels {
            match schema.spec(k) {
                Some(spec) => {
                    out.insert(spec.key.clone(), spec.normalize.apply(v));
                }
                None => {
                    dropped += 1;
                    if schema.warned.swap(true, Ordering::Relaxed) {
                        tracing::debug!(metric, key = k, "label not on allow-list dropped");
                    } else {
                        tracing::warn!(metric, key = k, "label not on allow-list dropped (further drops logged at debug)");
                    }
                }
            }
        }

        if dropped > 0 {
            schema.dropped.fetch_add(dropped, Ordering::Relaxed);
            self.diagnostics.add_dropped_labels(dropped);
        }
        Ok(SanitizedLabels::from_map(out))
    }

    /// Labels dropped so far for one metric.
    pub fn dropped_for(&self, metric: &str) -> Option<u64> {
        self.schemas.get(metric).map(|s| s.dropped.load(Ordering::Relaxed))
    }

    /// Labels dropped so far across all metrics.
    pub fn dropped_label_count(&self) -> u64 {
        self.diagnostics.dropped_label_count()
    }

    fn compile(&self, metric: &str, allowed: &[LabelSpec]) -> Result<Vec<LabelSpec>> {
        let mut specs = Vec::with_capacity(allowed.len());
        for spec in allowed {
            validate_label_key(metric, &spec.key)?;
            if self.is_denied(&spec.key) {
                return Err(TallyError::UnsafeLabel {
                    metric: metric.to_string(),
                    key: spec.key.clone(),
                });
            }
            specs.push(spec.clone());
        }

        specs.sort_by(|a, b| a.key.cmp(&b.key));
        if let Some(w) = specs.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(TallyError::Configuration(format!(
                "metric `{metric}` declares label `{}` twice",
                w[0].key
            )));
        }
        Ok(specs)
    }

    fn is_denied(&self, key: &str) -> bool {
        let norm = normalize_key(key);
        if self.extra_denied.iter().any(|d| *d == norm) {
            return true;
        }
        is_unbounded_key(&norm)
    }
}

fn normalize_key(key: &str) -> String {
    key.to_ascii_lowercase().replace('-', "_")
}

/// True when `norm` (lowercase, `_`-separated) names a known unbounded identifier.
fn is_unbounded_key(norm: &str) -> bool {
    if DENIED_NAMES.contains(&norm) || norm.ends_with("_ip") {
        return true;
    }
    let id_like = DENIED_ID_ENTITIES.iter().any(|e| {
        [format!("{e}_id"), format!("{e}id")]
            .iter()
            .any(|id| norm == id.as_str() || norm.strip_suffix(id.as_str()).is_some_and(|p| p.ends_with('_')))
    });
    id_like || norm.split('_').any(|seg| DENIED_SEGMENTS.contains(&seg))
}

fn validate_label_key(metric: &str, key: &str) -> Result<()> {
    let mut chars = key.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(TallyError::Configuration(format!(
            "metric `{metric}`: invalid label key `{key}`"
        )));
    }
    if key.starts_with("__") {
        return Err(TallyError::Configuration(format!(
            "metric `{metric}`: label key `{key}` uses the reserved `__` prefix"
        )));
    }
    Ok(())
}
