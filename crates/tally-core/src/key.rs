//! Canonical series identity.
//!
//! Equality and hashing are structural over `(metric, sorted labels)`, so two
//! label sets that differ only in insertion order collapse to one series and no
//! string-format collision is possible. The `metric{k=v,...}` string form is for
//! display only.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::labels::SanitizedLabels;

/// Identity of one aggregated series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SeriesKey {
    metric: String,
    /// Sorted by key, keys unique.
    #[serde(serialize_with = "labels_as_map")]
    labels: Box<[(String, String)]>,
}

/// Build the series key for `metric` from a sanitized label set.
pub fn build_key(metric: &str, labels: &SanitizedLabels) -> SeriesKey {
    // SanitizedLabels iterates in key order already.
    SeriesKey {
        metric: metric.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

impl SeriesKey {
    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|i| self.labels[i].1.as_str())
    }

    /// `metric{k1=v1,k2=v2}` with delimiter characters in values escaped.
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.metric.len() + 2 + self.labels.len() * 16);
        out.push_str(&self.metric);
        out.push('{');
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push('=');
            escape_into(v, &mut out);
        }
        out.push('}');
        out
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn escape_into(v: &str, out: &mut String) {
    for c in v.chars() {
        if matches!(c, '\\' | ',' | '=' | '{' | '}') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn labels_as_map<S: Serializer>(labels: &[(String, String)], s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(labels.iter().map(|(k, v)| (k, v)))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> SanitizedLabels {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SanitizedLabels::from_map(map)
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = build_key("m", &labels(&[("a", "1"), ("b", "2")]));
        let b = build_key("m", &labels(&[("b", "2"), ("a", "1")]));
        assert_eq!(a, b);
        assert_eq!(a.canonical(), "m{a=1,b=2}");
    }

    #[test]
    fn metric_is_part_of_identity() {
        let l = labels(&[("a", "1")]);
        assert_ne!(build_key("m1", &l), build_key("m2", &l));
    }

    #[test]
    fn delimiters_in_values_do_not_collide() {
        let joined = build_key("m", &labels(&[("a", "1,b=2")]));
        let split = build_key("m", &labels(&[("a", "1"), ("b", "2")]));
        assert_ne!(joined, split);
        assert_ne!(joined.canonical(), split.canonical());
    }

    #[test]
    fn serializes_labels_as_map() {
        let k = build_key("m", &labels(&[("b", "2"), ("a", "1")]));
        assert_eq!(
            serde_json::to_string(&k).ok().as_deref(),
            Some(r#"{"metric":"m","labels":{"a":"1","b":"2"}}"#)
        );
    }

    #[test]
    fn label_lookup() {
        let k = build_key("m", &labels(&[("method", "GET"), ("path", "/a")]));
        assert_eq!(k.label("path"), Some("/a"));
        assert_eq!(k.label("status"), None);
        assert_eq!(k.to_string(), "m{method=GET,path=/a}");
    }
}
