//! Aggregation store: counters and fixed-bucket histograms keyed by [`SeriesKey`].
//!
//! Both maps are `DashMap`s, so updates contend only within a shard. Counters
//! are a single `AtomicU64`; a histogram series carries its own `Mutex` so a
//! snapshot never sees a half-applied observation. Series are created on first
//! update and live for the rest of the process (cumulative semantics).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Serialize, Serializer};

use crate::error::{Result, TallyError};
use crate::key::SeriesKey;

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Hard ceiling on distinct series per metric. `None` means unbounded
    /// (the label allow-list is then the only bound).
    pub max_series_per_metric: Option<usize>,
}

struct HistogramState {
    /// Cumulative: `buckets[i]` counts observations `<= bounds[i]`.
    buckets: Vec<u64>,
    count: u64,
    sum: f64,
}

struct HistogramSeries {
    bounds: Arc<[f64]>,
    state: Mutex<HistogramState>,
}

impl HistogramSeries {
    fn new(bounds: Arc<[f64]>) -> Self {
        let buckets = vec![0; bounds.len()];
        Self {
            bounds,
            state: Mutex::new(HistogramState { buckets, count: 0, sum: 0.0 }),
        }
    }

    fn observe(&self, value: f64) {
        // A panic while holding this lock cannot leave the state torn (plain
        // integer/float writes), so a poisoned lock is still usable.
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let first = self.bounds.partition_point(|&b| b < value);
        for c in &mut st.buckets[first..] {
            *c += 1;
        }
        st.count += 1;
        st.sum += value;
    }

    fn sample(&self, key: &SeriesKey) -> HistogramSample {
        let st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        HistogramSample {
            key: key.clone(),
            bounds: self.bounds.to_vec(),
            buckets: st.buckets.clone(),
            count: st.count,
            sum: st.sum,
        }
    }
}

#[derive(Default)]
pub struct AggregationStore {
    counters: DashMap<SeriesKey, AtomicU64>,
    histograms: DashMap<SeriesKey, HistogramSeries>,
    bounds: DashMap<String, Arc<[f64]>>,
    per_metric: DashMap<String, AtomicUsize>,
    series: AtomicUsize,
    max_series_per_metric: Option<usize>,
}

impl AggregationStore {
    pub fn new(opts: StoreOptions) -> Self {
        Self {
            max_series_per_metric: opts.max_series_per_metric,
            ..Self::default()
        }
    }

    /// Declare histogram bucket upper bounds for `metric`.
    ///
    /// Bounds must be in the unit call sites observe in (seconds, not
    /// milliseconds, for durations measured in seconds).
    pub fn register_buckets(&self, metric: &str, bounds: &[f64]) -> Result<()> {
        validate_bounds(metric, bounds)?;

        match self.bounds.entry(metric.to_string()) {
            Entry::Occupied(e) => {
                if e.get().as_ref() == bounds {
                    Ok(())
                } else {
                    Err(TallyError::Configuration(format!(
                        "metric `{metric}` already registered with different buckets"
                    )))
                }
            }
            Entry::Vacant(e) => {
                e.insert(Arc::from(bounds));
                Ok(())
            }
        }
    }

    pub fn buckets(&self, metric: &str) -> Option<Arc<[f64]>> {
        self.bounds.get(metric).map(|b| Arc::clone(b.value()))
    }

    /// Add `amount` to the counter, creating it at 0 first if needed.
    pub fn increment_counter(&self, key: &SeriesKey, amount: i64) -> Result<()> {
        let amount = u64::try_from(amount).map_err(|_| TallyError::InvalidAmount(amount))?;

        if let Some(c) = self.counters.get(key) {
            saturating_add(&c, amount);
            return Ok(());
        }

        match self.counters.entry(key.clone()) {
            Entry::Occupied(e) => saturating_add(e.get(), amount),
            Entry::Vacant(e) => {
                self.reserve_series(key.metric())?;
                e.insert(AtomicU64::new(amount));
            }
        }
        Ok(())
    }

    /// Record one observation, creating the series with the metric's buckets if needed.
    pub fn observe_histogram(&self, key: &SeriesKey, value: f64) -> Result<()> {
        if value.is_nan() {
            return Err(TallyError::InvalidObservation(value));
        }

        if let Some(h) = self.histograms.get(key) {
            h.observe(value);
            return Ok(());
        }

        let bounds = self
            .buckets(key.metric())
            .ok_or_else(|| TallyError::UnregisteredMetric(key.metric().to_string()))?;

        match self.histograms.entry(key.clone()) {
            Entry::Occupied(e) => e.get().observe(value),
            Entry::Vacant(e) => {
                self.reserve_series(key.metric())?;
                e.insert(HistogramSeries::new(bounds)).observe(value);
            }
        }
        Ok(())
    }

    /// Distinct identities across counters and histograms.
    pub fn series_count(&self) -> usize {
        self.series.load(Ordering::Relaxed)
    }

    pub fn series_count_for(&self, metric: &str) -> usize {
        self.per_metric
            .get(metric)
            .map(|n| n.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every series, sorted by key.
    ///
    /// Each series is internally consistent; different series may reflect
    /// slightly different instants.
    pub fn snapshot(&self) -> Snapshot {
        let mut counters: Vec<CounterSample> = self
            .counters
            .iter()
            .map(|e| CounterSample {
                key: e.key().clone(),
                value: e.value().load(Ordering::Relaxed),
            })
            .collect();
        counters.sort_by(|a, b| a.key.cmp(&b.key));

        let mut histograms: Vec<HistogramSample> =
            self.histograms.iter().map(|e| e.value().sample(e.key())).collect();
        histograms.sort_by(|a, b| a.key.cmp(&b.key));

        Snapshot { counters, histograms }
    }

    /// Called with the new series' shard lock held, so a series is counted
    /// exactly once.
    fn reserve_series(&self, metric: &str) -> Result<()> {
        let reserved = match self.per_metric.get(metric) {
            Some(n) => self.try_reserve(&n),
            None => {
                let n = self
                    .per_metric
                    .entry(metric.to_string())
                    .or_insert_with(|| AtomicUsize::new(0));
                self.try_reserve(&n)
            }
        };

        if !reserved {
            let limit = self.max_series_per_metric.unwrap_or(usize::MAX);
            return Err(TallyError::SeriesLimitExceeded { metric: metric.to_string(), limit });
        }
        self.series.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn try_reserve(&self, n: &AtomicUsize) -> bool {
        let limit = self.max_series_per_metric.unwrap_or(usize::MAX);
        n.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            (cur < limit).then_some(cur + 1)
        })
        .is_ok()
    }
}

/// Counters stick at `u64::MAX` instead of wrapping back to zero.
fn saturating_add(counter: &AtomicU64, amount: u64) {
    let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
        (cur != u64::MAX).then(|| cur.saturating_add(amount))
    });
}

pub(crate) fn validate_bounds(metric: &str, bounds: &[f64]) -> Result<()> {
    let bad = |reason: String| {
        Err(TallyError::InvalidBuckets { metric: metric.to_string(), reason })
    };

    if bounds.is_empty() {
        return bad("at least one bucket bound is required".into());
    }
    if let Some(b) = bounds.iter().find(|b| !b.is_finite()) {
        return bad(format!("bound {b} is not finite (+Inf is implicit)"));
    }
    if let Some(w) = bounds.windows(2).find(|w| w[0] >= w[1]) {
        return bad(format!("bounds must be strictly increasing ({} then {})", w[0], w[1]));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterSample {
    pub key: SeriesKey,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSample {
    pub key: SeriesKey,
    /// Finite upper bounds; `+Inf` is implicit.
    pub bounds: Vec<f64>,
    /// Cumulative counts, parallel to `bounds`.
    pub buckets: Vec<u64>,
    /// Total observations (the `+Inf` bucket).
    pub count: u64,
    /// Serialized as `"+Inf"`, `"-Inf"` or `"NaN"` when not finite.
    #[serde(serialize_with = "sum_as_number_or_text")]
    pub sum: f64,
}

fn sum_as_number_or_text<S: Serializer>(sum: &f64, s: S) -> std::result::Result<S::Ok, S::Error> {
    if sum.is_finite() {
        s.serialize_f64(*sum)
    } else if sum.is_nan() {
        s.serialize_str("NaN")
    } else if sum.is_sign_positive() {
        s.serialize_str("+Inf")
    } else {
        s.serialize_str("-Inf")
    }
}

impl HistogramSample {
    /// Observations above the largest finite bound.
    pub fn overflow(&self) -> u64 {
        self.count - self.buckets.last().copied().unwrap_or(0)
    }

    /// Cumulative count for the bucket with upper bound exactly `le`.
    pub fn bucket(&self, le: f64) -> Option<u64> {
        self.bounds
            .iter()
            .position(|&b| b == le)
            .map(|i| self.buckets[i])
    }
}

/// Immutable copy of the store handed to exporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub counters: Vec<CounterSample>,
    pub histograms: Vec<HistogramSample>,
}

impl Snapshot {
    pub fn series_count(&self) -> usize {
        self.counters.len() + self.histograms.len()
    }

    pub fn counter(&self, key: &SeriesKey) -> Option<u64> {
        self.counters
            .binary_search_by(|s| s.key.cmp(key))
            .ok()
            .map(|i| self.counters[i].value)
    }

    pub fn histogram(&self, key: &SeriesKey) -> Option<&HistogramSample> {
        self.histograms
            .binary_search_by(|s| s.key.cmp(key))
            .ok()
            .map(|i| &self.histograms[i])
    }

    pub fn counters_for<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = &'a CounterSample> {
        self.counters.iter().filter(move |s| s.key.metric() == metric)
    }

    pub fn histograms_for<'a>(
        &'a self,
        metric: &'a str,
    ) -> impl Iterator<Item = &'a HistogramSample> {
        self.histograms.iter().filter(move |s| s.key.metric() == metric)
    }
}
