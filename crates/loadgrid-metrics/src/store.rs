//! Windowed in-memory metric store.
//!
//! Append-only series per key; reads aggregate over `[at - window, at]`
//! and fall back to the immediately preceding window when the current one
//! holds no samples, so a decision tick right after a quiet window still
//! sees the last meaningful signal rather than zero.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::keys::{self, Metric, MetricKind};
use crate::sink::Label;

#[derive(Debug, Clone)]
struct Sample {
    ts_ms: i64,
    value: f64,
    labels: Vec<Label>,
}

/// Internally synchronized time-series store.
///
/// Cloning is cheap and shares the underlying series; one instance is
/// written by every worker and ticker and read by the step tick and the
/// metrics API concurrently.
#[derive(Clone)]
pub struct MetricStore {
    window_ms: i64,
    series: Arc<RwLock<HashMap<&'static str, Vec<Sample>>>>,
}

impl MetricStore {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            series: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// The aggregation window applied to every read.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms as u64)
    }

    // ── Writes ─────────────────────────────────────────────────

    /// Record one occurrence of a counter.
    pub fn count(&self, metric: &Metric) {
        self.count_tagged(metric, &[]);
    }

    pub fn count_tagged(&self, metric: &Metric, labels: &[Label]) {
        debug_assert_eq!(metric.kind, MetricKind::Counter);
        self.record_at(metric, 1.0, labels, now_ms());
    }

    /// Record the current value of a gauge.
    pub fn gauge(&self, metric: &Metric, value: f64) {
        debug_assert_eq!(metric.kind, MetricKind::Gauge);
        self.record_at(metric, value, &[], now_ms());
    }

    /// Record one duration sample (stored as milliseconds).
    pub fn time(&self, metric: &Metric, value: Duration) {
        self.time_tagged(metric, value, &[]);
    }

    pub fn time_tagged(&self, metric: &Metric, value: Duration, labels: &[Label]) {
        debug_assert_eq!(metric.kind, MetricKind::Timer);
        self.record_at(metric, value.as_millis() as f64, labels, now_ms());
    }

    pub(crate) fn record_at(&self, metric: &Metric, value: f64, labels: &[Label], ts_ms: i64) {
        let mut series = self.series.write().unwrap_or_else(|e| e.into_inner());
        series.entry(metric.name).or_default().push(Sample {
            ts_ms,
            value,
            labels: labels.to_vec(),
        });
    }

    // ── Reads ──────────────────────────────────────────────────

    /// Sum of in-window counter samples, with one-window fallback.
    pub fn read_count(&self, at_ms: i64, metric: &Metric) -> f64 {
        debug_assert_eq!(metric.kind, MetricKind::Counter);
        self.with_fallback(at_ms, metric.name, &[], sum)
    }

    /// Latest in-window gauge sample (ties broken by latest timestamp),
    /// with one-window fallback.
    pub fn read_gauge(&self, at_ms: i64, metric: &Metric) -> f64 {
        debug_assert_eq!(metric.kind, MetricKind::Gauge);
        self.with_fallback(at_ms, metric.name, &[], latest)
    }

    /// Mean of in-window duration samples, with one-window fallback.
    ///
    /// Timers aggregate by mean, for every timer key.
    pub fn read_time(&self, at_ms: i64, metric: &Metric) -> Duration {
        debug_assert_eq!(metric.kind, MetricKind::Timer);
        Duration::from_millis(self.with_fallback(at_ms, metric.name, &[], mean) as u64)
    }

    /// Registry-routed read for the query API: aggregate the key according
    /// to its declared kind (timers as mean milliseconds). `None` for keys
    /// not in the registry.
    pub fn read_windowed(&self, at_ms: i64, key: &str, filter: &[Label]) -> Option<f64> {
        let metric = keys::lookup(key)?;
        let value = match metric.kind {
            MetricKind::Counter => self.with_fallback(at_ms, metric.name, filter, sum),
            MetricKind::Gauge => self.with_fallback(at_ms, metric.name, filter, latest),
            MetricKind::Timer => self.with_fallback(at_ms, metric.name, filter, mean),
        };
        Some(value)
    }

    /// Aggregate `[at - w, at]`; if that window is empty, `[at - 2w, at - w)`.
    fn with_fallback(
        &self,
        at_ms: i64,
        name: &str,
        filter: &[Label],
        agg: fn(&[(i64, f64)]) -> f64,
    ) -> f64 {
        let current = self.select(name, at_ms - self.window_ms, at_ms, filter);
        if !current.is_empty() {
            return agg(&current);
        }
        let previous = self.select(name, at_ms - 2 * self.window_ms, at_ms - self.window_ms - 1, filter);
        if previous.is_empty() { 0.0 } else { agg(&previous) }
    }

    /// Samples with `start <= ts <= end` matching every filter label.
    fn select(&self, name: &str, start: i64, end: i64, filter: &[Label]) -> Vec<(i64, f64)> {
        let series = self.series.read().unwrap_or_else(|e| e.into_inner());
        let Some(samples) = series.get(name) else {
            return Vec::new();
        };
        samples
            .iter()
            .filter(|s| s.ts_ms >= start && s.ts_ms <= end)
            .filter(|s| filter.iter().all(|f| s.labels.contains(f)))
            .map(|s| (s.ts_ms, s.value))
            .collect()
    }
}

fn sum(points: &[(i64, f64)]) -> f64 {
    points.iter().map(|(_, v)| v).sum()
}

fn latest(points: &[(i64, f64)]) -> f64 {
    points
        .iter()
        .fold((i64::MIN, 0.0), |acc, &(ts, v)| if ts >= acc.0 { (ts, v) } else { acc })
        .1
}

fn mean(points: &[(i64, f64)]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    sum(points) / points.len() as f64
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
