use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

/// A metric value captured at a point in time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub name: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
    pub metric_type: MetricType,
}

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Holds the last value set.
struct Gauge {
    // f64 bits
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

const HISTOGRAM_WINDOW: usize = 4096;

/// In-memory histogram over a sliding window of recent observations.
struct Histogram {
    observations: Mutex<Vec<f64>>,
    count: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            observations: Mutex::new(Vec::new()),
            count: AtomicU64::new(0),
        }
    }
    fn observe(&self, value: f64) {
        let mut obs = self.observations.lock();
        if obs.len() == HISTOGRAM_WINDOW {
            obs.remove(0);
        }
        obs.push(value);
        self.count.fetch_add(1, Ordering::Relaxed);
    }
    fn summary(&self) -> HistogramSummary {
        let mut obs = self.observations.lock().clone();
        if obs.is_empty() {
            return HistogramSummary::default();
        }
        obs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let n = obs.len();
        let sum: f64 = obs.iter().sum();
        let pick = |q: f64| obs[((n as f64 * q) as usize).min(n - 1)];
        HistogramSummary {
            count: self.count.load(Ordering::Relaxed),
            sum,
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
        }
    }
}

/// Summary statistics from a histogram. `sum` and the percentiles cover the
/// retained window; `count` is every observation ever made.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Metric key: name + labels.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct MetricKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut sorted: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            name: name.into(),
            labels: sorted,
        }
    }

    fn labels_map(&self) -> Option<HashMap<String, String>> {
        if self.labels.is_empty() {
            return None;
        }
        Some(self.labels.iter().cloned().collect())
    }
}

/// Thread-safe in-process metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<MetricKey, Counter>>,
    gauges: RwLock<HashMap<MetricKey, Gauge>>,
    histograms: RwLock<HashMap<MetricKey, Histogram>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, labels: &[(&str, &str)], n: u64) {
        let key = MetricKey::new(name, labels);
        let counters = self.counters.read();
        if let Some(c) = counters.get(&key) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        counters.entry(key).or_insert_with(Counter::new).increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(&key) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        gauges.entry(key).or_insert_with(Gauge::new).set(value);
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = MetricKey::new(name, labels);
        let histograms = self.histograms.read();
        if let Some(h) = histograms.get(&key) {
            h.observe(value);
            return;
        }
        drop(histograms);
        let mut histograms = self.histograms.write();
        histograms.entry(key).or_insert_with(Histogram::new).observe(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = MetricKey::new(name, labels);
        self.histograms
            .read()
            .get(&key)
            .map(|h| h.summary())
            .unwrap_or_default()
    }

    pub fn counter_get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = MetricKey::new(name, labels);
        self.counters.read().get(&key).map_or(0, |c| c.get())
    }

    pub fn gauge_get(&self, name: &str, labels: &[(&str, &str)]) -> f64 {
        let key = MetricKey::new(name, labels);
        self.gauges.read().get(&key).map_or(0.0, |g| g.get())
    }

    /// Capture every metric's current value. Histograms report their p50.
    pub fn snapshot(&self) -> Vec<MetricsSnapshot> {
        let now = Utc::now().to_rfc3339();
        let mut out = Vec::new();

        for (key, counter) in self.counters.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now.clone(),
                name: key.name.clone(),
                value: counter.get() as f64,
                labels: key.labels_map(),
                metric_type: MetricType::Counter,
            });
        }
        for (key, gauge) in self.gauges.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now.clone(),
                name: key.name.clone(),
                value: gauge.get(),
                labels: key.labels_map(),
                metric_type: MetricType::Gauge,
            });
        }
        for (key, histogram) in self.histograms.read().iter() {
            out.push(MetricsSnapshot {
                timestamp: now.clone(),
                name: key.name.clone(),
                value: histogram.summary().p50,
                labels: key.labels_map(),
                metric_type: MetricType::Histogram,
            });
        }

        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counter_basic() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("frames.total", &[("kind", "request")], 1);
        recorder.counter_inc("frames.total", &[("kind", "request")], 1);
        recorder.counter_inc("frames.total", &[("kind", "response")], 1);

        assert_eq!(recorder.counter_get("frames.total", &[("kind", "request")]), 2);
        assert_eq!(recorder.counter_get("frames.total", &[("kind", "response")]), 1);
        assert_eq!(recorder.counter_get("frames.total", &[("kind", "other")]), 0);
    }

    #[test]
    fn gauge_set_overwrites() {
        let recorder = MetricsRecorder::new();
        assert_eq!(recorder.gauge_get("acceptor.connections", &[]), 0.0);
        recorder.gauge_set("acceptor.connections", &[], 10.0);
        recorder.gauge_set("acceptor.connections", &[], 3.0);
        assert_eq!(recorder.gauge_get("acceptor.connections", &[]), 3.0);
    }

    #[test]
    fn histogram_observations() {
        let recorder = MetricsRecorder::new();
        let labels = &[("processor", "fetch_message")];
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0] {
            recorder.histogram_observe("process.duration_ms", labels, v);
        }

        let summary = recorder.histogram_summary("process.duration_ms", labels);
        assert_eq!(summary.count, 10);
        assert_eq!(summary.sum, 550.0);
        assert!(summary.p50 >= 50.0 && summary.p50 <= 60.0);
        assert!(summary.p95 >= 90.0);
    }

    #[test]
    fn histogram_empty() {
        let recorder = MetricsRecorder::new();
        let summary = recorder.histogram_summary("nonexistent", &[]);
        assert_eq!(summary.count, 0);
        assert_eq!(summary.sum, 0.0);
    }

    #[test]
    fn histogram_window_is_bounded() {
        let recorder = MetricsRecorder::new();
        for i in 0..(HISTOGRAM_WINDOW + 10) {
            recorder.histogram_observe("h", &[], i as f64);
        }
        let summary = recorder.histogram_summary("h", &[]);
        assert_eq!(summary.count, (HISTOGRAM_WINDOW + 10) as u64);
        assert!(summary.p50 >= 10.0);
    }

    #[test]
    fn snapshot_covers_all_types() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("acceptor.forwarded", &[("request_type", "fetch_message")], 42);
        recorder.gauge_set("acceptor.connections", &[], 5.0);
        recorder.histogram_observe("business.process_ms", &[], 3.0);

        let snap = recorder.snapshot();
        assert_eq!(snap.len(), 3);
        let forwarded = snap.iter().find(|s| s.name == "acceptor.forwarded").unwrap();
        assert_eq!(forwarded.value, 42.0);
        assert_eq!(forwarded.metric_type, MetricType::Counter);
        assert_eq!(
            forwarded.labels.as_ref().unwrap()["request_type"],
            "fetch_message"
        );
        let gauge = snap.iter().find(|s| s.name == "acceptor.connections").unwrap();
        assert!(gauge.labels.is_none());
    }

    #[test]
    fn label_ordering_independent() {
        let recorder = MetricsRecorder::new();
        recorder.counter_inc("test", &[("a", "1"), ("b", "2")], 1);
        recorder.counter_inc("test", &[("b", "2"), ("a", "1")], 1);
        assert_eq!(recorder.counter_get("test", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn concurrent_counter_increments() {
        let recorder = Arc::new(MetricsRecorder::new());
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let r = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        r.counter_inc("concurrent.test", &[], 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(recorder.counter_get("concurrent.test", &[]), 10_000);
    }
}
