//! In-process mirror of the engine's metrics.
//!
//! The `metrics` facade only reaches an exporter when the host installs a
//! recorder. This store keeps the same values locally so diagnostics and
//! the CLI can report them without one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::Serialize;

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }
}

/// Summary statistics for a histogram.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Default, Clone, Copy)]
struct HistogramData {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl HistogramData {
    fn record(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
    }
}

/// Thread-safe metrics store.
#[derive(Debug, Default)]
pub struct MetricsStore {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, f64>>,
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide store fed by the `record_*` functions.
    pub fn global() -> &'static MetricsStore {
        static STORE: OnceLock<MetricsStore> = OnceLock::new();
        STORE.get_or_init(MetricsStore::new)
    }

    pub fn increment_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.write().insert(name.to_string(), value);
    }

    pub fn record_histogram(&self, name: &str, value: f64) {
        self.histograms.write().entry(name.to_string()).or_default().record(value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
                .collect(),
            gauges: self.gauges.read().clone(),
            histograms: self
                .histograms
                .read()
                .iter()
                .map(|(k, h)| {
                    (k.clone(), HistogramSummary { count: h.count, sum: h.sum, min: h.min, max: h.max })
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let store = MetricsStore::new();
        store.increment_counter("a", 1);
        store.increment_counter("a", 2);
        assert_eq!(store.snapshot().counter("a"), 3);
        assert_eq!(store.snapshot().counter("missing"), 0);
    }

    #[test]
    fn test_gauge_overwrites() {
        let store = MetricsStore::new();
        store.set_gauge("g", 64.0);
        store.set_gauge("g", 32.0);
        assert_eq!(store.snapshot().gauge("g"), Some(32.0));
    }

    #[test]
    fn test_histogram_summary() {
        let store = MetricsStore::new();
        for v in [3.0, 1.0, 2.0] {
            store.record_histogram("h", v);
        }
        let summary = store.snapshot().histograms["h"];
        assert_eq!(summary.count, 3);
        assert_eq!(summary.sum, 6.0);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 3.0);
    }
}
