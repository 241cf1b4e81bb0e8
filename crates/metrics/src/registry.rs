//! Metric primitives and the shared registry.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// An integer gauge holding the most recently observed value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    /// Create a new gauge initialized to 0.
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Replace the gauge value.
    #[inline]
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Get the current value.
    #[inline]
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A throughput meter counting marks and bytes.
///
/// Rates are derived by the reporter from successive snapshots; the hot
/// path only ever performs two relaxed adds.
#[derive(Debug, Default)]
pub struct Meter {
    marks: AtomicU64,
    bytes: AtomicU64,
}

impl Meter {
    /// Create a new meter.
    pub const fn new() -> Self {
        Self {
            marks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Record one event carrying `bytes` bytes.
    #[inline]
    pub fn mark(&self, bytes: u64) {
        self.marks.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Get a point-in-time snapshot.
    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            marks: self.marks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`Meter`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeterSnapshot {
    pub marks: u64,
    pub bytes: u64,
}

/// A registered metric.
#[derive(Debug, Clone)]
pub enum Metric {
    Gauge(Arc<Gauge>),
    Meter(Arc<Meter>),
}

/// Named collection of metrics with get-or-register semantics.
#[derive(Debug, Default)]
pub struct Registry {
    metrics: DashMap<String, Metric>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            metrics: DashMap::new(),
        }
    }

    /// Get the gauge registered under `name`, registering it first if needed.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered as a different metric kind.
    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        let entry = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::Gauge(Arc::new(Gauge::new())));
        match entry.value() {
            Metric::Gauge(g) => Arc::clone(g),
            Metric::Meter(_) => panic!("metric {name} is registered as a meter, not a gauge"),
        }
    }

    /// Get the meter registered under `name`, registering it first if needed.
    ///
    /// # Panics
    ///
    /// Panics if `name` is already registered as a different metric kind.
    pub fn meter(&self, name: &str) -> Arc<Meter> {
        let entry = self
            .metrics
            .entry(name.to_string())
            .or_insert_with(|| Metric::Meter(Arc::new(Meter::new())));
        match entry.value() {
            Metric::Meter(m) => Arc::clone(m),
            Metric::Gauge(_) => panic!("metric {name} is registered as a gauge, not a meter"),
        }
    }

    /// Snapshot every registered metric, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, Metric)> {
        let mut all: Vec<(String, Metric)> = self
            .metrics
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Number of registered metrics.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True if nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// The process-wide registry used by all streamtee components.
pub fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauge_set_get() {
        let gauge = Gauge::new();
        assert_eq!(gauge.get(), 0);

        gauge.set(42);
        assert_eq!(gauge.get(), 42);

        gauge.set(-3);
        assert_eq!(gauge.get(), -3);
    }

    #[test]
    fn test_meter_mark() {
        let meter = Meter::new();
        meter.mark(100);
        meter.mark(200);

        let snap = meter.snapshot();
        assert_eq!(snap.marks, 2);
        assert_eq!(snap.bytes, 300);
    }

    #[test]
    fn test_registry_get_or_register() {
        let registry = Registry::new();

        let a = registry.gauge("streams");
        let b = registry.gauge("streams");
        a.set(7);
        assert_eq!(b.get(), 7);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_snapshot_sorted() {
        let registry = Registry::new();
        registry.meter("b.throughput");
        registry.gauge("a.avail");

        let names: Vec<String> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a.avail".to_string(), "b.throughput".to_string()]);
    }

    #[test]
    #[should_panic(expected = "registered as a meter")]
    fn test_registry_kind_mismatch_panics() {
        let registry = Registry::new();
        registry.meter("x");
        registry.gauge("x");
    }
}
