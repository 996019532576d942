//! Process-wide metric registry: counters and histograms keyed by name plus
//! labels, registered on first use. Re-registering an existing series returns
//! the existing handle, so collisions de-duplicate instead of erroring.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Contractual metric series names.
pub mod names {
    /// Provider selection outcomes, labeled `{provider, policy, result}`.
    pub const PROVIDER_SELECTIONS_TOTAL: &str = "kari_llm_provider_selections_total";
    /// Fallback transitions between providers, labeled `{from, to, reason}`.
    pub const PROVIDER_FALLBACKS_TOTAL: &str = "kari_llm_provider_fallbacks_total";
    /// Provider call latency histogram, labeled `{provider, policy}`.
    pub const PROVIDER_LATENCY_SECONDS: &str = "kari_llm_provider_latency_seconds";
    /// Provider failures, labeled `{provider, error_type}`.
    pub const PROVIDER_FAILURES_TOTAL: &str = "kari_llm_provider_failures_total";
    /// Memory writes accepted by at least one adapter.
    pub const MEMORY_STORE_TOTAL: &str = "kari_memory_store_total";
    /// Memory recall requests served.
    pub const MEMORY_RECALL_TOTAL: &str = "kari_memory_recall_total";
    /// Recalls where every tier came back empty or failing.
    pub const MEMORY_RECALL_MISS_TOTAL: &str = "kari_memory_recall_miss_total";
}

/// Latency histogram bucket upper bounds, in seconds.
const LATENCY_BUCKETS: [f64; 10] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 10.0];

/// Normalize free-form text for metric label usage: lowercase, spaces to
/// underscores, capped at 64 chars, empty mapped to `unknown`.
pub fn normalize_label(value: &str) -> String {
    let sanitized = value.trim().to_lowercase().replace(' ', "_");
    if sanitized.is_empty() {
        return "unknown".to_string();
    }
    sanitized.chars().take(64).collect()
}

/// Monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `delta`.
    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Fixed-bucket latency histogram.
#[derive(Debug)]
pub struct Histogram {
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            bucket_counts: (0..=LATENCY_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    /// Record an observation in seconds.
    pub fn observe(&self, seconds: f64) {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let bucket = LATENCY_BUCKETS
            .iter()
            .position(|bound| seconds <= *bound)
            .unwrap_or(LATENCY_BUCKETS.len());
        self.bucket_counts[bucket].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
    }

    /// Point-in-time snapshot of the histogram state.
    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            bucket_bounds: LATENCY_BUCKETS.to_vec(),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

/// Snapshot of a histogram for status endpoints and tests.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Total observation count
    pub count: u64,
    /// Sum of all observations, seconds
    pub sum_seconds: f64,
    /// Bucket upper bounds, seconds
    pub bucket_bounds: Vec<f64>,
    /// Observation count per bucket (final slot is the overflow bucket)
    pub bucket_counts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: &'static str,
    labels: Vec<(&'static str, String)>,
}

fn series_key(name: &'static str, labels: &[(&'static str, &str)]) -> SeriesKey {
    let mut labels: Vec<(&'static str, String)> = labels
        .iter()
        .map(|(key, value)| (*key, normalize_label(value)))
        .collect();
    labels.sort_by(|a, b| a.0.cmp(b.0));
    SeriesKey { name, labels }
}

/// Registry of metric series owned by the `Core`. One per process.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<SeriesKey, Arc<Counter>>,
    histograms: DashMap<SeriesKey, Arc<Histogram>>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or register the counter for `name` with the given labels.
    pub fn counter(&self, name: &'static str, labels: &[(&'static str, &str)]) -> Arc<Counter> {
        let key = series_key(name, labels);
        if self.histograms.contains_key(&key) {
            tracing::warn!(
                event = "metrics.registry.kind_collision",
                metric = name,
                "metric already registered as a histogram; returning detached counter"
            );
            return Arc::new(Counter::default());
        }
        self.counters
            .entry(key)
            .or_insert_with(|| Arc::new(Counter::default()))
            .clone()
    }

    /// Fetch or register the histogram for `name` with the given labels.
    pub fn histogram(&self, name: &'static str, labels: &[(&'static str, &str)]) -> Arc<Histogram> {
        let key = series_key(name, labels);
        if self.counters.contains_key(&key) {
            tracing::warn!(
                event = "metrics.registry.kind_collision",
                metric = name,
                "metric already registered as a counter; returning detached histogram"
            );
            return Arc::new(Histogram::new());
        }
        self.histograms
            .entry(key)
            .or_insert_with(|| Arc::new(Histogram::new()))
            .clone()
    }

    /// Current value of a counter series, zero when it was never touched.
    pub fn counter_value(&self, name: &'static str, labels: &[(&'static str, &str)]) -> u64 {
        self.counters
            .get(&series_key(name, labels))
            .map_or(0, |counter| counter.value().value())
    }

    /// Observation count of a histogram series, zero when absent.
    pub fn histogram_count(&self, name: &'static str, labels: &[(&'static str, &str)]) -> u64 {
        self.histograms
            .get(&series_key(name, labels))
            .map_or(0, |histogram| histogram.snapshot().count)
    }

    /// Render every series as sorted `name{labels} value` lines.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for item in &self.counters {
            lines.push(format!("{} {}", render_key(item.key()), item.value().value()));
        }
        for item in &self.histograms {
            let snapshot = item.value().snapshot();
            lines.push(format!("{}_count {}", render_key(item.key()), snapshot.count));
            lines.push(format!(
                "{}_sum {:.6}",
                render_key(item.key()),
                snapshot.sum_seconds
            ));
        }
        lines.sort();
        lines.join("\n")
    }
}

fn render_key(key: &SeriesKey) -> String {
    if key.labels.is_empty() {
        return key.name.to_string();
    }
    let labels = key
        .labels
        .iter()
        .map(|(name, value)| format!("{name}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}{{{labels}}}", key.name)
}
