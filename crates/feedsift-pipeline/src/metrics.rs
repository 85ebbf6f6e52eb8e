use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for metrics backends. Implementations can forward to Prometheus,
/// StatsD, or simply log metrics.
pub trait MetricsBackend: Send + Sync {
    fn record_counter(&self, name: &str, value: u64);
}

/// In-memory metrics collector with atomic counters.
/// Thread-safe for concurrent evaluations.
pub struct PipelineMetrics {
    pub evaluations: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub dedup_joins: AtomicU64,
    pub classifications_completed: AtomicU64,
    pub classifications_failed: AtomicU64,
    pub items_shown: AtomicU64,
    pub items_hidden: AtomicU64,
    pub items_skipped: AtomicU64,
    backend: Option<Arc<dyn MetricsBackend>>,
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            dedup_joins: AtomicU64::new(0),
            classifications_completed: AtomicU64::new(0),
            classifications_failed: AtomicU64::new(0),
            items_shown: AtomicU64::new(0),
            items_hidden: AtomicU64::new(0),
            items_skipped: AtomicU64::new(0),
            backend: None,
        }
    }

    pub fn with_backend(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend: Some(backend),
            ..Self::new()
        }
    }

    fn bump(&self, counter: &AtomicU64, name: &str) {
        let val = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(backend) = &self.backend {
            backend.record_counter(name, val);
        }
    }

    pub fn record_evaluation(&self) {
        self.bump(&self.evaluations, "feedsift.pipeline.evaluations");
    }

    pub fn record_cache_hit(&self) {
        self.bump(&self.cache_hits, "feedsift.pipeline.cache_hits");
    }

    pub fn record_cache_miss(&self) {
        self.bump(&self.cache_misses, "feedsift.pipeline.cache_misses");
    }

    /// A caller waited on another evaluation's classification instead of
    /// issuing its own.
    pub fn record_dedup_join(&self) {
        self.bump(&self.dedup_joins, "feedsift.pipeline.dedup_joins");
    }

    pub fn record_classification_completed(&self) {
        self.bump(
            &self.classifications_completed,
            "feedsift.pipeline.classifications_completed",
        );
    }

    pub fn record_classification_failed(&self) {
        self.bump(
            &self.classifications_failed,
            "feedsift.pipeline.classifications_failed",
        );
    }

    pub fn record_verdict(&self, show: bool) {
        if show {
            self.bump(&self.items_shown, "feedsift.pipeline.items_shown");
        } else {
            self.bump(&self.items_hidden, "feedsift.pipeline.items_hidden");
        }
    }

    pub fn record_skipped(&self) {
        self.bump(&self.items_skipped, "feedsift.pipeline.items_skipped");
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            dedup_joins: self.dedup_joins.load(Ordering::Relaxed),
            classifications_completed: self.classifications_completed.load(Ordering::Relaxed),
            classifications_failed: self.classifications_failed.load(Ordering::Relaxed),
            items_shown: self.items_shown.load(Ordering::Relaxed),
            items_hidden: self.items_hidden.load(Ordering::Relaxed),
            items_skipped: self.items_skipped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of pipeline metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub evaluations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub dedup_joins: u64,
    pub classifications_completed: u64,
    pub classifications_failed: u64,
    pub items_shown: u64,
    pub items_hidden: u64,
    pub items_skipped: u64,
}

/// Logging-based metrics backend. Emits metrics as structured log events.
pub struct LoggingMetricsBackend;

impl MetricsBackend for LoggingMetricsBackend {
    fn record_counter(&self, name: &str, value: u64) {
        tracing::debug!(metric = name, value = value, kind = "counter", "metric");
    }
}
