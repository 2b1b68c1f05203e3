use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and rewrite activity.
#[derive(Default)]
pub struct IngestionMetrics {
    documents_ingested: AtomicU64,
    chunks_written: AtomicU64,
    summary_fallbacks: AtomicU64,
    rewrites_applied: AtomicU64,
}

impl IngestionMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ingested document with its chunk and fallback counts.
    pub fn record_document(&self, chunk_count: u64, fallbacks: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_written.fetch_add(chunk_count, Ordering::Relaxed);
        self.summary_fallbacks
            .fetch_add(fallbacks, Ordering::Relaxed);
    }

    /// Record summaries persisted by a metadata rewrite.
    pub fn record_rewrites(&self, updated: u64) {
        self.rewrites_applied.fetch_add(updated, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            summary_fallbacks: self.summary_fallbacks.load(Ordering::Relaxed),
            rewrites_applied: self.rewrites_applied.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of the counters used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents ingested since startup.
    pub documents_ingested: u64,
    /// Chunks written across all ingested documents.
    pub chunks_written: u64,
    /// Chunks whose summary degraded to an excerpt.
    pub summary_fallbacks: u64,
    /// Summaries replaced by metadata rewrites.
    pub rewrites_applied: u64,
}
