use crate::processing::ChunkingStrategy;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing chunking activity.
#[derive(Default)]
pub struct ChunkingMetrics {
    documents_analyzed: AtomicU64,
    documents_chunked: AtomicU64,
    chunks_created: AtomicU64,
    pages_skipped: AtomicU64,
    analysis_failures: AtomicU64,
    aggregations: AtomicU64,
    partial_aggregations: AtomicU64,
    failed_chunk_results: AtomicU64,
    fixed_pages_used: AtomicU64,
    token_based_used: AtomicU64,
    hybrid_used: AtomicU64,
}

impl ChunkingMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document whose size was analyzed under `strategy`.
    pub fn record_analysis(&self, strategy: ChunkingStrategy) {
        self.documents_analyzed.fetch_add(1, Ordering::Relaxed);
        let counter = match strategy {
            ChunkingStrategy::FixedPages => &self.fixed_pages_used,
            ChunkingStrategy::TokenBased => &self.token_based_used,
            ChunkingStrategy::Hybrid => &self.hybrid_used,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a split document, the chunks written for it and the pages left out.
    pub fn record_split(&self, chunk_count: u64, pages_skipped: u64) {
        self.documents_chunked.fetch_add(1, Ordering::Relaxed);
        self.chunks_created.fetch_add(chunk_count, Ordering::Relaxed);
        self.pages_skipped.fetch_add(pages_skipped, Ordering::Relaxed);
    }

    /// Record an analysis that ended in a classified error.
    pub fn record_failure(&self) {
        self.analysis_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an aggregation and how many of its chunk results had failed.
    pub fn record_aggregation(&self, partial: bool, failed_chunks: u64) {
        self.aggregations.fetch_add(1, Ordering::Relaxed);
        if partial {
            self.partial_aggregations.fetch_add(1, Ordering::Relaxed);
        }
        self.failed_chunk_results
            .fetch_add(failed_chunks, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            documents_analyzed: load(&self.documents_analyzed),
            documents_chunked: load(&self.documents_chunked),
            chunks_created: load(&self.chunks_created),
            pages_skipped: load(&self.pages_skipped),
            analysis_failures: load(&self.analysis_failures),
            aggregations: load(&self.aggregations),
            partial_aggregations: load(&self.partial_aggregations),
            failed_chunk_results: load(&self.failed_chunk_results),
            strategy_usage: StrategyUsage {
                fixed_pages: load(&self.fixed_pages_used),
                token_based: load(&self.token_based_used),
                hybrid: load(&self.hybrid_used),
            },
        }
    }
}

/// Immutable view of chunking counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents whose size was analyzed since startup.
    pub documents_analyzed: u64,
    /// Documents that were split.
    pub documents_chunked: u64,
    /// Chunk artifacts written.
    pub chunks_created: u64,
    /// Pages left out of chunks because they could not be copied.
    pub pages_skipped: u64,
    /// Analyses that ended in an error response.
    pub analysis_failures: u64,
    /// Aggregations performed.
    pub aggregations: u64,
    /// Aggregations flagged as partial.
    pub partial_aggregations: u64,
    /// Failed chunk results seen across all aggregations.
    pub failed_chunk_results: u64,
    /// Analyses per strategy.
    pub strategy_usage: StrategyUsage,
}

/// Per-strategy analysis counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StrategyUsage {
    /// `fixed-pages` analyses.
    pub fixed_pages: u64,
    /// `token-based` analyses.
    pub token_based: u64,
    /// `hybrid` analyses.
    pub hybrid: u64,
}
