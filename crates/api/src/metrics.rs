use graph::PipelineDiagnostics;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Requests
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,
    cache_hits: AtomicUsize,

    // Pipeline runs
    graphs_generated: AtomicUsize,
    total_generate_time_us: AtomicU64,
    total_render_time_us: AtomicU64,
    context_fallbacks: AtomicUsize,

    // Counts
    total_chunks_processed: AtomicUsize,
    total_batches: AtomicUsize,
    failed_batches: AtomicUsize,
    total_nodes: AtomicUsize,
    total_relationships: AtomicUsize,
    dropped_relationships: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            cache_hits: AtomicUsize::new(0),
            graphs_generated: AtomicUsize::new(0),
            total_generate_time_us: AtomicU64::new(0),
            total_render_time_us: AtomicU64::new(0),
            context_fallbacks: AtomicUsize::new(0),
            total_chunks_processed: AtomicUsize::new(0),
            total_batches: AtomicUsize::new(0),
            failed_batches: AtomicUsize::new(0),
            total_nodes: AtomicUsize::new(0),
            total_relationships: AtomicUsize::new(0),
            dropped_relationships: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_generation(&self, duration: Duration, diagnostics: &PipelineDiagnostics) {
        self.graphs_generated.fetch_add(1, Ordering::Relaxed);
        self.total_generate_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if diagnostics.context_fallback {
            self.context_fallbacks.fetch_add(1, Ordering::Relaxed);
        }
        self.total_chunks_processed
            .fetch_add(diagnostics.chunk_count, Ordering::Relaxed);
        self.total_batches.fetch_add(diagnostics.batch_count, Ordering::Relaxed);
        self.failed_batches
            .fetch_add(diagnostics.failed_batches, Ordering::Relaxed);
        self.total_nodes.fetch_add(diagnostics.node_count, Ordering::Relaxed);
        self.total_relationships
            .fetch_add(diagnostics.relationship_count, Ordering::Relaxed);
        self.dropped_relationships
            .fetch_add(diagnostics.dropped_relationships, Ordering::Relaxed);
    }

    pub fn record_render(&self, duration: Duration) {
        self.total_render_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            graphs_generated: self.graphs_generated.load(Ordering::Relaxed),
            avg_generate_time_ms: self.avg_time_ms(&self.total_generate_time_us, &self.graphs_generated),
            avg_render_time_ms: self.avg_time_ms(&self.total_render_time_us, &self.graphs_generated),
            context_fallbacks: self.context_fallbacks.load(Ordering::Relaxed),
            total_chunks_processed: self.total_chunks_processed.load(Ordering::Relaxed),
            total_batches: self.total_batches.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            total_nodes: self.total_nodes.load(Ordering::Relaxed),
            total_relationships: self.total_relationships.load(Ordering::Relaxed),
            dropped_relationships: self.dropped_relationships.load(Ordering::Relaxed),
        }
    }

    fn avg_time_ms(&self, total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
        let total = total_us.load(Ordering::Relaxed) as f64;
        let cnt = count.load(Ordering::Relaxed) as f64;
        if cnt > 0.0 {
            total / cnt / 1000.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub cache_hits: usize,
    pub graphs_generated: usize,
    pub avg_generate_time_ms: f64,
    pub avg_render_time_ms: f64,
    pub context_fallbacks: usize,
    pub total_chunks_processed: usize,
    pub total_batches: usize,
    pub failed_batches: usize,
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub dropped_relationships: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
