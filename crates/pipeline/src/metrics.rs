use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Process-wide counters and timings for pipeline runs.
pub struct Metrics {
    runs_completed: AtomicUsize,
    runs_failed: AtomicUsize,

    // Timing (in microseconds)
    total_search_time_us: AtomicU64,
    total_extract_time_us: AtomicU64,
    total_resolve_time_us: AtomicU64,

    chunks_processed: AtomicUsize,
    chunks_failed: AtomicUsize,
    entities_extracted: AtomicUsize,
    relationships_created: AtomicUsize,
    entities_merged: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs_completed: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            total_search_time_us: AtomicU64::new(0),
            total_extract_time_us: AtomicU64::new(0),
            total_resolve_time_us: AtomicU64::new(0),
            chunks_processed: AtomicUsize::new(0),
            chunks_failed: AtomicUsize::new(0),
            entities_extracted: AtomicUsize::new(0),
            relationships_created: AtomicUsize::new(0),
            entities_merged: AtomicUsize::new(0),
        })
    }

    pub fn record_run(&self, success: bool) {
        if success {
            self.runs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_search(&self, duration: Duration) {
        self.total_search_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_chunk(&self, duration: Duration, entities: usize, relationships: usize) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.entities_extracted.fetch_add(entities, Ordering::Relaxed);
        self.relationships_created
            .fetch_add(relationships, Ordering::Relaxed);
    }

    pub fn record_chunk_failure(&self, duration: Duration) {
        self.total_extract_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution(&self, duration: Duration, merged: usize) {
        self.total_resolve_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.entities_merged.fetch_add(merged, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let chunks_processed = self.chunks_processed.load(Ordering::Relaxed);
        let chunks_failed = self.chunks_failed.load(Ordering::Relaxed);
        let runs = self.runs_completed.load(Ordering::Relaxed) + self.runs_failed.load(Ordering::Relaxed);

        MetricsSnapshot {
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            chunks_processed,
            chunks_failed,
            entities_extracted: self.entities_extracted.load(Ordering::Relaxed),
            relationships_created: self.relationships_created.load(Ordering::Relaxed),
            entities_merged: self.entities_merged.load(Ordering::Relaxed),
            total_search_time_ms: as_ms(&self.total_search_time_us),
            avg_extract_time_ms: avg_ms(&self.total_extract_time_us, chunks_processed + chunks_failed),
            avg_resolve_time_ms: avg_ms(&self.total_resolve_time_us, runs),
        }
    }
}

fn as_ms(total_us: &AtomicU64) -> f64 {
    total_us.load(Ordering::Relaxed) as f64 / 1000.0
}

fn avg_ms(total_us: &AtomicU64, count: usize) -> f64 {
    if count > 0 {
        as_ms(total_us) / count as f64
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub entities_extracted: usize,
    pub relationships_created: usize,
    pub entities_merged: usize,
    pub total_search_time_ms: f64,
    pub avg_extract_time_ms: f64,
    pub avg_resolve_time_ms: f64,
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
