use analysis::AnalysisOutcome;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Runs
    runs_started: AtomicUsize,
    runs_completed: AtomicUsize,
    runs_failed: AtomicUsize,
    runs_rejected: AtomicUsize,

    // Chunks
    chunks_processed: AtomicUsize,
    chunks_failed: AtomicUsize,

    // Timing (in microseconds)
    total_run_time_us: AtomicU64,

    manuscripts_uploaded: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            runs_started: AtomicUsize::new(0),
            runs_completed: AtomicUsize::new(0),
            runs_failed: AtomicUsize::new(0),
            runs_rejected: AtomicUsize::new(0),
            chunks_processed: AtomicUsize::new(0),
            chunks_failed: AtomicUsize::new(0),
            total_run_time_us: AtomicU64::new(0),
            manuscripts_uploaded: AtomicUsize::new(0),
        })
    }

    pub fn record_upload(&self) {
        self.manuscripts_uploaded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A request refused before any run existed
    pub fn record_run_rejected(&self) {
        self.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self, duration: Duration, outcome: &AnalysisOutcome) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_processed.fetch_add(outcome.chunks_total, Ordering::Relaxed);
        self.chunks_failed.fetch_add(outcome.chunks_failed, Ordering::Relaxed);
        self.add_run_time(duration);
    }

    pub fn record_run_failed(&self, duration: Duration) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        self.add_run_time(duration);
    }

    fn add_run_time(&self, duration: Duration) {
        self.total_run_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let runs_completed = self.runs_completed.load(Ordering::Relaxed);
        let runs_failed = self.runs_failed.load(Ordering::Relaxed);

        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed,
            runs_failed,
            runs_rejected: self.runs_rejected.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            avg_run_time_ms: avg_time_ms(
                self.total_run_time_us.load(Ordering::Relaxed),
                runs_completed + runs_failed,
            ),
            manuscripts_uploaded: self.manuscripts_uploaded.load(Ordering::Relaxed),
        }
    }
}

fn avg_time_ms(total_us: u64, count: usize) -> f64 {
    if count > 0 {
        total_us as f64 / count as f64 / 1000.0
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: usize,
    pub runs_completed: usize,
    pub runs_failed: usize,
    pub runs_rejected: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub avg_run_time_ms: f64,
    pub manuscripts_uploaded: usize,
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
