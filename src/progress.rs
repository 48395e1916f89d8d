//! Progress events for the units of a job.
//!
//! The invoker reports every unit start, completion and failure through
//! [`ProgressCallback`]. The service attaches a [`JobProgress`] to each job so
//! `GET /api/status/{job_id}` can report live counters while the job runs.
//!
//! Units run concurrently, so every method may be called from several tasks at
//! once. Implementations must protect shared state (`AtomicUsize`, `Mutex`).

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Called by the pipeline as it processes each unit.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `page` arguments are 1-indexed.
pub trait ProgressCallback: Send + Sync {
    /// Called once, after normalization, with the number of units to extract.
    fn on_job_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called just before the VLM request is sent for a unit.
    fn on_unit_start(&self, filename: &str, page: usize) {
        let _ = (filename, page);
    }

    /// Called when a unit produced Markdown.
    fn on_unit_complete(&self, filename: &str, page: usize, tokens: u64) {
        let _ = (filename, page, tokens);
    }

    /// Called when a unit failed (normalization or extraction).
    fn on_unit_error(&self, filename: &str, page: usize, error: &str) {
        let _ = (filename, page, error);
    }

    /// Called once after aggregation.
    fn on_job_complete(&self, total_files: usize, success_files: usize) {
        let _ = (total_files, success_files);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ProgressCallback for NoopProgressCallback {}

/// Live unit counters for one job.
#[derive(Debug, Default)]
pub struct JobProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// A point-in-time copy of [`JobProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub units_total: usize,
    pub units_completed: usize,
    pub units_failed: usize,
}

impl JobProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            units_total: self.total.load(Ordering::SeqCst),
            units_completed: self.completed.load(Ordering::SeqCst),
            units_failed: self.failed.load(Ordering::SeqCst),
        }
    }
}

impl ProgressCallback for JobProgress {
    fn on_job_start(&self, total_units: usize) {
        self.total.store(total_units, Ordering::SeqCst);
        self.completed.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
    }

    fn on_unit_complete(&self, _filename: &str, _page: usize, _tokens: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unit_error(&self, _filename: &str, _page: usize, _error: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}
