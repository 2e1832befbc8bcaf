//! Global atomic counters for campaign observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (done at the end of every campaign).

use std::sync::atomic::{AtomicU64, Ordering};

use quantbench_state::RunStatus;

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
    runs_skipped: AtomicU64,
    downloads_started: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            runs_succeeded: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            runs_skipped: AtomicU64::new(0),
            downloads_started: AtomicU64::new(0),
        }
    }

    /// Count a recorded run outcome. Non-terminal statuses are ignored.
    pub fn record_run(&self, status: RunStatus) {
        let counter = match status {
            RunStatus::Success => &self.runs_succeeded,
            RunStatus::Failed => &self.runs_failed,
            RunStatus::Skipped => &self.runs_skipped,
            RunStatus::Pending | RunStatus::Running => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = %status, "counter incremented");
    }

    /// Increment the downloads-started counter by one.
    pub fn inc_downloads(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "downloads_started", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            runs_succeeded = self.runs_succeeded(),
            runs_failed = self.runs_failed(),
            runs_skipped = self.runs_skipped(),
            downloads_started = self.downloads_started(),
        );
    }

    pub fn runs_succeeded(&self) -> u64 {
        self.runs_succeeded.load(Ordering::Relaxed)
    }

    pub fn runs_failed(&self) -> u64 {
        self.runs_failed.load(Ordering::Relaxed)
    }

    pub fn runs_skipped(&self) -> u64 {
        self.runs_skipped.load(Ordering::Relaxed)
    }

    pub fn downloads_started(&self) -> u64 {
        self.downloads_started.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.runs_succeeded.store(0, Ordering::Relaxed);
        self.runs_failed.store(0, Ordering::Relaxed);
        self.runs_skipped.store(0, Ordering::Relaxed);
        self.downloads_started.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.record_run(RunStatus::Success);
        m.record_run(RunStatus::Success);
        m.record_run(RunStatus::Failed);
        m.record_run(RunStatus::Skipped);
        m.record_run(RunStatus::Running);
        m.inc_downloads();
        assert_eq!(m.runs_succeeded(), 2);
        assert_eq!(m.runs_failed(), 1);
        assert_eq!(m.runs_skipped(), 1);
        assert_eq!(m.downloads_started(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.record_run(RunStatus::Failed);
        m.inc_downloads();
        m.reset();
        assert_eq!(m.runs_failed(), 0);
        assert_eq!(m.downloads_started(), 0);
    }
}
