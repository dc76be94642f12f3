//! Global atomic counters for Crucible observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters, no allocations, no locking.
pub struct Metrics {
    pipelines_run: AtomicU64,
    stages_failed: AtomicU64,
    fixes_applied: AtomicU64,
    sessions_started: AtomicU64,
    sessions_timed_out: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            pipelines_run: AtomicU64::new(0),
            stages_failed: AtomicU64::new(0),
            fixes_applied: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_timed_out: AtomicU64::new(0),
        }
    }

    pub fn inc_pipelines_run(&self) {
        self.pipelines_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "pipelines_run", "counter incremented");
    }

    pub fn inc_stages_failed(&self) {
        self.stages_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stages_failed", "counter incremented");
    }

    pub fn inc_fixes_applied(&self) {
        self.fixes_applied.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fixes_applied", "counter incremented");
    }

    pub fn inc_sessions_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_started", "counter incremented");
    }

    pub fn inc_sessions_timed_out(&self) {
        self.sessions_timed_out.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "sessions_timed_out", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries (end of a CLI command, service tick)
    /// rather than on every increment.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            pipelines_run = self.pipelines_run(),
            stages_failed = self.stages_failed(),
            fixes_applied = self.fixes_applied(),
            sessions_started = self.sessions_started(),
            sessions_timed_out = self.sessions_timed_out(),
        );
    }

    pub fn pipelines_run(&self) -> u64 {
        self.pipelines_run.load(Ordering::Relaxed)
    }

    pub fn stages_failed(&self) -> u64 {
        self.stages_failed.load(Ordering::Relaxed)
    }

    pub fn fixes_applied(&self) -> u64 {
        self.fixes_applied.load(Ordering::Relaxed)
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    pub fn sessions_timed_out(&self) -> u64 {
        self.sessions_timed_out.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.pipelines_run.store(0, Ordering::Relaxed);
        self.stages_failed.store(0, Ordering::Relaxed);
        self.fixes_applied.store(0, Ordering::Relaxed);
        self.sessions_started.store(0, Ordering::Relaxed);
        self.sessions_timed_out.store(0, Ordering::Relaxed);
    }
}
