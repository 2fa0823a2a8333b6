use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for logging outcomes, the only place automatic logging failures surface
#[derive(Debug, Default)]
pub struct LogDiagnostics {
    attempts: AtomicU64,
    committed: AtomicU64,
    duplicates: AtomicU64,
    cache_degraded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub attempts: u64,
    pub committed: u64,
    pub duplicates: u64,
    pub cache_degraded: u64,
    pub failed: u64,
    /// Drafts the dispatcher discarded before they reached the pipeline
    pub dropped: u64,
}

impl LogDiagnostics {
    pub(crate) fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cache_degraded(&self) {
        self.cache_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            cache_degraded: self.cache_degraded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
