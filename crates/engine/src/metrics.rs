//! Transaction counters shared by all workers
//!
//! The counters use Relaxed ordering: they are observational, never used
//! to synchronize other memory, and approximate reads are acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live transaction counters
#[derive(Debug, Default)]
pub struct TransactionCounters {
    active: AtomicU64,
    started: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    validation_conflicts: AtomicU64,
    lock_conflicts: AtomicU64,
    version_mismatches: AtomicU64,
}

impl TransactionCounters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Record transaction start
    pub fn record_start(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful commit
    pub fn record_commit(&self) {
        self.finish();
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an abort or rollback
    pub fn record_abort(&self) {
        self.finish();
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed validation with its conflict breakdown
    pub fn record_conflict(&self, lock_conflicts: usize, version_mismatches: usize) {
        self.validation_conflicts.fetch_add(1, Ordering::Relaxed);
        self.lock_conflicts
            .fetch_add(lock_conflicts as u64, Ordering::Relaxed);
        self.version_mismatches
            .fetch_add(version_mismatches as u64, Ordering::Relaxed);
    }

    fn finish(&self) {
        // saturating decrement
        let _ = self
            .active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| Some(x.saturating_sub(1)));
    }

    /// Current snapshot
    pub fn snapshot(&self) -> TransactionMetrics {
        let started = self.started.load(Ordering::Relaxed);
        let committed = self.committed.load(Ordering::Relaxed);
        TransactionMetrics {
            active_count: self.active.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.aborted.load(Ordering::Relaxed),
            validation_conflicts: self.validation_conflicts.load(Ordering::Relaxed),
            lock_conflicts: self.lock_conflicts.load(Ordering::Relaxed),
            version_mismatches: self.version_mismatches.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// Transaction metrics
///
/// Provides statistics about transaction lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionMetrics {
    /// Number of currently active transactions
    pub active_count: u64,
    /// Total number of transactions started
    pub total_started: u64,
    /// Total number of transactions committed
    pub total_committed: u64,
    /// Total number of transactions aborted or rolled back
    pub total_aborted: u64,
    /// Commits refused by validation
    pub validation_conflicts: u64,
    /// Lock refusals and timeouts across all refused commits
    pub lock_conflicts: u64,
    /// Version mismatches across all refused commits
    pub version_mismatches: u64,
    /// Commit success rate (committed / started)
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + aborted)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }

    /// Abort rate (aborted / started)
    pub fn abort_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_aborted as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
