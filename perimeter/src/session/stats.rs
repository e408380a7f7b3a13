//! Per-session work-item counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the dispatcher as work items enter and leave the
/// handler pipelines. Lock-free; readers see a recent snapshot.
#[derive(Debug, Default)]
pub struct SessionStats {
    work_items_total: AtomicU64,
    work_items_completed: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    pub work_items_total: u64,
    pub work_items_completed: u64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.work_items_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.work_items_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            work_items_total: self.work_items_total.load(Ordering::Relaxed),
            work_items_completed: self.work_items_completed.load(Ordering::Relaxed),
        }
    }
}
