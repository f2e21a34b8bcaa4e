//! Leak tracking for raw allocations

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of a tracker's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationStats {
    /// Tracked allocations not yet released
    pub live: usize,
    /// Bytes held by live tracked allocations
    pub live_bytes: usize,
    /// Tracked allocations made since creation
    pub total: usize,
}

#[derive(Debug, Default)]
struct Counters {
    live: AtomicUsize,
    live_bytes: AtomicUsize,
    total: AtomicUsize,
}

/// Counts live raw allocations so leaks show up in tests and diagnostics.
///
/// Cloning yields a handle to the same counters.
#[derive(Debug, Clone, Default)]
pub struct AllocationTracker {
    counters: Arc<Counters>,
}

impl AllocationTracker {
    /// Create a tracker with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_alloc(&self, size: usize) {
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        self.counters.live_bytes.fetch_add(size, Ordering::Relaxed);
        self.counters.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_free(&self, size: usize) {
        let released = self
            .counters
            .live
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| live.checked_sub(1))
            .is_ok();
        assert!(released, "tracked raw storage released twice");
        self.counters.live_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    /// Current counters
    pub fn stats(&self) -> AllocationStats {
        AllocationStats {
            live: self.counters.live.load(Ordering::Relaxed),
            live_bytes: self.counters.live_bytes.load(Ordering::Relaxed),
            total: self.counters.total.load(Ordering::Relaxed),
        }
    }

    /// Whether every tracked allocation has been released
    pub fn is_balanced(&self) -> bool {
        self.counters.live.load(Ordering::Relaxed) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_free_balance() {
        let tracker = AllocationTracker::new();
        tracker.on_alloc(32);
        assert_eq!(tracker.stats().live_bytes, 32);
        tracker.on_free(32);
        assert!(tracker.is_balanced());
        assert_eq!(tracker.stats().total, 1);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let tracker = AllocationTracker::new();
        tracker.on_alloc(16);
        tracker.on_free(16);
        tracker.on_free(16);
    }
}
