//! Allocation Tracking
//!
//! Records every live host and device buffer a trial holds, so tests can
//! assert that nothing outlives the trial on any exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Unique allocation identifier, increasing in allocation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AllocationId(u64);

impl AllocationId {
    /// Create a new unique ID
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for AllocationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocation metadata
#[derive(Debug, Clone)]
pub struct AllocationInfo {
    /// Buffer name
    pub label: &'static str,
    /// Size in bytes
    pub bytes: usize,
    /// Allocation timestamp
    pub timestamp: Instant,
}

#[derive(Debug, Default)]
struct TrackerState {
    allocations: HashMap<AllocationId, AllocationInfo>,
    live_bytes: usize,
    peak_bytes: usize,
    total_allocations: u64,
}

/// Shared registry of live allocations
///
/// Cloning shares the registry. An optional capacity makes [`track`]
/// refuse requests that would exceed it.
///
/// [`track`]: AllocationTracker::track
#[derive(Debug, Clone, Default)]
pub struct AllocationTracker {
    state: Arc<Mutex<TrackerState>>,
    capacity: Option<usize>,
}

fn lock(state: &Mutex<TrackerState>) -> MutexGuard<'_, TrackerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AllocationTracker {
    /// Unbounded tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker that refuses to hold more than `bytes` at once
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            state: Arc::default(),
            capacity: Some(bytes),
        }
    }

    /// Register a buffer; it stays live until the returned handle drops
    ///
    /// Returns `None` if the capacity would be exceeded.
    #[must_use]
    pub fn track(&self, label: &'static str, bytes: usize) -> Option<TrackedAllocation> {
        let mut state = lock(&self.state);
        let live = state.live_bytes.checked_add(bytes)?;
        if self.capacity.is_some_and(|cap| live > cap) {
            return None;
        }

        let id = AllocationId::new();
        state.allocations.insert(
            id,
            AllocationInfo {
                label,
                bytes,
                timestamp: Instant::now(),
            },
        );
        state.live_bytes = live;
        state.peak_bytes = state.peak_bytes.max(live);
        state.total_allocations += 1;

        Some(TrackedAllocation {
            id,
            state: Arc::clone(&self.state),
        })
    }

    /// Buffers currently live
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        lock(&self.state).allocations.len()
    }

    /// Bytes currently live
    #[must_use]
    pub fn live_bytes(&self) -> usize {
        lock(&self.state).live_bytes
    }

    /// Highest number of bytes live at once
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        lock(&self.state).peak_bytes
    }

    /// Buffers ever registered
    #[must_use]
    pub fn total_allocations(&self) -> u64 {
        lock(&self.state).total_allocations
    }

    /// Labels of live buffers, oldest first
    #[must_use]
    pub fn live_labels(&self) -> Vec<&'static str> {
        let state = lock(&self.state);
        let mut live: Vec<_> = state.allocations.iter().collect();
        live.sort_by_key(|(id, _)| **id);
        live.into_iter().map(|(_, info)| info.label).collect()
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

/// Registration of one live buffer; releases it on drop
#[derive(Debug)]
pub struct TrackedAllocation {
    id: AllocationId,
    state: Arc<Mutex<TrackerState>>,
}

impl TrackedAllocation {
    /// Allocation identifier
    #[must_use]
    pub fn id(&self) -> AllocationId {
        self.id
    }
}

impl Drop for TrackedAllocation {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(info) = state.allocations.remove(&self.id) {
            state.live_bytes -= info.bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_id_unique() {
        let a = AllocationId::new();
        let b = AllocationId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_track_and_release() {
        let tracker = AllocationTracker::new();
        let a = tracker.track("a", 100).unwrap();
        let b = tracker.track("b", 50).unwrap();
        assert_eq!(tracker.live_allocations(), 2);
        assert_eq!(tracker.live_bytes(), 150);
        assert_eq!(tracker.live_labels(), vec!["a", "b"]);

        drop(a);
        assert_eq!(tracker.live_allocations(), 1);
        assert_eq!(tracker.live_bytes(), 50);

        drop(b);
        assert_eq!(tracker.live_allocations(), 0);
        assert_eq!(tracker.live_bytes(), 0);
        assert_eq!(tracker.peak_bytes(), 150);
        assert_eq!(tracker.total_allocations(), 2);
    }

    #[test]
    fn test_capacity_refuses_overflow() {
        let tracker = AllocationTracker::with_capacity(100);
        let _a = tracker.track("a", 60).unwrap();
        assert!(tracker.track("b", 41).is_none());
        assert!(tracker.track("b", 40).is_some());
        assert_eq!(tracker.total_allocations(), 2);
    }

    #[test]
    fn test_clones_share_state() {
        let tracker = AllocationTracker::new();
        let other = tracker.clone();
        let _a = other.track("c", 8).unwrap();
        assert_eq!(tracker.live_allocations(), 1);
    }
}
