//! Dispatch statistics.
//!
//! Provides relaxed atomic counters for the hot paths of the dependency
//! core. Counters are cheap enough to keep on unconditionally; a snapshot
//! can be taken at any time without stopping the world.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increments the counter by 1.
    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    #[inline]
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counters for the dependency core.
#[derive(Debug, Default)]
pub struct CoreMetrics {
    /// Tasks accepted by `task_submit`.
    pub tasks_submitted: Counter,
    /// Tasks whose buffers were all granted at submission time.
    pub tasks_ready_immediate: Counter,
    /// Park events (one per requester appended to a queue).
    pub requesters_parked: Counter,
    /// Requesters promoted on release.
    pub promotions: Counter,
    /// Release events that promoted more than one requester at once.
    pub cohort_promotions: Counter,
    /// Arbiter group acquisitions that succeeded on the fast path.
    pub arbiter_grants: Counter,
    /// Arbiter group acquisitions that rolled back and parked.
    pub arbiter_parks: Counter,
    /// Tasks dispatched by an arbiter notify scan.
    pub arbiter_promotions: Counter,
    /// Combine tasks injected by the reduction barrier.
    pub combine_injections: Counter,
    /// Tasks that reached `Done`.
    pub tasks_completed: Counter,
    /// Synchronous and callback user-side acquisitions.
    pub user_acquisitions: Counter,
}

impl CoreMetrics {
    /// Creates a zeroed metrics block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_submitted: self.tasks_submitted.get(),
            tasks_ready_immediate: self.tasks_ready_immediate.get(),
            requesters_parked: self.requesters_parked.get(),
            promotions: self.promotions.get(),
            cohort_promotions: self.cohort_promotions.get(),
            arbiter_grants: self.arbiter_grants.get(),
            arbiter_parks: self.arbiter_parks.get(),
            arbiter_promotions: self.arbiter_promotions.get(),
            combine_injections: self.combine_injections.get(),
            tasks_completed: self.tasks_completed.get(),
            user_acquisitions: self.user_acquisitions.get(),
        }
    }
}

/// Point-in-time copy of [`CoreMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub tasks_submitted: u64,
    pub tasks_ready_immediate: u64,
    pub requesters_parked: u64,
    pub promotions: u64,
    pub cohort_promotions: u64,
    pub arbiter_grants: u64,
    pub arbiter_parks: u64,
    pub arbiter_promotions: u64,
    pub combine_injections: u64,
    pub tasks_completed: u64,
    pub user_acquisitions: u64,
}
