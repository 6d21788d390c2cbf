//! The scheduling-policy boundary.
//!
//! The dependency core decides *when* a task may run; the policy decides
//! *where* and *in what order*. The boundary is two calls: the core pushes
//! a ready task, a worker pops one. Policies are pluggable and the core
//! owns no policy state.
//!
//! [`FifoPolicy`] is the reference implementation: a single lock-free
//! injection queue shared by all workers.

use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::task::ReadyTask;
use crate::types::WorkerId;

/// A pluggable scheduling policy.
pub trait SchedPolicy: Send + Sync + 'static {
    /// Accepts a task whose dependencies are all satisfied.
    ///
    /// Called by the dependency core with no core lock held. Must not call
    /// back into the core synchronously.
    fn push_ready(&self, task: ReadyTask);

    /// Hands a ready task to `worker`, or `None` when there is nothing
    /// for it to do right now.
    fn pop_for_worker(&self, worker: WorkerId) -> Option<ReadyTask>;
}

/// First-in-first-out policy over one shared injection queue.
///
/// Ignores the worker id: any worker may run any task.
#[derive(Debug, Default)]
pub struct FifoPolicy {
    queue: SegQueue<ReadyTask>,
    /// Approximate count of queued tasks (for diagnostics).
    pending: AtomicUsize,
}

impl FifoPolicy {
    /// Creates an empty policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Approximate number of queued ready tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// True when no ready task is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchedPolicy for FifoPolicy {
    fn push_ready(&self, task: ReadyTask) {
        self.queue.push(task);
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    fn pop_for_worker(&self, _worker: WorkerId) -> Option<ReadyTask> {
        let task = self.queue.pop()?;
        self.pending.fetch_sub(1, Ordering::Relaxed);
        Some(task)
    }
}
