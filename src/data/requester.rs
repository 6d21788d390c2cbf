//! Pending-access requests parked on a handle.
//!
//! A requester is one task–handle (or callback–handle) pair waiting for an
//! access to be granted. Requesters live in a per-handle FIFO protected by
//! the handle's header lock; the dispatcher and the arbiter are the only
//! writers. Parked work never occupies a thread: a requester is plain data
//! until a release promotes it.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::task::Job;
use crate::types::{AccessMode, TaskId};

/// What to do when the access is granted.
pub(crate) enum RequesterPayload {
    /// Resume a task's acquisition walk after buffer `buf_index`.
    Task {
        /// The waiting task.
        job: Arc<Job>,
        /// Index of this buffer in the task's ordered list.
        buf_index: usize,
    },
    /// Invoke a callback (user-side acquisition).
    Callback(Box<dyn FnOnce() + Send>),
}

/// A queued request for one handle.
pub(crate) struct Requester {
    /// Queue-assigned identity, used for targeted removal.
    pub(crate) seq: u64,
    /// The requested access mode.
    pub(crate) mode: AccessMode,
    /// Set for the reduction combine task, which bypasses the barrier.
    pub(crate) combine: bool,
    pub(crate) payload: RequesterPayload,
}

impl Requester {
    /// Builds a requester for buffer `buf_index` of `job`.
    pub(crate) fn for_job(job: &Arc<Job>, buf_index: usize) -> Self {
        Self {
            seq: 0,
            mode: job.buffers[buf_index].mode,
            combine: job.combine,
            payload: RequesterPayload::Task {
                job: Arc::clone(job),
                buf_index,
            },
        }
    }

    /// Builds a callback requester (user-side acquisition).
    pub(crate) fn for_callback(mode: AccessMode, f: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            seq: 0,
            mode,
            combine: false,
            payload: RequesterPayload::Callback(f),
        }
    }

    /// The id of the waiting task, if this is a task requester.
    pub(crate) fn task_id(&self) -> Option<TaskId> {
        match &self.payload {
            RequesterPayload::Task { job, .. } => Some(job.id),
            RequesterPayload::Callback(_) => None,
        }
    }
}

impl std::fmt::Debug for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.payload {
            RequesterPayload::Task { job, buf_index } => format!("task {} buf {buf_index}", job.id),
            RequesterPayload::Callback(_) => "callback".to_owned(),
        };
        write!(f, "Requester({kind}, {}, seq {})", self.mode, self.seq)
    }
}

/// FIFO of pending requesters for one handle.
///
/// Front insertion exists solely for the reduction combine task, which must
/// run before any already-parked non-reduction requester.
#[derive(Default)]
pub(crate) struct RequesterQueue {
    entries: VecDeque<Requester>,
    next_seq: u64,
}

impl RequesterQueue {
    pub(crate) fn push_back(&mut self, mut req: Requester) {
        req.seq = self.allocate_seq();
        self.entries.push_back(req);
    }

    pub(crate) fn push_front(&mut self, mut req: Requester) {
        req.seq = self.allocate_seq();
        self.entries.push_front(req);
    }

    fn allocate_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn front(&self) -> Option<&Requester> {
        self.entries.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<Requester> {
        self.entries.pop_front()
    }

    /// Removes the requester queued for `task`, if present.
    pub(crate) fn remove_task(&mut self, task: TaskId) -> Option<Requester> {
        let pos = self.entries.iter().position(|r| r.task_id() == Some(task))?;
        self.entries.remove(pos)
    }

    /// Removes the requester with queue identity `seq`, if present.
    pub(crate) fn remove_seq(&mut self, seq: u64) -> Option<Requester> {
        let pos = self.entries.iter().position(|r| r.seq == seq)?;
        self.entries.remove(pos)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Requester> {
        self.entries.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for RequesterQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequesterQueue")
            .field("len", &self.entries.len())
            .finish_non_exhaustive()
    }
}
