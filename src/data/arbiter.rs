//! Centralized arbiter for groups of handles.
//!
//! Strict pairwise ordering serializes any two tasks that touch two shared
//! handles even when they conflict on none in common. The arbiter solves
//! this dining-philosophers instance with a centralized mediator: a task
//! tries to take *all* handles of a group at once under the arbiter's
//! exclusion, and either gets every one of them or parks on every one of
//! them. A release wakes the arbiter, which scans the released handle's
//! queue in FIFO order and dispatches the first task whose whole group is
//! free — a waiting task may leap ahead of an earlier one whose *other*
//! handles are busy, which is the opportunistic win.
//!
//! # Exclusion domains
//!
//! Every operation on an arbiter's handles runs under that arbiter's
//! exclusion. Two interchangeable domains implement it:
//!
//! - a plain mutex, taken for the duration of the operation;
//! - a *delegation list*: a thread that finds the arbiter busy appends its
//!   operation and returns, and whichever thread currently works the list
//!   drains it before finishing. This trades latency under contention for
//!   never blocking a worker on the arbiter.
//!
//! The operation bodies are written once and know nothing about which
//! domain runs them.
//!
//! # Lock ordering
//!
//! The exclusion is entered before any header lock of the group's handles,
//! header locks are taken one at a time, and the exclusion is released
//! before the scheduler policy or a continuation runs.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::trace;

use crate::data::handle::DataHandle;
use crate::data::requester::Requester;
use crate::dispatch::Dispatcher;
use crate::task::Job;
use crate::types::ArbiterId;

/// A mediator that lets tasks atomically acquire a set of handles.
pub struct Arbiter {
    id: ArbiterId,
    excl: Exclusion,
}

enum Exclusion {
    Mutex(Mutex<()>),
    Delegation(Mutex<DelegationState>),
}

struct DelegationState {
    /// True while some thread is draining the backlog.
    working: bool,
    backlog: VecDeque<ArbiterOp>,
}

/// An operation to run under the arbiter's exclusion.
pub(crate) enum ArbiterOp {
    /// Continue a task's acquisition at its first buffer of this group.
    Submit { job: Arc<Job>, start: usize },
    /// A reference on `handle` was released; try to dispatch a waiter.
    Notify { handle: Arc<DataHandle> },
    /// User-side acquisition of a single arbitered handle.
    AcquireCb {
        handle: Arc<DataHandle>,
        req: Requester,
    },
}

/// Work to perform after the exclusion is released.
enum Followup {
    Ready(Arc<Job>),
    NextGroup(Arc<Job>, usize),
    Invoke(Requester),
}

impl Arbiter {
    /// Creates an arbiter whose exclusion is a plain mutex.
    #[must_use]
    pub fn create() -> Arc<Self> {
        Arc::new(Self {
            id: ArbiterId::allocate(),
            excl: Exclusion::Mutex(Mutex::new(())),
        })
    }

    /// Creates an arbiter using the congestion delegation list.
    #[must_use]
    pub fn create_delegating() -> Arc<Self> {
        Arc::new(Self {
            id: ArbiterId::allocate(),
            excl: Exclusion::Delegation(Mutex::new(DelegationState {
                working: false,
                backlog: VecDeque::new(),
            })),
        })
    }

    /// The arbiter's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ArbiterId {
        self.id
    }

    /// Destroys an arbiter.
    ///
    /// # Panics
    ///
    /// Panics if any handle (or other holder) still references the
    /// arbiter: destroying a live arbiter is a contract violation.
    pub fn destroy(arbiter: Arc<Self>) {
        assert_eq!(
            Arc::strong_count(&arbiter),
            1,
            "arbiter {} destroyed while still referenced",
            arbiter.id
        );
        drop(arbiter);
    }

    /// Runs `op` under this arbiter's exclusion domain.
    pub(crate) fn run(&self, dispatcher: &Dispatcher, op: ArbiterOp) {
        match &self.excl {
            Exclusion::Mutex(mutex) => {
                let guard = mutex.lock();
                let followup = self.execute(dispatcher, op);
                drop(guard);
                if let Some(followup) = followup {
                    Self::follow_up(dispatcher, followup);
                }
            }
            Exclusion::Delegation(state) => self.post_or_perform(dispatcher, op, state),
        }
    }

    /// Delegation-list variant of [`run`](Self::run).
    ///
    /// Appends the operation when another thread is already working the
    /// list; otherwise becomes the working thread and drains everything
    /// that accumulates until the list is empty.
    fn post_or_perform(
        &self,
        dispatcher: &Dispatcher,
        op: ArbiterOp,
        state: &Mutex<DelegationState>,
    ) {
        {
            let mut s = state.lock();
            if s.working {
                s.backlog.push_back(op);
                return;
            }
            s.working = true;
        }

        let mut next = Some(op);
        while let Some(op) = next {
            let followup = self.execute(dispatcher, op);
            if let Some(followup) = followup {
                Self::follow_up(dispatcher, followup);
            }
            let mut s = state.lock();
            next = s.backlog.pop_front();
            if next.is_none() {
                s.working = false;
            }
        }
    }

    /// Executes one operation. Caller holds the exclusion.
    fn execute(&self, dispatcher: &Dispatcher, op: ArbiterOp) -> Option<Followup> {
        match op {
            ArbiterOp::Submit { job, start } => self.try_acquire_group(dispatcher, job, start),
            ArbiterOp::Notify { handle } => self.notify_scan(dispatcher, &handle),
            ArbiterOp::AcquireCb { handle, req } => {
                if handle.try_take_new(req.mode) {
                    Some(Followup::Invoke(req))
                } else {
                    handle.enqueue_arbitered(req);
                    None
                }
            }
        }
    }

    /// Index one past the last buffer of `job` governed by this arbiter,
    /// starting the scan at `start`.
    fn group_end(&self, job: &Job, start: usize) -> usize {
        let mut end = start;
        while end < job.buffers.len() && job.buffers[end].handle.arbiter_id() == Some(self.id) {
            end += 1;
        }
        end
    }

    /// Tries to take every handle of the group at once; parks on all of
    /// them otherwise.
    fn try_acquire_group(
        &self,
        dispatcher: &Dispatcher,
        job: Arc<Job>,
        start: usize,
    ) -> Option<Followup> {
        debug_assert_eq!(job.buffers[start].handle.arbiter_id(), Some(self.id));
        let end = self.group_end(&job, start);

        let mut taken = start;
        while taken < end {
            let buffer = &job.buffers[taken];
            if buffer.handle.try_take_new(buffer.mode) {
                taken += 1;
            } else {
                break;
            }
        }

        if taken == end {
            for _ in start..end {
                job.grant_one();
            }
            dispatcher.metrics().arbiter_grants.increment();
            trace!(task = %job.id, arbiter = %self.id, "arbiter group granted");
            return Some(if end < job.buffers.len() {
                Followup::NextGroup(job, end)
            } else {
                Followup::Ready(job)
            });
        }

        // One handle was busy: drop what we took and park on the whole
        // group so any release can find us.
        for i in start..taken {
            job.buffers[i].handle.undo_take_new();
        }
        for i in start..end {
            job.buffers[i]
                .handle
                .enqueue_arbitered(Requester::for_job(&job, i));
        }
        job.mark_waiting();
        dispatcher.metrics().arbiter_parks.increment();
        trace!(task = %job.id, arbiter = %self.id, "arbiter group busy, task parked");
        None
    }

    /// FIFO scan of the released handle's queue; dispatches at most one
    /// task to bound the exclusion's critical section.
    fn notify_scan(&self, dispatcher: &Dispatcher, handle: &Arc<DataHandle>) -> Option<Followup> {
        for candidate in handle.arbiter_candidates() {
            match candidate.job {
                Some(job) => {
                    let start = job
                        .buffers
                        .iter()
                        .position(|b| b.handle.arbiter_id() == Some(self.id))
                        .expect("queued task has no buffer in this arbiter");
                    let end = self.group_end(&job, start);

                    let mut taken = start;
                    while taken < end {
                        let buffer = &job.buffers[taken];
                        if buffer.handle.try_take_convert(buffer.mode) {
                            taken += 1;
                        } else {
                            break;
                        }
                    }
                    if taken < end {
                        for i in start..taken {
                            job.buffers[i].handle.undo_take_convert();
                        }
                        continue;
                    }

                    for i in start..end {
                        let removed = job.buffers[i].handle.remove_arbitered_task(job.id);
                        debug_assert!(removed, "promoted task missing from a sibling queue");
                    }
                    for _ in start..end {
                        job.grant_one();
                    }
                    dispatcher.metrics().arbiter_promotions.increment();
                    trace!(task = %job.id, arbiter = %self.id, "arbiter promoted waiting task");
                    return Some(if end < job.buffers.len() {
                        Followup::NextGroup(job, end)
                    } else {
                        Followup::Ready(job)
                    });
                }
                None => {
                    if handle.try_take_convert(candidate.mode) {
                        let req = handle
                            .remove_arbitered_seq(candidate.seq)
                            .expect("candidate left the queue under exclusion");
                        dispatcher.metrics().arbiter_promotions.increment();
                        return Some(Followup::Invoke(req));
                    }
                }
            }
        }
        None
    }

    /// Runs deferred work with the exclusion released.
    fn follow_up(dispatcher: &Dispatcher, followup: Followup) {
        match followup {
            Followup::Ready(job) => dispatcher.make_ready(job),
            Followup::NextGroup(job, index) => dispatcher.continue_acquire(job, index),
            Followup::Invoke(req) => dispatcher.fulfill(req),
        }
    }
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let domain = match &self.excl {
            Exclusion::Mutex(_) => "mutex",
            Exclusion::Delegation(_) => "delegation",
        };
        f.debug_struct("Arbiter")
            .field("id", &self.id)
            .field("exclusion", &domain)
            .finish()
    }
}
