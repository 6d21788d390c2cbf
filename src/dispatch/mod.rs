//! The dispatcher: submission, promotion, and release.
//!
//! The dispatcher mediates every access of a task to its handles. On
//! submission it walks the task's normalized buffer list in order; each
//! non-arbitered buffer is either granted on the spot or parked on the
//! handle's requester queue, and the walk resumes from the same position
//! when a release promotes the parked requester. The arbitered tail is
//! handed to the arbiters group by group. Once the last buffer is granted
//! the task is pushed to the scheduling policy.
//!
//! On completion the references are released one handle at a time (never
//! two header locks at once); every release collects the promotions it
//! unlocks and fulfills them after the lock is dropped, so `push_ready`
//! always runs with no core lock held.
//!
//! The same machinery backs the synchronous user-side acquisition path:
//! a user acquisition is a callback requester flowing through the same
//! queues as task requesters.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{debug, error, trace};

use crate::data::arbiter::ArbiterOp;
use crate::data::handle::{AcquireOutcome, DataHandle, ReleaseOutcome};
use crate::data::reduction::{self, FlushDecision};
use crate::data::requester::{Requester, RequesterPayload};
use crate::error::{Error, ErrorKind, Result};
use crate::metrics::CoreMetrics;
use crate::policy::SchedPolicy;
use crate::task::{Job, ReadyTask, Task, TaskState};
use crate::types::{AccessKind, AccessMode, TaskId};
use crate::worker::ReadySignal;

/// The dependency core's dispatch engine.
///
/// Owns no policy state: ready tasks are handed to the pluggable
/// [`SchedPolicy`] and popped by workers.
pub struct Dispatcher {
    policy: Arc<dyn SchedPolicy>,
    metrics: Arc<CoreMetrics>,
    ready_signal: Arc<ReadySignal>,
}

impl Dispatcher {
    /// Creates a dispatcher over `policy`.
    #[must_use]
    pub fn new(policy: Arc<dyn SchedPolicy>) -> Self {
        Self {
            policy,
            metrics: Arc::new(CoreMetrics::new()),
            ready_signal: Arc::new(ReadySignal::new()),
        }
    }

    /// The dispatch counters.
    #[must_use]
    pub fn metrics(&self) -> &CoreMetrics {
        &self.metrics
    }

    /// Signal workers park on while the policy is empty.
    pub(crate) fn ready_signal(&self) -> &Arc<ReadySignal> {
        &self.ready_signal
    }

    // ------------------------------------------------------------------
    // Task path
    // ------------------------------------------------------------------

    /// Submits a task.
    ///
    /// Returns once the task is queued; readiness and completion happen
    /// asynchronously. A task whose modes cannot be honored is rejected
    /// here and leaves no trace in any queue.
    pub fn submit(&self, task: Task) -> Result<TaskId> {
        let job = Job::from_task(task)?;
        let id = job.id;
        self.metrics.tasks_submitted.increment();
        debug!(task = %id, buffers = job.buffers.len(), "task submitted");
        self.continue_acquire(job, 0);
        Ok(id)
    }

    /// Walks the buffer list from `start`, granting or parking.
    ///
    /// Also the continuation target after a promotion: the promoted buffer
    /// is granted by the releaser and the walk resumes right behind it.
    pub(crate) fn continue_acquire(&self, job: Arc<Job>, start: usize) {
        let mut index = start;
        while index < job.non_arbitered {
            let handle = Arc::clone(&job.buffers[index].handle);
            let req = Requester::for_job(&job, index);
            match handle.acquire_or_enqueue(req) {
                AcquireOutcome::Granted(_) => {
                    job.grant_one();
                    trace!(task = %job.id, handle = %handle.id(), "buffer granted");
                    index += 1;
                }
                AcquireOutcome::Parked { inject_combine } => {
                    job.mark_waiting();
                    self.metrics.requesters_parked.increment();
                    trace!(task = %job.id, handle = %handle.id(), "buffer parked");
                    if inject_combine {
                        self.inject_combine(&handle);
                    }
                    return;
                }
            }
        }

        if index < job.buffers.len() {
            let arbiter = Arc::clone(
                job.buffers[index]
                    .handle
                    .arbiter()
                    .expect("buffers past the prefix are arbitered"),
            );
            arbiter.run(self, ArbiterOp::Submit { job, start: index });
        } else {
            self.make_ready(job);
        }
    }

    /// Marks a task ready and hands it to the policy. No lock is held.
    pub(crate) fn make_ready(&self, job: Arc<Job>) {
        debug_assert_eq!(job.unmet(), 0);
        if !job.was_parked() {
            self.metrics.tasks_ready_immediate.increment();
        }
        job.mark_ready();
        debug!(task = %job.id, "task ready");
        self.policy.push_ready(ReadyTask { job });
        self.ready_signal.notify();
    }

    /// Fulfills a promoted requester: resumes the task's walk or invokes
    /// the user callback. Called with no lock held.
    pub(crate) fn fulfill(&self, req: Requester) {
        match req.payload {
            RequesterPayload::Task { job, buf_index } => {
                job.grant_one();
                self.continue_acquire(job, buf_index + 1);
            }
            RequesterPayload::Callback(f) => f(),
        }
    }

    /// Executes a ready task on the calling thread, then completes it.
    ///
    /// A panicking kernel is contained: the task's references are released
    /// as if it had finished, and error reporting is left to the caller's
    /// completion hook.
    pub fn execute(&self, task: ReadyTask) {
        let job = task.job;
        job.mark_running();
        trace!(task = %job.id, "task running");
        if let Some(kernel) = job.take_kernel() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(kernel));
            if outcome.is_err() {
                error!(task = %job.id, "task kernel panicked; releasing references");
            }
        }
        self.complete_job(&job);
    }

    /// Completes a task that was executed outside [`execute`](Self::execute).
    pub fn complete(&self, task: ReadyTask) {
        let job = task.job;
        if job.state() == TaskState::Ready {
            job.mark_running();
        }
        self.complete_job(&job);
    }

    fn complete_job(&self, job: &Arc<Job>) {
        for buffer in &job.buffers {
            self.release_reference(&buffer.handle, buffer.mode, job.combine);
        }
        job.mark_done();
        self.metrics.tasks_completed.increment();
        debug!(task = %job.id, "task complete");
        if let Some(hook) = job.take_on_complete() {
            hook();
        }
    }

    /// Releases one reference and performs the resulting promotions.
    fn release_reference(&self, handle: &Arc<DataHandle>, mode: AccessMode, combine: bool) {
        match handle.release_one(mode, combine) {
            ReleaseOutcome::Arbitered(arbiter) => {
                arbiter.run(
                    self,
                    ArbiterOp::Notify {
                        handle: Arc::clone(handle),
                    },
                );
            }
            ReleaseOutcome::Promoted(promoted) => {
                let count = promoted.len() as u64;
                if count > 0 {
                    self.metrics.promotions.add(count);
                    if count > 1 {
                        self.metrics.cohort_promotions.increment();
                    }
                    trace!(handle = %handle.id(), promoted = count, "release promoted requesters");
                }
                for req in promoted {
                    self.fulfill(req);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // User-side acquisition
    // ------------------------------------------------------------------

    /// Acquires `handle` synchronously, blocking the calling thread until
    /// the access is granted. The returned guard releases on drop.
    pub fn acquire(&self, handle: &Arc<DataHandle>, mode: AccessMode) -> Result<AcquireGuard<'_>> {
        let waiter = Arc::new(SyncWaiter::default());
        let signal = Arc::clone(&waiter);
        self.acquire_cb(handle, mode, move || signal.notify())?;
        waiter.wait();
        Ok(AcquireGuard {
            dispatcher: self,
            handle: Arc::clone(handle),
            mode,
            released: false,
        })
    }

    /// Acquires `handle` asynchronously: `granted` is invoked once the
    /// access is taken — inline when the handle is free, from the
    /// releasing thread otherwise. The callback side must eventually call
    /// [`release`](Self::release) with the same mode.
    pub fn acquire_cb(
        &self,
        handle: &Arc<DataHandle>,
        mode: AccessMode,
        granted: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        if mode.kind() == AccessKind::None {
            return Err(Error::for_handle(ErrorKind::InvalidMode, handle.id()));
        }
        if mode.kind() == AccessKind::Redux {
            if handle.arbiter().is_some() {
                return Err(Error::for_handle(
                    ErrorKind::ReduxOnArbiteredHandle,
                    handle.id(),
                ));
            }
            if !handle.has_combiner() {
                return Err(Error::for_handle(
                    ErrorKind::ReduxWithoutCombiner,
                    handle.id(),
                ));
            }
        }

        self.metrics.user_acquisitions.increment();
        let req = Requester::for_callback(mode, Box::new(granted));

        if let Some(arbiter) = handle.arbiter() {
            let arbiter = Arc::clone(arbiter);
            arbiter.run(
                self,
                ArbiterOp::AcquireCb {
                    handle: Arc::clone(handle),
                    req,
                },
            );
            return Ok(());
        }

        match handle.acquire_or_enqueue(req) {
            AcquireOutcome::Granted(req) => {
                if let RequesterPayload::Callback(f) = req.payload {
                    f();
                }
                Ok(())
            }
            AcquireOutcome::Parked { inject_combine } => {
                self.metrics.requesters_parked.increment();
                if inject_combine {
                    self.inject_combine(handle);
                }
                Ok(())
            }
        }
    }

    /// Releases a user-side acquisition. `mode` must be the mode the
    /// access was granted under.
    pub fn release(&self, handle: &Arc<DataHandle>, mode: AccessMode) {
        self.release_reference(handle, mode, false);
    }

    // ------------------------------------------------------------------
    // Reductions
    // ------------------------------------------------------------------

    /// Injects the combine task for `handle` if reduction work is
    /// outstanding. Returns whether a combine task was injected.
    pub fn redux_flush(&self, handle: &Arc<DataHandle>) -> Result<bool> {
        if handle.arbiter().is_some() {
            return Err(Error::for_handle(
                ErrorKind::ReduxOnArbiteredHandle,
                handle.id(),
            ));
        }
        match handle.arm_flush() {
            FlushDecision::Armed => {
                self.inject_combine(handle);
                Ok(true)
            }
            FlushDecision::AlreadyArmed | FlushDecision::Idle => Ok(false),
        }
    }

    /// Builds the combine task and squeezes it ahead of parked requesters.
    fn inject_combine(&self, handle: &Arc<DataHandle>) {
        self.metrics.combine_injections.increment();
        let job = reduction::combine_job(handle);
        debug!(task = %job.id, handle = %handle.id(), "reduction combine injected");
        let req = Requester::for_job(&job, 0);
        match handle.grant_front_or_enqueue(req) {
            AcquireOutcome::Granted(_) => {
                job.grant_one();
                self.make_ready(job);
            }
            AcquireOutcome::Parked { .. } => {
                job.mark_waiting();
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

/// Blocks a thread until its callback requester is granted.
#[derive(Default)]
struct SyncWaiter {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl SyncWaiter {
    fn notify(&self) {
        let mut granted = self.granted.lock();
        *granted = true;
        self.cv.notify_one();
    }

    fn wait(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cv.wait(&mut granted);
        }
    }
}

/// RAII guard for a synchronous user-side acquisition.
#[must_use = "dropping the guard releases the access"]
pub struct AcquireGuard<'a> {
    dispatcher: &'a Dispatcher,
    handle: Arc<DataHandle>,
    mode: AccessMode,
    released: bool,
}

impl AcquireGuard<'_> {
    /// The acquired handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<DataHandle> {
        &self.handle
    }

    /// The mode the access was granted under.
    #[must_use]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Releases the access now instead of at scope end.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.dispatcher.release(&self.handle, self.mode);
        }
    }
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
