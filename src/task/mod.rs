//! Task descriptors and the task state machine.
//!
//! A [`Task`] is built by the submitter: an ordered set of buffer accesses,
//! an optional kernel to run, and an optional completion hook. At
//! submission the buffer list is *normalized*: duplicates on one handle are
//! collapsed to a single access with the joined mode, non-arbitered handles
//! are moved ahead of arbitered ones, arbitered handles are grouped by
//! arbiter, and within each region handles follow their registration order.
//! That total order is what makes the sequential acquisition walk
//! deadlock-free.
//!
//! Internally a submitted task becomes a [`Job`]: the normalized list plus
//! the readiness counter and the state machine
//! `Submitted → Waiting/Ready → Running → Done`.

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::data::DataHandle;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{AccessKind, AccessMode, TaskId};

/// Work to run on a worker thread.
pub type Kernel = Box<dyn FnOnce() + Send>;

/// One access of a task to one handle.
pub(crate) struct BufferAccess {
    pub(crate) handle: Arc<DataHandle>,
    pub(crate) mode: AccessMode,
}

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Accepted, acquisition not finished.
    Submitted = 0,
    /// At least one buffer is parked on a requester queue.
    Waiting = 1,
    /// Every buffer is granted; the task sits in the policy.
    Ready = 2,
    /// A worker is executing the kernel.
    Running = 3,
    /// Terminal. References are released, callbacks have run.
    Done = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Submitted,
            1 => Self::Waiting,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Done,
            _ => unreachable!("invalid task state {value}"),
        }
    }
}

/// A task under construction.
///
/// ```
/// use stardep::data::{DataHandle, DataLayout};
/// use stardep::task::Task;
/// use stardep::types::AccessMode;
///
/// let h = DataHandle::register(DataLayout::bytes(64));
/// let task = Task::new()
///     .named("axpy")
///     .buffer(&h, AccessMode::read_write())
///     .kernel(|| { /* compute */ });
/// # drop(task);
/// ```
#[must_use = "a task does nothing until it is submitted"]
#[derive(Default)]
pub struct Task {
    name: Option<String>,
    buffers: Vec<(Arc<DataHandle>, AccessMode)>,
    kernel: Option<Kernel>,
    on_complete: Option<Box<dyn FnOnce() + Send>>,
}

impl Task {
    /// Creates an empty task.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a debug name, used in log output.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a buffer access. Duplicate handles are collapsed at submission.
    pub fn buffer(mut self, handle: &Arc<DataHandle>, mode: AccessMode) -> Self {
        self.buffers.push((Arc::clone(handle), mode));
        self
    }

    /// Sets the kernel to execute. Tasks without a kernel are no-ops with
    /// dependency effects only.
    pub fn kernel(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.kernel = Some(Box::new(f));
        self
    }

    /// Sets a hook invoked after the task's references are released.
    pub fn on_complete(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("buffers", &self.buffers.len())
            .finish_non_exhaustive()
    }
}

/// The dispatcher's view of a submitted task.
pub(crate) struct Job {
    pub(crate) id: TaskId,
    pub(crate) name: Option<String>,
    /// Normalized buffer list: deduplicated, non-arbitered first, arbitered
    /// grouped by arbiter, registration order within each region.
    pub(crate) buffers: SmallVec<[BufferAccess; 4]>,
    /// Length of the non-arbitered prefix.
    pub(crate) non_arbitered: usize,
    /// Set for the reduction combine task.
    pub(crate) combine: bool,
    /// Buffers not yet granted.
    unmet: AtomicU32,
    state: AtomicU8,
    was_parked: AtomicBool,
    kernel: Mutex<Option<Kernel>>,
    on_complete: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Job {
    /// Validates and normalizes `task` into a job.
    pub(crate) fn from_task(task: Task) -> Result<Arc<Self>> {
        let id = TaskId::allocate();
        let (buffers, non_arbitered) = normalize(id, task.buffers)?;
        let unmet = u32::try_from(buffers.len()).expect("buffer count fits in u32");
        Ok(Arc::new(Self {
            id,
            name: task.name,
            buffers,
            non_arbitered,
            combine: false,
            unmet: AtomicU32::new(unmet),
            state: AtomicU8::new(TaskState::Submitted as u8),
            was_parked: AtomicBool::new(false),
            kernel: Mutex::new(task.kernel),
            on_complete: Mutex::new(task.on_complete),
        }))
    }

    /// Builds the reduction combine job for `handle`.
    pub(crate) fn new_combine(handle: Arc<DataHandle>, mode: AccessMode, kernel: Kernel) -> Arc<Self> {
        let non_arbitered = usize::from(handle.arbiter_id().is_none());
        Arc::new(Self {
            id: TaskId::allocate(),
            name: Some("redux-combine".to_owned()),
            buffers: SmallVec::from_iter([BufferAccess { handle, mode }]),
            non_arbitered,
            combine: true,
            unmet: AtomicU32::new(1),
            state: AtomicU8::new(TaskState::Submitted as u8),
            was_parked: AtomicBool::new(false),
            kernel: Mutex::new(Some(kernel)),
            on_complete: Mutex::new(None),
        })
    }

    /// Number of buffers not yet granted.
    pub(crate) fn unmet(&self) -> u32 {
        self.unmet.load(Ordering::Acquire)
    }

    /// Records one granted buffer; returns the remaining count.
    pub(crate) fn grant_one(&self) -> u32 {
        let previous = self.unmet.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "task {} granted more buffers than it has", self.id);
        previous - 1
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_waiting(&self) {
        let old = self.state.swap(TaskState::Waiting as u8, Ordering::AcqRel);
        debug_assert!(
            old == TaskState::Submitted as u8 || old == TaskState::Waiting as u8,
            "task {} parked from state {old}",
            self.id
        );
        self.was_parked.store(true, Ordering::Release);
    }

    pub(crate) fn mark_ready(&self) {
        debug_assert_eq!(self.unmet(), 0, "task {} ready with ungranted buffers", self.id);
        let old = self.state.swap(TaskState::Ready as u8, Ordering::AcqRel);
        debug_assert!(
            old == TaskState::Submitted as u8 || old == TaskState::Waiting as u8,
            "task {} became ready from state {old}",
            self.id
        );
    }

    pub(crate) fn mark_running(&self) {
        let old = self.state.swap(TaskState::Running as u8, Ordering::AcqRel);
        debug_assert_eq!(old, TaskState::Ready as u8, "task {} ran from state {old}", self.id);
    }

    pub(crate) fn mark_done(&self) {
        let old = self.state.swap(TaskState::Done as u8, Ordering::AcqRel);
        debug_assert!(
            old == TaskState::Ready as u8 || old == TaskState::Running as u8,
            "task {} completed from state {old}",
            self.id
        );
    }

    pub(crate) fn was_parked(&self) -> bool {
        self.was_parked.load(Ordering::Acquire)
    }

    pub(crate) fn take_kernel(&self) -> Option<Kernel> {
        self.kernel.lock().take()
    }

    pub(crate) fn take_on_complete(&self) -> Option<Box<dyn FnOnce() + Send>> {
        self.on_complete.lock().take()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("buffers", &self.buffers.len())
            .field("unmet", &self.unmet())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// A task handed to the scheduling policy and to workers.
///
/// Ownership is linear: the policy holds it from `push_ready` until a
/// worker pops it, and executing or completing it consumes it.
pub struct ReadyTask {
    pub(crate) job: Arc<Job>,
}

impl ReadyTask {
    /// The task's id.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.job.id
    }

    /// The task's debug name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.job.name.as_deref()
    }
}

impl std::fmt::Debug for ReadyTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyTask").field("id", &self.job.id).finish()
    }
}

/// Sorts and deduplicates a raw buffer list.
fn normalize(
    task: TaskId,
    raw: Vec<(Arc<DataHandle>, AccessMode)>,
) -> Result<(SmallVec<[BufferAccess; 4]>, usize)> {
    for (handle, mode) in &raw {
        if mode.kind() == AccessKind::None {
            return Err(Error::for_handle(ErrorKind::InvalidMode, handle.id()).with_task(task));
        }
        if mode.kind() == AccessKind::Redux {
            if handle.arbiter_id().is_some() {
                return Err(
                    Error::for_handle(ErrorKind::ReduxOnArbiteredHandle, handle.id()).with_task(task)
                );
            }
            if !handle.has_combiner() {
                return Err(
                    Error::for_handle(ErrorKind::ReduxWithoutCombiner, handle.id()).with_task(task)
                );
            }
        }
    }

    let mut list: Vec<BufferAccess> = raw
        .into_iter()
        .map(|(handle, mode)| BufferAccess { handle, mode })
        .collect();

    // Non-arbitered handles first, then arbitered grouped by arbiter, with
    // registration order as the stable tie-break everywhere.
    list.sort_by_key(|access| {
        let arbiter = access.handle.arbiter_id();
        (
            arbiter.is_some(),
            arbiter.map_or(0, crate::types::ArbiterId::as_u64),
            access.handle.id().as_u64(),
        )
    });

    let mut merged: SmallVec<[BufferAccess; 4]> = SmallVec::new();
    for access in list {
        match merged.last_mut() {
            Some(last) if last.handle.id() == access.handle.id() => {
                last.mode = last.mode.join(access.mode).ok_or_else(|| {
                    Error::for_handle(ErrorKind::ConflictingDuplicate, access.handle.id())
                        .with_task(task)
                })?;
            }
            _ => merged.push(access),
        }
    }

    let non_arbitered = merged
        .iter()
        .take_while(|access| access.handle.arbiter_id().is_none())
        .count();
    Ok((merged, non_arbitered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Arbiter, DataLayout};

    fn job_from(buffers: Vec<(Arc<DataHandle>, AccessMode)>) -> Result<Arc<Job>> {
        let mut task = Task::new();
        for (handle, mode) in buffers {
            task = task.buffer(&handle, mode);
        }
        Job::from_task(task)
    }

    #[test]
    fn zero_buffer_task_has_nothing_unmet() {
        let job = job_from(vec![]).unwrap();
        assert_eq!(job.unmet(), 0);
        assert_eq!(job.state(), TaskState::Submitted);
        assert_eq!(job.non_arbitered, 0);
    }

    #[test]
    fn duplicates_collapse_with_joined_mode() {
        let h = DataHandle::register(DataLayout::bytes(8));
        let job = job_from(vec![
            (Arc::clone(&h), AccessMode::read()),
            (Arc::clone(&h), AccessMode::write()),
        ])
        .unwrap();
        assert_eq!(job.buffers.len(), 1);
        assert_eq!(job.buffers[0].mode, AccessMode::read_write());
        assert_eq!(job.unmet(), 1);
    }

    #[test]
    fn conflicting_duplicates_are_rejected() {
        let h = DataHandle::register(DataLayout::bytes(8));
        let err = job_from(vec![
            (Arc::clone(&h), AccessMode::scratch()),
            (Arc::clone(&h), AccessMode::read()),
        ])
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConflictingDuplicate);
        assert_eq!(err.handle(), Some(h.id()));
    }

    #[test]
    fn none_mode_is_rejected() {
        let h = DataHandle::register(DataLayout::bytes(8));
        let err = job_from(vec![(h, AccessMode::none())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMode);
    }

    #[test]
    fn redux_requires_a_combiner() {
        let h = DataHandle::register(DataLayout::bytes(8));
        let err = job_from(vec![(Arc::clone(&h), AccessMode::redux())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReduxWithoutCombiner);

        h.set_reduction(Arc::new(|| {}));
        assert!(job_from(vec![(h, AccessMode::redux())]).is_ok());
    }

    #[test]
    fn redux_on_arbitered_handle_is_rejected() {
        let h = DataHandle::register(DataLayout::bytes(8));
        h.set_reduction(Arc::new(|| {}));
        let arbiter = Arbiter::create();
        h.assign_arbiter(&arbiter);
        let err = job_from(vec![(h, AccessMode::redux())]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReduxOnArbiteredHandle);
    }

    #[test]
    fn arbitered_handles_sort_after_plain_ones() {
        let arbiter = Arbiter::create();
        let arbitered = DataHandle::register(DataLayout::bytes(8));
        arbitered.assign_arbiter(&arbiter);
        let plain = DataHandle::register(DataLayout::bytes(8));

        let job = job_from(vec![
            (Arc::clone(&arbitered), AccessMode::write()),
            (Arc::clone(&plain), AccessMode::read()),
        ])
        .unwrap();
        assert_eq!(job.buffers[0].handle.id(), plain.id());
        assert_eq!(job.buffers[1].handle.id(), arbitered.id());
        assert_eq!(job.non_arbitered, 1);
    }

    #[test]
    fn plain_handles_follow_registration_order() {
        let a = DataHandle::register(DataLayout::bytes(8));
        let b = DataHandle::register(DataLayout::bytes(8));
        let job = job_from(vec![
            (Arc::clone(&b), AccessMode::write()),
            (Arc::clone(&a), AccessMode::write()),
        ])
        .unwrap();
        assert_eq!(job.buffers[0].handle.id(), a.id());
        assert_eq!(job.buffers[1].handle.id(), b.id());
    }

    #[test]
    fn arbitered_handles_group_by_arbiter() {
        let first = Arbiter::create();
        let second = Arbiter::create();
        let h1 = DataHandle::register(DataLayout::bytes(8));
        let h2 = DataHandle::register(DataLayout::bytes(8));
        let h3 = DataHandle::register(DataLayout::bytes(8));
        h1.assign_arbiter(&first);
        h2.assign_arbiter(&second);
        h3.assign_arbiter(&first);

        let job = job_from(vec![
            (Arc::clone(&h2), AccessMode::write()),
            (Arc::clone(&h3), AccessMode::write()),
            (Arc::clone(&h1), AccessMode::write()),
        ])
        .unwrap();
        let order: Vec<_> = job.buffers.iter().map(|b| b.handle.id()).collect();
        assert_eq!(order, vec![h1.id(), h3.id(), h2.id()]);
        assert_eq!(job.non_arbitered, 0);
    }

    #[test]
    fn state_machine_walks_forward() {
        let job = job_from(vec![]).unwrap();
        assert_eq!(job.state(), TaskState::Submitted);
        job.mark_ready();
        assert_eq!(job.state(), TaskState::Ready);
        job.mark_running();
        assert_eq!(job.state(), TaskState::Running);
        job.mark_done();
        assert_eq!(job.state(), TaskState::Done);
        assert!(!job.was_parked());
    }

    #[test]
    fn parking_is_remembered() {
        let h = DataHandle::register(DataLayout::bytes(8));
        let job = job_from(vec![(h, AccessMode::write())]).unwrap();
        job.mark_waiting();
        assert_eq!(job.state(), TaskState::Waiting);
        assert!(job.was_parked());
        job.grant_one();
        job.mark_ready();
        assert_eq!(job.state(), TaskState::Ready);
    }
}
