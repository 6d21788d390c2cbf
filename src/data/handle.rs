//! Data handles: the unit of dependency tracking.
//!
//! A handle carries the counters and the requester FIFO that serialize
//! conflicting accesses to one piece of data. All mutable state sits behind
//! a single fine-grained header lock; promotion work collected under the
//! lock is always handed back to the caller and performed after the lock is
//! dropped, so no handle ever holds two header locks and the policy is
//! never entered from inside one.
//!
//! # Counters
//!
//! - `ref_count`: active holders. While non-zero, `current_mode` is the
//!   join of every holder's mode and every holder is compatible with it.
//! - `busy_count`: active holders plus parked requesters. A handle is never
//!   destroyed while `busy_count > 0`; unregistration blocks on it.
//!
//! # Fairness
//!
//! A non-arbitered handle grants strictly in FIFO order, except that a run
//! of mutually compatible requesters at the head of the queue is promoted
//! as one cohort. Arbitered handles delegate promotion to their arbiter and
//! never use the local promotion loop.

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::{Arc, OnceLock};
use tracing::trace;

use crate::data::arbiter::Arbiter;
use crate::data::reduction::{CombineFn, FlushDecision, ReduxState};
use crate::data::requester::{Requester, RequesterPayload, RequesterQueue};
use crate::types::{AccessKind, AccessMode, ArbiterId, HandleId};

/// Shape of the data a handle stands for.
///
/// The dependency core never touches the bytes; the layout travels to the
/// executor and the data layer unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLayout {
    bytes: usize,
    home_node: u32,
}

impl DataLayout {
    /// A flat buffer of `bytes` bytes homed on node 0.
    #[must_use]
    pub const fn bytes(bytes: usize) -> Self {
        Self {
            bytes,
            home_node: 0,
        }
    }

    /// Returns the same layout homed on `node`.
    #[must_use]
    pub const fn on_node(mut self, node: u32) -> Self {
        self.home_node = node;
        self
    }

    /// Size of the buffer in bytes.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes
    }

    /// True for zero-sized layouts.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    /// The memory node initially owning the data.
    #[inline]
    #[must_use]
    pub const fn home_node(&self) -> u32 {
        self.home_node
    }
}

pub(crate) struct HandleState {
    pub(crate) ref_count: u32,
    pub(crate) busy_count: u32,
    pub(crate) current_mode: AccessMode,
    pub(crate) queue: RequesterQueue,
    pub(crate) redux: ReduxState,
    pub(crate) retired: bool,
}

impl HandleState {
    fn new() -> Self {
        Self {
            ref_count: 0,
            busy_count: 0,
            current_mode: AccessMode::none(),
            queue: RequesterQueue::default(),
            redux: ReduxState::default(),
            retired: false,
        }
    }

    /// Grants one reference under `mode`, widening `current_mode`.
    fn grant(&mut self, mode: AccessMode) {
        if self.ref_count == 0 {
            self.current_mode = mode;
        } else {
            self.current_mode = self
                .current_mode
                .join(mode)
                .expect("granted mode must join the current mode");
        }
        self.ref_count += 1;
    }

    /// True while the reduction barrier keeps `req` out of the data.
    fn barrier_blocks(&self, req: &Requester) -> bool {
        self.redux.flush_pending() && !req.combine && req.mode.kind() != AccessKind::Redux
    }
}

/// Result of trying to acquire a non-arbitered handle.
pub(crate) enum AcquireOutcome {
    /// The reference was taken; the requester is handed back untouched so
    /// the caller can invoke its payload (or drop it).
    Granted(Requester),
    /// The requester was appended to the queue.
    Parked {
        /// The caller must inject the reduction combine task.
        inject_combine: bool,
    },
}

/// Result of releasing one reference.
pub(crate) enum ReleaseOutcome {
    /// The handle is arbitered; the caller must run the arbiter's notify.
    Arbitered(Arc<Arbiter>),
    /// Requesters promoted by this release, to be fulfilled lock-free.
    Promoted(SmallVec<[Requester; 2]>),
}

/// A queued arbitered requester, as seen by the arbiter's notify scan.
pub(crate) struct ArbiterCandidate {
    pub(crate) seq: u64,
    pub(crate) mode: AccessMode,
    pub(crate) job: Option<Arc<crate::task::Job>>,
}

/// Counters of one handle, for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleStats {
    /// Active holders.
    pub ref_count: u32,
    /// Active holders plus parked requesters.
    pub busy_count: u32,
    /// Parked requesters.
    pub queued: usize,
    /// Join of the holders' modes; `NONE` when idle.
    pub current_mode: AccessMode,
}

/// A dependency-tracked identifier for a data buffer.
pub struct DataHandle {
    id: HandleId,
    layout: DataLayout,
    state: Mutex<HandleState>,
    /// Signalled whenever `busy_count` returns to zero.
    idle: Condvar,
    arbiter: OnceLock<Arc<Arbiter>>,
}

impl DataHandle {
    /// Registers a new handle for data with the given layout.
    #[must_use]
    pub fn register(layout: DataLayout) -> Arc<Self> {
        let handle = Arc::new(Self {
            id: HandleId::allocate(),
            layout,
            state: Mutex::new(HandleState::new()),
            idle: Condvar::new(),
            arbiter: OnceLock::new(),
        });
        trace!(handle = %handle.id, bytes = layout.len(), "handle registered");
        handle
    }

    /// The handle's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// The layout given at registration.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        self.layout
    }

    /// The arbiter governing this handle, if any.
    #[must_use]
    pub fn arbiter(&self) -> Option<&Arc<Arbiter>> {
        self.arbiter.get()
    }

    /// The id of the governing arbiter, if any.
    #[must_use]
    pub fn arbiter_id(&self) -> Option<ArbiterId> {
        self.arbiter.get().map(|a| a.id())
    }

    /// Puts the handle under `arbiter`.
    ///
    /// # Panics
    ///
    /// Assigning an arbiter is only legal right after registration: the
    /// handle must have no holders, no parked requesters, and no previous
    /// arbiter. Violations are contract errors and abort.
    pub fn assign_arbiter(&self, arbiter: &Arc<Arbiter>) {
        {
            let state = self.state.lock();
            assert!(!state.retired, "assigning an arbiter to retired handle {}", self.id);
            assert!(
                state.ref_count == 0 && state.busy_count == 0 && state.queue.is_empty(),
                "arbiter can only be assigned to handle {} before first use",
                self.id
            );
        }
        assert!(
            self.arbiter.set(Arc::clone(arbiter)).is_ok(),
            "handle {} can only be assigned one arbiter",
            self.id
        );
        trace!(handle = %self.id, arbiter = %arbiter.id(), "arbiter assigned");
    }

    /// Registers the reduction combine function for this handle.
    pub fn set_reduction(&self, combiner: CombineFn) {
        let mut state = self.state.lock();
        assert!(!state.retired, "operation on retired handle {}", self.id);
        state.redux.set_combiner(combiner);
    }

    /// True if a combine function is registered.
    #[must_use]
    pub fn has_combiner(&self) -> bool {
        self.state.lock().redux.has_combiner()
    }

    pub(crate) fn combiner(&self) -> Option<CombineFn> {
        self.state.lock().redux.combiner()
    }

    /// Current counters, taken under the header lock.
    #[must_use]
    pub fn stats(&self) -> HandleStats {
        let state = self.state.lock();
        HandleStats {
            ref_count: state.ref_count,
            busy_count: state.busy_count,
            queued: state.queue.len(),
            current_mode: if state.ref_count == 0 {
                AccessMode::none()
            } else {
                state.current_mode
            },
        }
    }

    /// Blocks until `busy_count == 0`, then retires the handle.
    ///
    /// After this returns, every further operation on the handle is a
    /// contract violation. Safe to call while tasks are still in flight:
    /// the barrier drains as they complete.
    ///
    /// # Panics
    ///
    /// Panics if the handle is already retired.
    pub fn unregister(&self) {
        let mut state = self.state.lock();
        assert!(!state.retired, "handle {} unregistered twice", self.id);
        while state.busy_count > 0 {
            self.idle.wait(&mut state);
        }
        debug_assert_eq!(state.ref_count, 0);
        debug_assert!(state.queue.is_empty());
        state.retired = true;
        drop(state);
        trace!(handle = %self.id, "handle unregistered");
    }

    // ------------------------------------------------------------------
    // Dispatcher-facing primitives (non-arbitered path)
    // ------------------------------------------------------------------

    /// Takes a reference immediately or parks the requester.
    ///
    /// The immediate grant requires an empty queue (FIFO), a compatible or
    /// idle holder set, and an open reduction barrier.
    pub(crate) fn acquire_or_enqueue(&self, req: Requester) -> AcquireOutcome {
        debug_assert!(
            self.arbiter.get().is_none(),
            "arbitered handles acquire through their arbiter"
        );
        let mut state = self.state.lock();
        assert!(!state.retired, "operation on retired handle {}", self.id);

        let can_grant = state.queue.is_empty()
            && !state.barrier_blocks(&req)
            && (state.ref_count == 0 || req.mode.compatible(state.current_mode));
        if can_grant {
            state.grant(req.mode);
            state.busy_count += 1;
            return AcquireOutcome::Granted(req);
        }

        let live_redux = state.ref_count > 0 && state.current_mode.kind() == AccessKind::Redux;
        let inject_combine = !req.combine
            && req.mode.kind() != AccessKind::Redux
            && state.redux.has_combiner()
            && matches!(state.redux.arm_flush(live_redux), FlushDecision::Armed);
        state.queue.push_back(req);
        state.busy_count += 1;
        AcquireOutcome::Parked { inject_combine }
    }

    /// Grants or front-queues the reduction combine task's requester.
    ///
    /// The combine request may overtake parked requesters (that is the
    /// point of the barrier), so the empty-queue condition does not apply.
    pub(crate) fn grant_front_or_enqueue(&self, req: Requester) -> AcquireOutcome {
        debug_assert!(req.combine, "front insertion is reserved for combine tasks");
        let mut state = self.state.lock();
        assert!(!state.retired, "operation on retired handle {}", self.id);

        if state.ref_count == 0 || req.mode.compatible(state.current_mode) {
            state.grant(req.mode);
            state.busy_count += 1;
            return AcquireOutcome::Granted(req);
        }
        state.queue.push_front(req);
        state.busy_count += 1;
        AcquireOutcome::Parked {
            inject_combine: false,
        }
    }

    /// Releases one reference and collects the promotions it unlocks.
    ///
    /// `mode` is the mode the released holder was granted under; `combine`
    /// marks the release performed by the reduction combine task.
    pub(crate) fn release_one(&self, mode: AccessMode, combine: bool) -> ReleaseOutcome {
        let mut state = self.state.lock();
        assert!(
            state.ref_count > 0,
            "releasing handle {} that holds no reference",
            self.id
        );
        state.ref_count -= 1;
        state.busy_count -= 1;

        if combine {
            state.redux.combine_done();
        } else if mode.kind() == AccessKind::Redux {
            state.redux.add_contribution();
        }

        if let Some(arbiter) = self.arbiter.get() {
            let arbiter = Arc::clone(arbiter);
            if state.busy_count == 0 {
                self.idle.notify_all();
            }
            drop(state);
            return ReleaseOutcome::Arbitered(arbiter);
        }

        let mut promoted: SmallVec<[Requester; 2]> = SmallVec::new();
        if state.ref_count == 0 {
            state.current_mode = AccessMode::none();
        }
        while let Some(head) = state.queue.front() {
            if state.barrier_blocks(head) {
                break;
            }
            if state.ref_count > 0 && !head.mode.compatible(state.current_mode) {
                break;
            }
            let req = state.queue.pop_front().expect("queue head disappeared");
            state.grant(req.mode);
            promoted.push(req);
        }
        if state.busy_count == 0 {
            self.idle.notify_all();
        }
        drop(state);
        ReleaseOutcome::Promoted(promoted)
    }

    /// Arms a reduction flush outside the park path (explicit `redux_flush`).
    pub(crate) fn arm_flush(&self) -> FlushDecision {
        let mut state = self.state.lock();
        assert!(!state.retired, "operation on retired handle {}", self.id);
        if !state.redux.has_combiner() {
            return FlushDecision::Idle;
        }
        let live_redux = state.ref_count > 0 && state.current_mode.kind() == AccessKind::Redux;
        state.redux.arm_flush(live_redux)
    }

    // ------------------------------------------------------------------
    // Arbiter-facing primitives
    //
    // All of these are called with the owning arbiter's exclusion held,
    // which is what makes the snapshot in `arbiter_candidates` stable.
    // ------------------------------------------------------------------

    /// Fast-take for a fresh acquisition: succeeds only on an idle handle.
    pub(crate) fn try_take_new(&self, mode: AccessMode) -> bool {
        let mut state = self.state.lock();
        assert!(!state.retired, "operation on retired handle {}", self.id);
        if state.ref_count != 0 {
            return false;
        }
        state.ref_count = 1;
        state.busy_count += 1;
        state.current_mode = mode;
        true
    }

    /// Rolls back a [`try_take_new`](Self::try_take_new).
    pub(crate) fn undo_take_new(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.ref_count, 1);
        state.ref_count = 0;
        state.busy_count -= 1;
        state.current_mode = AccessMode::none();
        if state.busy_count == 0 {
            self.idle.notify_all();
        }
    }

    /// Fast-take that converts an already-queued requester into a holder:
    /// `busy_count` is unchanged because the requester already counted.
    pub(crate) fn try_take_convert(&self, mode: AccessMode) -> bool {
        let mut state = self.state.lock();
        if state.ref_count != 0 {
            return false;
        }
        state.ref_count = 1;
        state.current_mode = mode;
        true
    }

    /// Rolls back a [`try_take_convert`](Self::try_take_convert).
    pub(crate) fn undo_take_convert(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.ref_count, 1);
        state.ref_count = 0;
        state.current_mode = AccessMode::none();
    }

    /// Parks a requester on an arbitered handle.
    pub(crate) fn enqueue_arbitered(&self, req: Requester) {
        let mut state = self.state.lock();
        assert!(!state.retired, "operation on retired handle {}", self.id);
        state.queue.push_back(req);
        state.busy_count += 1;
    }

    /// Removes the queued requester of `task`; true if one was removed.
    pub(crate) fn remove_arbitered_task(&self, task: crate::types::TaskId) -> bool {
        let mut state = self.state.lock();
        state.queue.remove_task(task).is_some()
    }

    /// Removes a queued requester by queue identity, returning its payload.
    pub(crate) fn remove_arbitered_seq(&self, seq: u64) -> Option<Requester> {
        let mut state = self.state.lock();
        state.queue.remove_seq(seq)
    }

    /// Snapshot of the queued requesters, in FIFO order.
    pub(crate) fn arbiter_candidates(&self) -> SmallVec<[ArbiterCandidate; 4]> {
        let state = self.state.lock();
        state
            .queue
            .iter()
            .map(|req| ArbiterCandidate {
                seq: req.seq,
                mode: req.mode,
                job: match &req.payload {
                    RequesterPayload::Task { job, .. } => Some(Arc::clone(job)),
                    RequesterPayload::Callback(_) => None,
                },
            })
            .collect()
    }
}

impl std::fmt::Debug for DataHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("DataHandle")
            .field("id", &self.id)
            .field("ref_count", &stats.ref_count)
            .field("busy_count", &stats.busy_count)
            .field("queued", &stats.queued)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn callback_req(mode: AccessMode) -> Requester {
        Requester::for_callback(mode, Box::new(|| {}))
    }

    fn flagged_req(mode: AccessMode, flag: &Arc<AtomicBool>) -> Requester {
        let flag = Arc::clone(flag);
        Requester::for_callback(mode, Box::new(move || flag.store(true, Ordering::Release)))
    }

    fn release_promotions(handle: &DataHandle, mode: AccessMode) -> SmallVec<[Requester; 2]> {
        match handle.release_one(mode, false) {
            ReleaseOutcome::Promoted(list) => list,
            ReleaseOutcome::Arbitered(_) => panic!("handle is not arbitered"),
        }
    }

    #[test]
    fn acquire_release_restores_idle_state() {
        let handle = DataHandle::register(DataLayout::bytes(64));
        let before = handle.stats();

        let outcome = handle.acquire_or_enqueue(callback_req(AccessMode::read()));
        assert!(matches!(outcome, AcquireOutcome::Granted(_)));
        assert_eq!(handle.stats().ref_count, 1);
        assert_eq!(handle.stats().busy_count, 1);

        let promoted = release_promotions(&handle, AccessMode::read());
        assert!(promoted.is_empty());
        assert_eq!(handle.stats(), before);
    }

    #[test]
    fn readers_share_and_writer_parks() {
        let handle = DataHandle::register(DataLayout::bytes(64));

        for _ in 0..3 {
            assert!(matches!(
                handle.acquire_or_enqueue(callback_req(AccessMode::read())),
                AcquireOutcome::Granted(_)
            ));
        }
        assert_eq!(handle.stats().ref_count, 3);

        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Parked { .. }
        ));
        assert_eq!(handle.stats().busy_count, 4);
        assert_eq!(handle.stats().queued, 1);
    }

    #[test]
    fn fifo_blocks_compatible_request_behind_parked_writer() {
        // A reader arriving behind a parked writer must wait even though it
        // is compatible with the current reader cohort.
        let handle = DataHandle::register(DataLayout::bytes(8));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::read())),
            AcquireOutcome::Granted(_)
        ));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Parked { .. }
        ));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::read())),
            AcquireOutcome::Parked { .. }
        ));
        assert_eq!(handle.stats().queued, 2);
    }

    #[test]
    fn release_promotes_writer_then_reader_cohort() {
        let handle = DataHandle::register(DataLayout::bytes(8));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Granted(_)
        ));
        for _ in 0..2 {
            assert!(matches!(
                handle.acquire_or_enqueue(callback_req(AccessMode::read())),
                AcquireOutcome::Parked { .. }
            ));
        }

        // Releasing the writer promotes both readers as one cohort.
        let promoted = release_promotions(&handle, AccessMode::write());
        assert_eq!(promoted.len(), 2);
        let stats = handle.stats();
        assert_eq!(stats.ref_count, 2);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.current_mode, AccessMode::read());
    }

    #[test]
    fn cohort_stops_at_first_incompatible_requester() {
        let handle = DataHandle::register(DataLayout::bytes(8));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Granted(_)
        ));
        for mode in [AccessMode::read(), AccessMode::write(), AccessMode::read()] {
            assert!(matches!(
                handle.acquire_or_enqueue(callback_req(mode)),
                AcquireOutcome::Parked { .. }
            ));
        }

        let promoted = release_promotions(&handle, AccessMode::write());
        assert_eq!(promoted.len(), 1, "only the first reader may pass");
        assert_eq!(handle.stats().queued, 2);
    }

    #[test]
    fn promoted_callbacks_fire_when_fulfilled() {
        let handle = DataHandle::register(DataLayout::bytes(8));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Granted(_)
        ));

        let fired = Arc::new(AtomicBool::new(false));
        assert!(matches!(
            handle.acquire_or_enqueue(flagged_req(AccessMode::read(), &fired)),
            AcquireOutcome::Parked { .. }
        ));

        let promoted = release_promotions(&handle, AccessMode::write());
        for req in promoted {
            match req.payload {
                RequesterPayload::Callback(f) => f(),
                RequesterPayload::Task { .. } => panic!("unexpected task requester"),
            }
        }
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn commute_cohort_promotes_together() {
        let handle = DataHandle::register(DataLayout::bytes(8));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Granted(_)
        ));
        for _ in 0..4 {
            assert!(matches!(
                handle.acquire_or_enqueue(callback_req(AccessMode::write().commute())),
                AcquireOutcome::Parked { .. }
            ));
        }

        let promoted = release_promotions(&handle, AccessMode::write());
        assert_eq!(promoted.len(), 4);
        assert_eq!(handle.stats().ref_count, 4);
    }

    #[test]
    fn unregister_blocks_until_idle() {
        let handle = DataHandle::register(DataLayout::bytes(8));
        assert!(matches!(
            handle.acquire_or_enqueue(callback_req(AccessMode::write())),
            AcquireOutcome::Granted(_)
        ));

        let done = Arc::new(AtomicBool::new(false));
        let h = Arc::clone(&handle);
        let d = Arc::clone(&done);
        let waiter = std::thread::spawn(move || {
            h.unregister();
            d.store(true, Ordering::Release);
        });

        std::thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::Acquire), "unregister returned early");

        let _ = release_promotions(&handle, AccessMode::write());
        waiter.join().expect("unregister thread panicked");
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    #[should_panic(expected = "holds no reference")]
    fn releasing_unacquired_handle_is_a_contract_violation() {
        let handle = DataHandle::register(DataLayout::bytes(8));
        let _ = handle.release_one(AccessMode::read(), false);
    }

    #[test]
    fn layout_accessors() {
        let layout = DataLayout::bytes(128).on_node(3);
        assert_eq!(layout.len(), 128);
        assert_eq!(layout.home_node(), 3);
        assert!(!layout.is_empty());
        assert!(DataLayout::bytes(0).is_empty());
    }
}
