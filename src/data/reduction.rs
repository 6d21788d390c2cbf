//! Reduction accounting.
//!
//! A handle in REDUX mode accepts any number of concurrent contributors;
//! each works on a private copy. Before the next non-reduction access may
//! be granted, the accumulated copies must be collapsed by a *combine*
//! task. This module tracks the outstanding contributions and the armed
//! flush, and builds the combine task itself; the dispatcher decides when
//! to inject it (either automatically, when a non-reduction requester
//! parks behind live contributions, or explicitly through `redux_flush`).

use std::sync::Arc;

use crate::data::handle::DataHandle;
use crate::task::Job;
use crate::types::AccessMode;

/// The combine kernel registered for a handle.
///
/// Invoked once per flush, with exclusive access to the handle, after all
/// contributors released their references. May run on any worker.
pub type CombineFn = Arc<dyn Fn() + Send + Sync>;

/// Per-handle reduction bookkeeping, guarded by the handle's header lock.
#[derive(Default)]
pub(crate) struct ReduxState {
    combiner: Option<CombineFn>,
    /// Contributions completed since the last combine.
    contributions: u32,
    /// Set while a combine task is pending (injected but not yet done).
    flush_pending: bool,
}

/// Outcome of arming a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushDecision {
    /// A combine task must be injected by the caller.
    Armed,
    /// A combine task is already on its way.
    AlreadyArmed,
    /// There is nothing to combine.
    Idle,
}

impl ReduxState {
    pub(crate) fn set_combiner(&mut self, combiner: CombineFn) {
        self.combiner = Some(combiner);
    }

    pub(crate) fn combiner(&self) -> Option<CombineFn> {
        self.combiner.clone()
    }

    pub(crate) fn has_combiner(&self) -> bool {
        self.combiner.is_some()
    }

    /// Records a completed contribution (a REDUX holder released).
    pub(crate) fn add_contribution(&mut self) {
        self.contributions += 1;
    }

    pub(crate) fn contributions(&self) -> u32 {
        self.contributions
    }

    pub(crate) fn flush_pending(&self) -> bool {
        self.flush_pending
    }

    /// Arms a flush if reduction work is outstanding.
    ///
    /// `live_redux` tells whether the handle currently has REDUX holders;
    /// their contributions will land before the combine task can acquire
    /// the handle, so they count as outstanding work too.
    pub(crate) fn arm_flush(&mut self, live_redux: bool) -> FlushDecision {
        if self.flush_pending {
            return FlushDecision::AlreadyArmed;
        }
        if self.contributions == 0 && !live_redux {
            return FlushDecision::Idle;
        }
        debug_assert!(self.has_combiner(), "reduction activity without a combiner");
        self.flush_pending = true;
        FlushDecision::Armed
    }

    /// Resets the state after the combine task released the handle.
    pub(crate) fn combine_done(&mut self) {
        self.contributions = 0;
        self.flush_pending = false;
    }
}

impl std::fmt::Debug for ReduxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReduxState")
            .field("contributions", &self.contributions)
            .field("flush_pending", &self.flush_pending)
            .field("has_combiner", &self.has_combiner())
            .finish()
    }
}

/// Builds the combine task for `handle`.
///
/// The task takes the handle in read-write mode and runs the registered
/// combine function. It is marked so that the reduction barrier lets it
/// through and so that its completion resets the reduction state.
pub(crate) fn combine_job(handle: &Arc<DataHandle>) -> Arc<Job> {
    let combiner = handle
        .combiner()
        .expect("combine task injected on a handle with no combiner");
    Job::new_combine(
        Arc::clone(handle),
        AccessMode::read_write(),
        Box::new(move || combiner()),
    )
}
