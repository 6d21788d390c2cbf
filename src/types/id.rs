//! Identifier types for the dependency core.
//!
//! Handles and tasks get process-unique, monotonically increasing ids from
//! global atomic allocators. The allocation order of `HandleId` doubles as
//! the stable total order used to sort a task's buffer list, which is what
//! keeps two-task AB/BA acquisition from deadlocking.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ARBITER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a registered data handle.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandleId({})", self.0)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Identifier of a submitted task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Identifier of an arbiter, used to group a task's arbitered buffers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArbiterId(u64);

impl ArbiterId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_ARBITER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ArbiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArbiterId({})", self.0)
    }
}

impl fmt::Display for ArbiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Identifier for a scheduler worker.
pub type WorkerId = usize;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = HandleId::allocate();
        let b = HandleId::allocate();
        assert!(a < b);
        assert_ne!(a.as_u64(), b.as_u64());

        let t1 = TaskId::allocate();
        let t2 = TaskId::allocate();
        assert!(t1 < t2);
    }

    #[test]
    fn display_is_compact() {
        let h = HandleId(7);
        assert_eq!(h.to_string(), "h7");
        let t = TaskId(42);
        assert_eq!(t.to_string(), "t42");
        let a = ArbiterId(3);
        assert_eq!(a.to_string(), "a3");
    }
}
