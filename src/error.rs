//! Error types and error-handling strategy for the dependency core.
//!
//! The core distinguishes three failure classes:
//!
//! - **Rejected submissions**: a task names an access the core cannot honor
//!   (an invalid mode combination, a reduction without a registered combine
//!   function). These are returned as [`Error`] from `task_submit` and never
//!   change any state.
//! - **Contract violations**: releasing a handle that was never acquired,
//!   touching a retired handle, assigning an arbiter mid-life. These are
//!   bugs in the caller and abort the process with a diagnostic (`panic!`).
//! - **Execution failures**: anything that goes wrong inside a task body is
//!   opaque here. The core releases references as if the task succeeded and
//!   leaves error reporting to the executor.

use core::fmt;

use crate::types::{HandleId, TaskId};

/// The kind of a rejected submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The access mode is not valid for submission (for instance `NONE`).
    InvalidMode,
    /// Two accesses on the same handle within one task cannot be combined
    /// (for instance scratch and read).
    ConflictingDuplicate,
    /// A reduction access was submitted on a handle with no registered
    /// combine function.
    ReduxWithoutCombiner,
    /// A reduction access was submitted on an arbitered handle, which the
    /// arbiter protocol does not support.
    ReduxOnArbiteredHandle,
}

impl ErrorKind {
    const fn message(self) -> &'static str {
        match self {
            Self::InvalidMode => "access mode is not valid for submission",
            Self::ConflictingDuplicate => "duplicate accesses on one handle cannot be combined",
            Self::ReduxWithoutCombiner => "reduction access requires a registered combiner",
            Self::ReduxOnArbiteredHandle => "reduction access is not supported on arbitered handles",
        }
    }
}

/// A rejected operation, with the task and handle it concerned when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    task: Option<TaskId>,
    handle: Option<HandleId>,
}

impl Error {
    pub(crate) const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            task: None,
            handle: None,
        }
    }

    pub(crate) const fn for_handle(kind: ErrorKind, handle: HandleId) -> Self {
        Self {
            kind,
            task: None,
            handle: Some(handle),
        }
    }

    pub(crate) const fn with_task(mut self, task: TaskId) -> Self {
        self.task = Some(task);
        self
    }

    /// The kind of failure.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The task the failure concerned, if any.
    #[inline]
    #[must_use]
    pub const fn task(&self) -> Option<TaskId> {
        self.task
    }

    /// The handle the failure concerned, if any.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> Option<HandleId> {
        self.handle
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.message())?;
        if let Some(task) = self.task {
            write!(f, " (task {task})")?;
        }
        if let Some(handle) = self.handle {
            write!(f, " (handle {handle})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Result alias for the dependency core.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::id::{HandleId, TaskId};

    #[test]
    fn display_includes_context() {
        let err = Error::for_handle(ErrorKind::ReduxWithoutCombiner, HandleId::allocate());
        let text = err.to_string();
        assert!(text.contains("combiner"));
        assert!(text.contains("handle h"));

        let err = Error::new(ErrorKind::InvalidMode).with_task(TaskId::allocate());
        assert!(err.to_string().contains("task t"));
    }

    #[test]
    fn kind_accessors() {
        let err = Error::new(ErrorKind::ConflictingDuplicate);
        assert_eq!(err.kind(), ErrorKind::ConflictingDuplicate);
        assert_eq!(err.task(), None);
        assert_eq!(err.handle(), None);
    }
}
