//! stardep — a dependency & dispatch core for heterogeneous task runtimes.
//!
//! The crate mediates access of tasks to *data handles* and releases tasks
//! to workers once their data prerequisites are satisfied:
//!
//! - conflicting accesses to one handle are serialized through a per-handle
//!   requester FIFO, with mutually compatible requesters promoted together;
//! - groups of handles can be put under an [`Arbiter`](data::Arbiter),
//!   which grants whole groups atomically and opportunistically instead of
//!   serializing through a strict order;
//! - reduction accesses accumulate private contributions that a combine
//!   task collapses before the next ordinary access;
//! - ready tasks cross a narrow, pluggable [`policy`] boundary to the
//!   worker pool.
//!
//! Parked tasks never occupy a thread: a waiting task is a queue entry,
//! and a release resumes its acquisition walk on the releasing thread.
//!
//! # Quick start
//!
//! ```
//! use stardep::{AccessMode, CoreConfig, DataLayout, Runtime, Task};
//!
//! let runtime = Runtime::with_fifo(CoreConfig::default()).unwrap();
//! let vector = runtime.register(DataLayout::bytes(1 << 20));
//!
//! runtime
//!     .submit(
//!         Task::new()
//!             .named("scale")
//!             .buffer(&vector, AccessMode::read_write())
//!             .kernel(|| { /* run on a worker */ }),
//!     )
//!     .unwrap();
//!
//! runtime.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod runtime;
pub mod task;
pub mod test_utils;
pub mod types;
pub mod worker;

pub use config::{CoreConfig, CoreProfile};
pub use data::{Arbiter, DataHandle, DataLayout, HandleStats};
pub use dispatch::{AcquireGuard, Dispatcher};
pub use error::{Error, ErrorKind, Result};
pub use policy::{FifoPolicy, SchedPolicy};
pub use runtime::Runtime;
pub use task::{ReadyTask, Task, TaskState};
pub use types::{AccessKind, AccessMode, ModeFlags};
