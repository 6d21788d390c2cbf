//! Data handles and the structures that mediate access to them.
//!
//! - [`handle`]: the dependency unit — counters, requester FIFO, lifecycle
//! - [`requester`]: queued pending accesses
//! - [`arbiter`]: opportunistic multi-handle acquisition
//! - [`reduction`]: reduction accounting and combine-task construction

pub mod arbiter;
pub mod handle;
pub mod reduction;
pub(crate) mod requester;

pub use arbiter::Arbiter;
pub use handle::{DataHandle, DataLayout, HandleStats};
pub use reduction::CombineFn;
