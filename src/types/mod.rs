//! Core types for the dependency core.
//!
//! - [`id`]: identifier newtypes (`HandleId`, `TaskId`, `ArbiterId`,
//!   `WorkerId`)
//! - [`mode`]: access kinds, flags, and the compatibility lattice

pub mod id;
pub mod mode;

pub use id::{ArbiterId, HandleId, TaskId, WorkerId};
pub use mode::{AccessKind, AccessMode, ModeFlags};
