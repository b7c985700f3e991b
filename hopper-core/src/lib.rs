//! # Core types for Hopper
//!
//! Foundation layer for the Hopper task-routing service: the data model
//! (tasks, instances, delegations, feedback), the status state machines,
//! and the shared error type used across all Hopper crates.
//!
//! ## Model overview
//!
//! ```text
//! Instance (tree: global → project → orchestration)
//!     ▲ owns (by id)
//! Task ──▶ Delegation (one hop down the tree)
//!     └──▶ TaskFeedback (1-1 verdict on routing)
//! ```
//!
//! Entities reference each other by id only; resolution happens at read time
//! through the stores. No owning pointers between entities.

pub mod error;
pub mod id;
pub mod types;

pub use error::{HopperError, Result};
pub use id::short_id;
pub use types::{
    Delegation, DelegationStatus, DelegationType, Instance, InstanceKind, InstanceScope,
    InstanceStatus, Task, TaskFeedback, TaskPriority, TaskStatus,
};
