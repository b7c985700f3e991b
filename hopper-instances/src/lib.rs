//! ABOUTME: Instance registry and scope behaviors for Hopper
//! ABOUTME: Maintains the routing tree and decides how each scope handles incoming tasks
//!
//! The registry stores the instance tree and enforces its invariants
//! (acyclicity, scope monotonicity from the root downward, lifecycle
//! transitions). Scope behaviors give each node its personality: global
//! instances only route, projects handle or delegate on complexity,
//! orchestrations queue and execute.

pub mod behavior;
pub mod registry;

pub use behavior::{behavior_for_scope, QueueStats, ScopeBehavior, TaskAction};
pub use registry::{InstanceFilter, InstanceRegistry, InstanceSpec, InstanceTree};
