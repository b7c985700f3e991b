//! ABOUTME: Delegation engine for Hopper - moves tasks down the tree, bubbles completion up
//! ABOUTME: Per-task critical sections guarantee at most one active delegation per task
//!
//! A delegation is one hop of a task from a source instance to a target
//! instance. The engine owns every delegation record, serializes mutations
//! per task id, and keeps two invariants:
//!
//! 1. a task has at most one active (pending or accepted) delegation;
//! 2. the task's holding instance equals the active delegation's target,
//!    or its pre-hop home after a reject/cancel rollback.

pub mod completion;
pub mod engine;

pub use completion::ChainSummary;
pub use engine::DelegationEngine;
