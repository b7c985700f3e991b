//! Data model for the routing core

mod delegation;
mod feedback;
mod instance;
mod task;

pub use delegation::{Delegation, DelegationStatus, DelegationType};
pub use feedback::TaskFeedback;
pub use instance::{Instance, InstanceKind, InstanceScope, InstanceStatus};
pub use task::{Task, TaskPriority, TaskStatus};
