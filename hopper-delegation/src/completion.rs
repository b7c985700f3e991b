//! ABOUTME: Delegation chain summaries
//! ABOUTME: Per-status counts plus an overall label for observability

use serde::Serialize;

use hopper_core::{Delegation, DelegationStatus};

/// Completion status of a task's delegation chain
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChainSummary {
    /// Task the chain belongs to
    pub task_id: String,
    /// Total hops recorded
    pub total: usize,
    /// Completed hops
    pub completed: usize,
    /// Pending hops
    pub pending: usize,
    /// Accepted hops
    pub accepted: usize,
    /// Rejected hops
    pub rejected: usize,
    /// Cancelled hops
    pub cancelled: usize,
    /// Overall label, see [`overall_status`]
    pub overall_status: &'static str,
}

/// Label describing the chain as a whole
fn overall_status(
    total: usize,
    completed: usize,
    pending: usize,
    accepted: usize,
    rejected: usize,
) -> &'static str {
    if total == 0 {
        "not_delegated"
    } else if completed == total {
        "fully_completed"
    } else if rejected > 0 {
        "has_rejections"
    } else if pending > 0 {
        "pending_acceptance"
    } else if accepted > 0 {
        "in_progress"
    } else {
        "unknown"
    }
}

pub(crate) fn summarize_chain(task_id: &str, chain: &[Delegation]) -> ChainSummary {
    let count =
        |status: DelegationStatus| chain.iter().filter(|d| d.status == status).count();

    let completed = count(DelegationStatus::Completed);
    let pending = count(DelegationStatus::Pending);
    let accepted = count(DelegationStatus::Accepted);
    let rejected = count(DelegationStatus::Rejected);
    let cancelled = count(DelegationStatus::Cancelled);
    let total = chain.len();

    ChainSummary {
        task_id: task_id.to_string(),
        total,
        completed,
        pending,
        accepted,
        rejected,
        cancelled,
        overall_status: overall_status(total, completed, pending, accepted, rejected),
    }
}
