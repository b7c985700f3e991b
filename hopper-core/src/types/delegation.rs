//! Delegation model: one hop of a task down the instance tree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::short_id;

/// Why a task moved between instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DelegationType {
    /// Routing to the appropriate instance
    #[default]
    Route,
    /// Breaking a task into subtasks
    Decompose,
    /// Escalating to a parent instance
    Escalate,
    /// Reassigning to a sibling
    Reassign,
}

/// Delegation status
///
/// ```text
/// pending -accept-> accepted -complete-> completed
///    │                  └─cancel─> cancelled
///    ├─reject(reason)─> rejected
///    ├─complete───────> completed
///    └─cancel─────────> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    /// Created, not yet acknowledged by the target
    Pending,
    /// Target accepted the work
    Accepted,
    /// Target refused (terminal)
    Rejected,
    /// Task finished at the target (terminal)
    Completed,
    /// Withdrawn before completion (terminal)
    Cancelled,
}

impl DelegationStatus {
    /// Pending or accepted
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }

    /// Completed, rejected, or cancelled — never changes again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }
}

impl std::fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One hop of a task from a source instance to a target instance
///
/// References tasks and instances by id only; the full delegation chain for
/// a task is totally ordered by `delegated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    /// Opaque id
    pub id: String,

    /// Task being moved
    pub task_id: String,

    /// Instance the task came from (None when the task had no home yet)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_instance_id: Option<String>,

    /// Instance the task moved to
    pub target_instance_id: String,

    /// Kind of hop
    #[serde(default)]
    pub delegation_type: DelegationType,

    /// Current status
    pub status: DelegationStatus,

    /// Result payload carried on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Reason recorded on rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    /// Free-form notes, appended over the lifetime of the hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Who initiated the hop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,

    /// When the hop was created
    pub delegated_at: DateTime<Utc>,

    /// When the target accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,

    /// When the hop completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Delegation {
    /// Create a pending delegation
    #[must_use]
    pub fn new(
        task_id: impl Into<String>,
        source_instance_id: Option<String>,
        target_instance_id: impl Into<String>,
        delegation_type: DelegationType,
    ) -> Self {
        Self {
            id: short_id("del"),
            task_id: task_id.into(),
            source_instance_id,
            target_instance_id: target_instance_id.into(),
            delegation_type,
            status: DelegationStatus::Pending,
            result: None,
            rejection_reason: None,
            notes: None,
            delegated_by: None,
            delegated_at: Utc::now(),
            accepted_at: None,
            completed_at: None,
        }
    }

    /// Whether this hop is still pending or accepted
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether this hop has reached a terminal status
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark accepted
    pub fn accept(&mut self) {
        self.status = DelegationStatus::Accepted;
        self.accepted_at = Some(Utc::now());
    }

    /// Mark rejected with a reason
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.status = DelegationStatus::Rejected;
        self.rejection_reason = Some(reason.into());
    }

    /// Mark completed, optionally carrying a result payload
    pub fn complete(&mut self, result: Option<Value>) {
        self.status = DelegationStatus::Completed;
        self.completed_at = Some(Utc::now());
        if result.is_some() {
            self.result = result;
        }
    }

    /// Mark cancelled
    pub fn cancel(&mut self) {
        self.status = DelegationStatus::Cancelled;
    }

    /// Append a line to the notes
    pub fn append_note(&mut self, note: &str) {
        match &mut self.notes {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(note);
            }
            None => self.notes = Some(note.to_string()),
        }
    }
}
