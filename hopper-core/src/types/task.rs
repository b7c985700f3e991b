//! Task model and status state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::short_id;

/// Task status values
///
/// ```text
/// pending -claim-> claimed -start-> in_progress -> done
///    ▲                │                │    │  └─> blocked -resume-> in_progress
///    │                └─release        │    └─> cancelled
///    └─cancel─> cancelled              │
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be picked up
    Pending,
    /// Claimed by a worker, not yet started
    Claimed,
    /// Actively being worked on
    InProgress,
    /// Waiting on an external condition
    Blocked,
    /// Finished (terminal)
    Done,
    /// Abandoned (terminal)
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is terminal
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }

    /// Whether the task counts toward an instance's active load
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Claimed | Self::InProgress)
    }

    /// Check if moving to `target` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Claimed | Self::Cancelled)
                | (Self::Claimed, Self::InProgress | Self::Pending)
                | (
                    Self::InProgress,
                    Self::Done | Self::Blocked | Self::Cancelled
                )
                | (Self::Blocked, Self::InProgress)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Task priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Lowest priority
    Low,
    /// Default priority
    #[default]
    Medium,
    /// Elevated priority
    High,
    /// Highest priority
    Urgent,
}

impl TaskPriority {
    /// Rank used by execution queues (lower runs first)
    #[must_use]
    pub const fn queue_rank(self) -> u8 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Canonical string form, matching the wire format
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work tracked through the routing hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Opaque, globally unique id
    pub id: String,

    /// Short human-readable title
    pub title: String,

    /// Optional long-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit project assignment, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Capabilities an executor must have
    #[serde(default)]
    pub required_capabilities: Vec<String>,

    /// Ids of tasks that must finish before this one starts
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Priority, defaults to medium
    #[serde(default)]
    pub priority: TaskPriority,

    /// Current status
    #[serde(default = "default_status")]
    pub status: TaskStatus,

    /// Instance currently holding the task (None before first placement)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Worker that claimed the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// External tracker platform ("github", "jira", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_platform: Option<String>,

    /// Id on the external platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// URL on the external platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,

    /// Confidence of the last routing decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_confidence: Option<f64>,

    /// Reasoning of the last routing decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_reasoning: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,

    /// When work started (first transition to in-progress)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// When work stopped (terminal transition)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

const fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

impl Task {
    /// Create a new pending task with a generated id
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: short_id("task"),
            title: title.into(),
            description: None,
            project: None,
            tags: Vec::new(),
            required_capabilities: Vec::new(),
            depends_on: Vec::new(),
            priority: TaskPriority::Medium,
            status: TaskStatus::Pending,
            instance_id: None,
            owner: None,
            external_platform: None,
            external_id: None,
            external_url: None,
            routing_confidence: None,
            routing_reasoning: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Estimate task complexity for routing decisions.
    ///
    /// Starts at 1 and adds 1 for each of: long description (> 500 chars),
    /// more than 3 tags, a non-empty dependency list, and high/urgent
    /// priority. Clamped to 5.
    #[must_use]
    pub fn complexity(&self) -> u8 {
        let mut complexity = 1u8;

        if self.description.as_deref().is_some_and(|d| d.len() > 500) {
            complexity += 1;
        }

        if self.tags.len() > 3 {
            complexity += 1;
        }

        if !self.depends_on.is_empty() {
            complexity += 1;
        }

        if matches!(self.priority, TaskPriority::High | TaskPriority::Urgent) {
            complexity += 1;
        }

        complexity.min(5)
    }

    /// Title and description joined for text indexing
    #[must_use]
    pub fn search_text(&self) -> String {
        match &self.description {
            Some(desc) => format!("{} {desc}", self.title),
            None => self.title.clone(),
        }
    }
}
