//! Task feedback model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User verdict on how a task was routed and executed
///
/// One record per task. Saves are upserts: a second save updates the
/// existing record in place, last write wins per field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFeedback {
    /// Task this feedback is about (primary key)
    pub task_id: String,

    /// Whether the routing decision was a good match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub was_good_match: Option<bool>,

    /// Where the task should have gone instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub should_have_routed_to: Option<String>,

    /// Free-text feedback about the routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_feedback: Option<String>,

    /// Estimated duration, as given by the requester
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<String>,

    /// Actual duration observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_duration: Option<String>,

    /// Complexity rating, 1-5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_rating: Option<u8>,

    /// Quality score, 0.0-5.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    /// Whether the work needed rework
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_rework: Option<bool>,

    /// Why rework was needed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rework_reason: Option<String>,

    /// Blockers that weren't anticipated
    #[serde(default)]
    pub unexpected_blockers: Vec<String>,

    /// Skills the task needed but wasn't tagged with
    #[serde(default)]
    pub required_skills_not_tagged: Vec<String>,

    /// Additional notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// When the feedback was first recorded
    pub created_at: DateTime<Utc>,
}

impl TaskFeedback {
    /// Create an empty feedback record for a task
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            was_good_match: None,
            should_have_routed_to: None,
            routing_feedback: None,
            estimated_duration: None,
            actual_duration: None,
            complexity_rating: None,
            quality_score: None,
            required_rework: None,
            rework_reason: None,
            unexpected_blockers: Vec::new(),
            required_skills_not_tagged: Vec::new(),
            notes: None,
            created_at: Utc::now(),
        }
    }
}
