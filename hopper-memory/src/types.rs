//! Core types for the memory system

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use hopper_core::{short_id, Task, TaskPriority, TaskStatus};

/// Snapshot of a task at routing time.
///
/// Stored by value on the episode so the record survives later task
/// mutation or deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task id
    pub id: String,
    /// Title at decision time
    pub title: String,
    /// Description at decision time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Project at decision time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Status at decision time
    pub status: TaskStatus,
    /// Priority at decision time
    pub priority: TaskPriority,
    /// Tags at decision time
    #[serde(default)]
    pub tags: Vec<String>,
    /// Holding instance at decision time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            project: task.project.clone(),
            status: task.status,
            priority: task.priority,
            tags: task.tags.clone(),
            instance_id: task.instance_id.clone(),
        }
    }
}

/// Outcome recorded on an episode after the task finished
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeOutcome {
    /// Whether the routing turned out well
    pub success: bool,
    /// Observed duration, free-form ("2h", "3d")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Notes on the outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Audit record of one routing decision
///
/// Created when the decision is made; its outcome is written at most once
/// and never updated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingEpisode {
    /// Opaque id
    pub id: String,
    /// Task that was routed
    pub task_id: String,
    /// Task state at decision time, by value
    pub task_snapshot: TaskSnapshot,
    /// Instances that were considered
    #[serde(default)]
    pub available_instances: Vec<String>,
    /// Ids of similar tasks consulted for the decision
    #[serde(default)]
    pub similar_tasks_used: Vec<String>,
    /// Instance the task was routed to
    pub chosen_instance: String,
    /// Decision confidence in [0, 1]
    pub confidence: f64,
    /// Free-text reasoning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Strategy that produced the decision ("explicit", "learning", ...)
    pub strategy_used: String,
    /// Opaque decision factors (may carry `pattern_id`, `source`, ...)
    #[serde(default)]
    pub decision_factors: HashMap<String, Value>,
    /// Outcome, written once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<EpisodeOutcome>,
    /// When the decision was made
    pub routed_at: DateTime<Utc>,
    /// When the outcome was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RoutingEpisode {
    /// Create an episode for a routing decision made now
    #[must_use]
    pub fn new(task: &Task, chosen_instance: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: short_id("ep"),
            task_id: task.id.clone(),
            task_snapshot: TaskSnapshot::from(task),
            available_instances: Vec::new(),
            similar_tasks_used: Vec::new(),
            chosen_instance: chosen_instance.into(),
            confidence,
            reasoning: None,
            strategy_used: "rules".to_string(),
            decision_factors: HashMap::new(),
            outcome: None,
            routed_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether the outcome has been recorded
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Whether the episode ended in success
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_some_and(|o| o.success)
    }

    /// Record the outcome. No-op if an outcome is already present.
    pub fn record_outcome(&mut self, success: bool, duration: Option<String>, notes: Option<String>) {
        if self.outcome.is_some() {
            return;
        }
        self.outcome = Some(EpisodeOutcome {
            success,
            duration,
            notes,
        });
        self.completed_at = Some(Utc::now());
    }

    /// Pattern id stamped into the decision factors, if the decision came
    /// from a learned pattern
    #[must_use]
    pub fn pattern_id(&self) -> Option<&str> {
        self.decision_factors
            .get("pattern_id")
            .and_then(Value::as_str)
    }
}

/// Reference to a similar past task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarTask {
    /// Task id
    pub task_id: String,
    /// Its title
    pub title: String,
    /// Combined similarity score
    pub similarity_score: f64,
    /// Where that task was routed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routed_to: Option<String>,
    /// Whether that routing succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_success: Option<bool>,
}

/// Routing-relevant view of an available instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Instance id
    pub instance_id: String,
    /// Instance name
    pub name: String,
    /// Scope as a string
    pub scope: String,
    /// Status as a string
    pub status: String,
    /// Declared capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Currently active tasks
    #[serde(default)]
    pub current_load: usize,
    /// Configured concurrency cap
    #[serde(default = "default_capacity")]
    pub max_capacity: usize,
}

const fn default_capacity() -> usize {
    10
}

/// A recent routing decision kept for context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentDecision {
    /// Task that was routed
    pub task_id: String,
    /// Its title
    pub task_title: String,
    /// Where it went
    pub routed_to: String,
    /// When it was routed
    pub routed_at: DateTime<Utc>,
    /// Decision confidence
    pub confidence: f64,
    /// Outcome label once known ("success", "failure")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

/// Aggregated context for a routing decision, cached in working memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    /// Task being routed
    pub task_id: String,
    /// Its title
    pub task_title: String,
    /// Its tags
    #[serde(default)]
    pub task_tags: Vec<String>,
    /// Its priority
    pub task_priority: TaskPriority,
    /// Similar past tasks
    #[serde(default)]
    pub similar_tasks: Vec<SimilarTask>,
    /// Instances available for routing
    #[serde(default)]
    pub available_instances: Vec<InstanceInfo>,
    /// Recent decisions for context
    #[serde(default)]
    pub recent_decisions: Vec<RecentDecision>,
    /// When the context was assembled
    pub created_at: DateTime<Utc>,
    /// When the cached context expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoutingContext {
    /// Build a context from a task
    #[must_use]
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            task_title: task.title.clone(),
            task_tags: task.tags.clone(),
            task_priority: task.priority,
            similar_tasks: Vec::new(),
            available_instances: Vec::new(),
            recent_decisions: Vec::new(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Similar tasks that were successfully routed
    #[must_use]
    pub fn successful_routings(&self) -> Vec<&SimilarTask> {
        self.similar_tasks
            .iter()
            .filter(|t| t.outcome_success == Some(true))
            .collect()
    }

    /// Instances with spare capacity, running only
    #[must_use]
    pub fn instances_with_capacity(&self) -> Vec<&InstanceInfo> {
        self.available_instances
            .iter()
            .filter(|i| i.current_load < i.max_capacity && i.status == "running")
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_records_only_once() {
        let task = Task::new("t");
        let mut episode = RoutingEpisode::new(&task, "hop-a", 0.8);
        assert!(!episode.is_completed());

        episode.record_outcome(true, Some("2h".into()), None);
        assert!(episode.is_success());
        let first_completed_at = episode.completed_at;

        // Second write is a no-op, even with a different verdict.
        episode.record_outcome(false, None, Some("late".into()));
        assert!(episode.is_success());
        assert_eq!(episode.completed_at, first_completed_at);
    }

    #[test]
    fn snapshot_survives_task_mutation() {
        let mut task = Task::new("original title");
        task.tags = vec!["api".into()];
        let episode = RoutingEpisode::new(&task, "hop-a", 0.5);

        task.title = "renamed".into();
        task.tags.clear();

        assert_eq!(episode.task_snapshot.title, "original title");
        assert_eq!(episode.task_snapshot.tags, vec!["api"]);
    }

    #[test]
    fn context_capacity_filter() {
        let task = Task::new("t");
        let mut ctx = RoutingContext::for_task(&task);
        ctx.available_instances = vec![
            InstanceInfo {
                instance_id: "a".into(),
                name: "a".into(),
                scope: "project".into(),
                status: "running".into(),
                capabilities: vec![],
                current_load: 9,
                max_capacity: 10,
            },
            InstanceInfo {
                instance_id: "b".into(),
                name: "b".into(),
                scope: "project".into(),
                status: "paused".into(),
                capabilities: vec![],
                current_load: 0,
                max_capacity: 10,
            },
        ];

        let available = ctx.instances_with_capacity();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].instance_id, "a");
    }
}
