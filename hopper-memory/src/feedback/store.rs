//! Feedback store

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hopper_core::{HopperError, Result, TaskFeedback, TaskStatus};
use hopper_storage::{Page, TaskFilter, TaskStore};

use crate::episodic::EpisodicStore;

/// Fields accepted by a feedback save. Absent fields leave the stored
/// record untouched on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackInput {
    /// Whether the routing was a good match
    #[serde(default)]
    pub was_good_match: Option<bool>,
    /// Where the task should have gone
    #[serde(default)]
    pub should_have_routed_to: Option<String>,
    /// Free-text routing feedback
    #[serde(default)]
    pub routing_feedback: Option<String>,
    /// Estimated duration
    #[serde(default)]
    pub estimated_duration: Option<String>,
    /// Actual duration
    #[serde(default)]
    pub actual_duration: Option<String>,
    /// Complexity rating 1-5
    #[serde(default)]
    pub complexity_rating: Option<u8>,
    /// Quality score 0.0-5.0
    #[serde(default)]
    pub quality_score: Option<f64>,
    /// Whether rework was needed
    #[serde(default)]
    pub required_rework: Option<bool>,
    /// Why rework was needed
    #[serde(default)]
    pub rework_reason: Option<String>,
    /// Unanticipated blockers
    #[serde(default)]
    pub unexpected_blockers: Option<Vec<String>>,
    /// Skills needed but not tagged
    #[serde(default)]
    pub required_skills_not_tagged: Option<Vec<String>>,
    /// Additional notes
    #[serde(default)]
    pub notes: Option<String>,
}

impl FeedbackInput {
    /// Input carrying just the match verdict
    #[must_use]
    pub fn good_match(was_good_match: bool) -> Self {
        Self {
            was_good_match: Some(was_good_match),
            ..Self::default()
        }
    }

    fn apply(self, feedback: &mut TaskFeedback) {
        if self.was_good_match.is_some() {
            feedback.was_good_match = self.was_good_match;
        }
        if self.should_have_routed_to.is_some() {
            feedback.should_have_routed_to = self.should_have_routed_to;
        }
        if self.routing_feedback.is_some() {
            feedback.routing_feedback = self.routing_feedback;
        }
        if self.estimated_duration.is_some() {
            feedback.estimated_duration = self.estimated_duration;
        }
        if self.actual_duration.is_some() {
            feedback.actual_duration = self.actual_duration;
        }
        if self.complexity_rating.is_some() {
            feedback.complexity_rating = self.complexity_rating;
        }
        if self.quality_score.is_some() {
            feedback.quality_score = self.quality_score;
        }
        if self.required_rework.is_some() {
            feedback.required_rework = self.required_rework;
        }
        if self.rework_reason.is_some() {
            feedback.rework_reason = self.rework_reason;
        }
        if let Some(blockers) = self.unexpected_blockers {
            feedback.unexpected_blockers = blockers;
        }
        if let Some(skills) = self.required_skills_not_tagged {
            feedback.required_skills_not_tagged = skills;
        }
        if self.notes.is_some() {
            feedback.notes = self.notes;
        }
    }
}

/// Store for task feedback, linked to the episodic store
pub struct FeedbackStore {
    tasks: Arc<dyn TaskStore>,
    episodic: Arc<dyn EpisodicStore>,
    feedback: RwLock<HashMap<String, TaskFeedback>>,
}

impl FeedbackStore {
    /// Create over the task and episodic stores
    #[must_use]
    pub fn new(tasks: Arc<dyn TaskStore>, episodic: Arc<dyn EpisodicStore>) -> Self {
        Self {
            tasks,
            episodic,
            feedback: RwLock::new(HashMap::new()),
        }
    }

    /// Save feedback for a task (upsert, last write wins per field).
    ///
    /// Propagates the verdict to the task's latest episode.
    pub async fn record_feedback(
        &self,
        task_id: &str,
        input: FeedbackInput,
    ) -> Result<TaskFeedback> {
        if self.tasks.get(task_id).await?.is_none() {
            warn!(task_id, "feedback for unknown task");
            return Err(HopperError::not_found("task", task_id));
        }

        let updated = {
            let mut feedback = self.feedback.write();
            let entry = feedback
                .entry(task_id.to_string())
                .or_insert_with(|| TaskFeedback::new(task_id));
            input.apply(entry);
            entry.clone()
        };

        info!(task_id, was_good_match = ?updated.was_good_match, "recorded feedback");
        self.propagate_to_episode(&updated).await?;
        Ok(updated)
    }

    async fn propagate_to_episode(&self, feedback: &TaskFeedback) -> Result<()> {
        let Some(episode) = self.episodic.latest_for_task(&feedback.task_id).await? else {
            return Ok(());
        };

        self.episodic
            .record_outcome(
                &episode.id,
                feedback.was_good_match.unwrap_or(false),
                feedback.actual_duration.clone(),
                feedback.routing_feedback.clone(),
            )
            .await?;
        Ok(())
    }

    /// Feedback for a task, if any
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<TaskFeedback> {
        self.feedback.read().get(task_id).cloned()
    }

    /// All feedback, newest first, optionally filtered by verdict
    #[must_use]
    pub fn all(&self, limit: usize, good_matches_only: Option<bool>) -> Vec<TaskFeedback> {
        let mut records: Vec<TaskFeedback> = self
            .feedback
            .read()
            .values()
            .filter(|f| good_matches_only.is_none_or(|wanted| f.was_good_match == Some(wanted)))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        records.truncate(limit);
        records
    }

    /// Feedback where the routing was judged wrong
    #[must_use]
    pub fn misrouted(&self, limit: usize) -> Vec<TaskFeedback> {
        self.all(limit, Some(false))
    }

    /// Completed tasks with no feedback yet, most recently updated first
    pub async fn tasks_needing_feedback(&self, limit: usize) -> Result<Vec<hopper_core::Task>> {
        let filter = TaskFilter {
            statuses: vec![TaskStatus::Done],
            ..TaskFilter::default()
        };
        let (done_tasks, _) = self
            .tasks
            .list(
                &filter,
                Page {
                    offset: 0,
                    limit: usize::MAX,
                },
            )
            .await?;

        let feedback = self.feedback.read();
        let mut missing: Vec<hopper_core::Task> = done_tasks
            .into_iter()
            .filter(|t| !feedback.contains_key(&t.id))
            .collect();
        missing.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        missing.truncate(limit);
        Ok(missing)
    }

    /// Delete feedback; returns whether it existed
    pub fn delete(&self, task_id: &str) -> bool {
        self.feedback.write().remove(task_id).is_some()
    }

    /// Number of feedback records
    #[must_use]
    pub fn len(&self) -> usize {
        self.feedback.read().len()
    }

    /// Whether no feedback is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feedback.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::InMemoryEpisodicStore;
    use crate::types::RoutingEpisode;
    use hopper_storage::{InMemoryTaskStore, TaskSpec};

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        episodic: Arc<InMemoryEpisodicStore>,
        store: FeedbackStore,
    }

    fn fixture() -> Fixture {
        let tasks = Arc::new(InMemoryTaskStore::new());
        let episodic = Arc::new(InMemoryEpisodicStore::new());
        let store = FeedbackStore::new(
            tasks.clone() as Arc<dyn TaskStore>,
            episodic.clone() as Arc<dyn EpisodicStore>,
        );
        Fixture {
            tasks,
            episodic,
            store,
        }
    }

    #[tokio::test]
    async fn upsert_is_last_write_wins_per_field() {
        let f = fixture();
        let task = f.tasks.create(TaskSpec::titled("t")).await.unwrap();

        let mut first = FeedbackInput::good_match(true);
        first.quality_score = Some(4.0);
        first.notes = Some("solid".into());
        f.store.record_feedback(&task.id, first).await.unwrap();

        // update flips the verdict but leaves quality/notes untouched
        let second = FeedbackInput::good_match(false);
        let updated = f.store.record_feedback(&task.id, second).await.unwrap();

        assert_eq!(updated.was_good_match, Some(false));
        assert_eq!(updated.quality_score, Some(4.0));
        assert_eq!(updated.notes.as_deref(), Some("solid"));
        assert_eq!(f.store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_task_is_rejected() {
        let f = fixture();
        let err = f
            .store
            .record_feedback("task-ghost", FeedbackInput::good_match(true))
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::NotFound { .. }));
    }

    #[tokio::test]
    async fn propagates_to_latest_episode() {
        let f = fixture();
        let task = f.tasks.create(TaskSpec::titled("t")).await.unwrap();
        let full = f.tasks.get(&task.id).await.unwrap().unwrap();
        let episode = f
            .episodic
            .record_episode(RoutingEpisode::new(&full, "hop-a", 0.7))
            .await
            .unwrap();

        f.store
            .record_feedback(&task.id, FeedbackInput::good_match(true))
            .await
            .unwrap();

        let episode = f.episodic.get(&episode.id).await.unwrap().unwrap();
        assert!(episode.is_success());
    }

    #[tokio::test]
    async fn tasks_needing_feedback_excludes_covered() {
        let f = fixture();
        let a = f.tasks.create(TaskSpec::titled("a")).await.unwrap();
        let b = f.tasks.create(TaskSpec::titled("b")).await.unwrap();
        for id in [&a.id, &b.id] {
            f.tasks
                .transition_status(id, TaskStatus::Claimed)
                .await
                .unwrap();
            f.tasks
                .transition_status(id, TaskStatus::InProgress)
                .await
                .unwrap();
            f.tasks
                .transition_status(id, TaskStatus::Done)
                .await
                .unwrap();
        }

        f.store
            .record_feedback(&a.id, FeedbackInput::good_match(true))
            .await
            .unwrap();

        let missing = f.store.tasks_needing_feedback(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, b.id);
    }
}
