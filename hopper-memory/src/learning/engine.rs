//! Learning engine
//!
//! Thin facade over the memory tiers. Builds routing contexts, produces
//! suggestions, records decisions and outcomes, processes feedback, and
//! drives consolidation. Every collaborator is injected; the engine holds
//! no global state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hopper_core::{Result, Task};

use crate::config::MemoryConfig;
use crate::consolidated::{ConsolidatedStore, ConsolidationReport, PatternExtractor};
use crate::episodic::EpisodicStore;
use crate::feedback::{FeedbackInput, FeedbackStore};
use crate::search::TaskSearcher;
use crate::types::{InstanceInfo, RoutingContext, RoutingEpisode, SimilarTask};
use crate::working::WorkingMemory;

use super::suggestion::RoutingSuggestion;

/// Minimum pattern confidence consulted for suggestions
const SUGGESTION_MIN_CONFIDENCE: f64 = 0.4;
/// Minimum similarity for similar-task recall
const SIMILAR_MIN_SCORE: f64 = 0.3;
/// Score floor for a similar-task suggestion to count
const SIMILAR_SUGGESTION_FLOOR: f64 = 0.3;

/// Counters describing what a learning operation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LearningReport {
    /// Episodes created or updated
    pub episodes_updated: usize,
    /// Pattern confidences updated
    pub patterns_updated: usize,
    /// Feedback records written
    pub feedback_processed: usize,
}

/// Facade over working, episodic, and consolidated memory
pub struct LearningEngine {
    config: MemoryConfig,
    working: WorkingMemory,
    episodic: Arc<dyn EpisodicStore>,
    consolidated: Arc<ConsolidatedStore>,
    searcher: Arc<TaskSearcher>,
    feedback: Arc<FeedbackStore>,
    extractor: PatternExtractor,
}

impl LearningEngine {
    /// Wire the engine from its components
    #[must_use]
    pub fn new(
        config: MemoryConfig,
        working: WorkingMemory,
        episodic: Arc<dyn EpisodicStore>,
        consolidated: Arc<ConsolidatedStore>,
        searcher: Arc<TaskSearcher>,
        feedback: Arc<FeedbackStore>,
    ) -> Self {
        let extractor = PatternExtractor::new(Arc::clone(&episodic), Arc::clone(&consolidated))
            .with_min_episodes(config.consolidation_min_episodes)
            .with_window_days(config.consolidation_window_days);
        Self {
            config,
            working,
            episodic,
            consolidated,
            searcher,
            feedback,
            extractor,
        }
    }

    /// The consolidated store backing this engine
    #[must_use]
    pub fn consolidated(&self) -> &Arc<ConsolidatedStore> {
        &self.consolidated
    }

    /// The episodic store backing this engine
    #[must_use]
    pub fn episodic(&self) -> &Arc<dyn EpisodicStore> {
        &self.episodic
    }

    /// The searcher backing this engine
    #[must_use]
    pub fn searcher(&self) -> &Arc<TaskSearcher> {
        &self.searcher
    }

    /// The feedback store backing this engine
    #[must_use]
    pub fn feedback(&self) -> &Arc<FeedbackStore> {
        &self.feedback
    }

    /// Build (or fetch from cache) the routing context for a task
    pub async fn build_context(
        &self,
        task: &Task,
        available_instances: Option<Vec<InstanceInfo>>,
    ) -> Result<RoutingContext> {
        if let Some(cached) = self.working.get_context(&task.id).await? {
            debug!(task_id = %task.id, "routing context cache hit");
            return Ok(cached);
        }

        let similar = self.find_similar_tasks(task).await?;

        let ttl = chrono::Duration::from_std(self.config.context_ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(3600));

        let mut context = RoutingContext::for_task(task);
        context.similar_tasks = similar;
        context.available_instances = available_instances.unwrap_or_default();
        context.expires_at = Some(Utc::now() + ttl);

        self.working.set_context(&context, None).await?;
        Ok(context)
    }

    async fn find_similar_tasks(&self, task: &Task) -> Result<Vec<SimilarTask>> {
        let results = self
            .searcher
            .search_by_task(task, self.config.max_similar_tasks.min(5), SIMILAR_MIN_SCORE)
            .await?;

        let mut similar = Vec::with_capacity(results.len());
        for result in results {
            let outcome = self
                .episodic
                .latest_for_task(&result.task_id)
                .await?
                .and_then(|e| e.outcome.map(|o| o.success));

            similar.push(SimilarTask {
                task_id: result.task_id,
                title: result.title,
                similarity_score: result.similarity_score,
                routed_to: result.instance_id,
                outcome_success: outcome,
            });
        }
        Ok(similar)
    }

    /// Routing suggestions for a task: pattern matches merged with the
    /// similar-task vote, best confidence first.
    pub async fn get_routing_suggestions(
        &self,
        task: &Task,
        limit: usize,
    ) -> Result<Vec<RoutingSuggestion>> {
        let mut suggestions = Vec::new();

        let matches = self.consolidated.find_matching(
            &task.tags,
            Some(task.priority),
            Some(&task.title),
            SUGGESTION_MIN_CONFIDENCE,
            limit,
        );
        for (pattern, score) in matches {
            suggestions.push(RoutingSuggestion::from_pattern(
                pattern.target_instance.clone(),
                score,
                pattern.id.clone(),
                &pattern.name,
            ));
        }

        let context = self.build_context(task, None).await?;
        if let Some(suggestion) = Self::analyze_similar_tasks(&context.similar_tasks) {
            suggestions.push(suggestion);
        }

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target_instance.cmp(&b.target_instance))
        });
        suggestions.truncate(limit);
        Ok(suggestions)
    }

    /// Vote over similar tasks: per target, `success_rate × min(1, n/3)`;
    /// the best target above the floor becomes a suggestion.
    fn analyze_similar_tasks(similar: &[SimilarTask]) -> Option<RoutingSuggestion> {
        let mut totals: HashMap<&str, usize> = HashMap::new();
        let mut successes: HashMap<&str, usize> = HashMap::new();

        for task in similar {
            let Some(routed_to) = task.routed_to.as_deref() else {
                continue;
            };
            *totals.entry(routed_to).or_insert(0) += 1;
            if task.outcome_success == Some(true) {
                *successes.entry(routed_to).or_insert(0) += 1;
            }
        }

        let mut best: Option<(&str, f64, f64)> = None;
        for (&instance, &total) in &totals {
            let success = successes.get(instance).copied().unwrap_or(0);
            #[allow(clippy::cast_precision_loss)]
            let success_rate = success as f64 / total as f64;
            #[allow(clippy::cast_precision_loss)]
            let score = success_rate * f64::min(1.0, total as f64 / 3.0);

            let better = best.is_none_or(|(_, best_score, _)| score > best_score);
            if better {
                best = Some((instance, score, success_rate));
            }
        }

        let (instance, score, success_rate) = best?;
        if score <= SIMILAR_SUGGESTION_FLOOR {
            return None;
        }

        let ids = similar
            .iter()
            .filter(|t| t.routed_to.as_deref() == Some(instance))
            .map(|t| t.task_id.clone())
            .collect();
        Some(RoutingSuggestion::from_similar_tasks(
            instance, score, ids, success_rate,
        ))
    }

    /// Record a routing decision as an episode
    pub async fn record_routing(
        &self,
        task: &Task,
        chosen_instance: &str,
        confidence: f64,
        strategy: &str,
        reasoning: Option<String>,
        suggestion: Option<&RoutingSuggestion>,
    ) -> Result<RoutingEpisode> {
        let mut episode = RoutingEpisode::new(task, chosen_instance, confidence);
        episode.strategy_used = strategy.to_string();
        episode.reasoning = reasoning.or_else(|| suggestion.map(|s| s.reasoning.clone()));

        if let Some(suggestion) = suggestion {
            episode.decision_factors.insert(
                "source".to_string(),
                Value::String(suggestion.source.as_str().to_string()),
            );
            if let Some(pattern_id) = &suggestion.pattern_id {
                episode
                    .decision_factors
                    .insert("pattern_id".to_string(), Value::String(pattern_id.clone()));
            }
            if !suggestion.similar_task_ids.is_empty() {
                episode.similar_tasks_used = suggestion.similar_task_ids.clone();
                episode.decision_factors.insert(
                    "similar_task_ids".to_string(),
                    Value::Array(
                        suggestion
                            .similar_task_ids
                            .iter()
                            .map(|id| Value::String(id.clone()))
                            .collect(),
                    ),
                );
            }
        }

        if let Some(context) = self.working.get_context(&task.id).await? {
            episode.available_instances = context
                .available_instances
                .iter()
                .map(|i| i.instance_id.clone())
                .collect();
        }

        let episode = self.episodic.record_episode(episode).await?;
        info!(episode_id = %episode.id, task_id = %task.id, "recorded routing decision");
        Ok(episode)
    }

    /// Record the outcome of the latest routing decision for a task.
    ///
    /// Propagates to the pattern behind the decision when there was one.
    pub async fn record_outcome(
        &self,
        task_id: &str,
        success: bool,
        duration: Option<String>,
        notes: Option<String>,
    ) -> Result<LearningReport> {
        let mut report = LearningReport::default();

        let Some(episode) = self.episodic.latest_for_task(task_id).await? else {
            return Ok(report);
        };

        let was_completed = episode.is_completed();
        let episode = self
            .episodic
            .record_outcome(&episode.id, success, duration, notes)
            .await?;
        if !was_completed {
            report.episodes_updated = 1;

            if let Some(pattern_id) = episode.pattern_id() {
                self.consolidated.update_confidence(pattern_id, success)?;
                report.patterns_updated = 1;
            }
        }

        Ok(report)
    }

    /// Process user feedback: upsert the record, mark the episode, and
    /// propagate to the pattern behind the decision.
    pub async fn process_feedback(
        &self,
        task_id: &str,
        input: FeedbackInput,
    ) -> Result<LearningReport> {
        let mut report = LearningReport::default();
        let was_good_match = input.was_good_match;

        self.feedback.record_feedback(task_id, input).await?;
        report.feedback_processed = 1;

        if let Some(verdict) = was_good_match {
            if let Some(episode) = self.episodic.latest_for_task(task_id).await? {
                if let Some(pattern_id) = episode.pattern_id() {
                    self.consolidated.update_confidence(pattern_id, verdict)?;
                    report.patterns_updated = 1;
                }
                report.episodes_updated = 1;
            }
        }

        Ok(report)
    }

    /// Run pattern consolidation over recent episodes
    pub async fn run_consolidation(
        &self,
        since: Option<DateTime<Utc>>,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationReport> {
        self.extractor
            .run_consolidation(since, self.config.consolidation_min_confidence, cancel)
            .await
    }

    /// Sweep expired working-memory entries
    pub async fn clear_expired_contexts(&self) -> Result<usize> {
        self.working.clear_expired().await
    }
}
