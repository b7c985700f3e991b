//! Pattern extractor: mines routing patterns from successful episodes
//!
//! Consolidation buckets successful episodes by chosen instance, derives
//! tag/keyword/priority signals from each bucket, and persists the result.
//! Pattern names are derived from the criteria, so repeated runs refine
//! the same pattern instead of creating duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hopper_core::{Result, TaskPriority};

use crate::episodic::EpisodicStore;
use crate::types::RoutingEpisode;

use super::pattern::{PatternType, RoutingPattern, TagCriteria, TextCriteria};
use super::store::ConsolidatedStore;

/// Fraction of a bucket a tag must cover to become required
const REQUIRED_TAG_SHARE: f64 = 0.8;
/// Lower bound for optional tags (upper bound is the required share)
const OPTIONAL_TAG_SHARE: f64 = 0.3;
/// Fraction of a bucket the mode priority must cover
const PRIORITY_SHARE: f64 = 0.7;
/// Fraction of a bucket a title keyword must cover
const KEYWORD_SHARE: f64 = 0.5;
/// Keywords kept per pattern
const MAX_KEYWORDS: usize = 5;

/// A mined pattern candidate before persistence
#[derive(Debug, Clone)]
pub struct PatternCandidate {
    /// Instance the bucket routed to
    pub target_instance: String,
    /// Derived tag criteria
    pub tag_criteria: TagCriteria,
    /// Derived text criteria
    pub text_criteria: TextCriteria,
    /// Derived priority criterion
    pub priority_criteria: Option<TaskPriority>,
    /// Bucket size
    pub episode_count: usize,
    /// Contributing episode ids
    pub episode_ids: Vec<String>,
    /// Derived confidence
    pub confidence: f64,
}

impl PatternCandidate {
    fn has_signal(&self) -> bool {
        !self.tag_criteria.is_empty()
            || !self.text_criteria.keywords.is_empty()
            || self.priority_criteria.is_some()
    }

    fn pattern_type(&self) -> PatternType {
        let has_tags = !self.tag_criteria.is_empty();
        let has_text = !self.text_criteria.keywords.is_empty();
        match (has_tags, has_text) {
            (true, true) => PatternType::Combined,
            (true, false) => PatternType::Tag,
            (false, true) => PatternType::Text,
            (false, false) => PatternType::Priority,
        }
    }

    /// Naming convention: `{req1-req2-req3}_{priority}_to-{target}`, with
    /// absent parts dropped. Determines idempotency of repeated runs.
    fn name(&self) -> String {
        let mut parts = Vec::new();
        if !self.tag_criteria.required.is_empty() {
            let head: Vec<&str> = self
                .tag_criteria
                .required
                .iter()
                .take(3)
                .map(String::as_str)
                .collect();
            parts.push(head.join("-"));
        }
        if let Some(priority) = self.priority_criteria {
            parts.push(priority.as_str().to_string());
        }
        parts.push(format!("to-{}", self.target_instance));
        parts.join("_")
    }
}

/// Summary of one consolidation run
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    /// Candidates that cleared the confidence bar
    pub candidates_found: usize,
    /// New patterns created
    pub patterns_created: usize,
    /// Existing patterns refined instead
    pub patterns_refined: usize,
    /// Ids of the created patterns
    pub created_pattern_ids: Vec<String>,
    /// Patterns in the store after the run
    pub total_patterns: usize,
    /// Active patterns after the run
    pub active_patterns: usize,
    /// Window start used for this run
    pub since: DateTime<Utc>,
}

/// Mines patterns from episodic memory into the consolidated store
pub struct PatternExtractor {
    episodic: Arc<dyn EpisodicStore>,
    consolidated: Arc<ConsolidatedStore>,
    min_episodes: usize,
    window_days: i64,
}

impl PatternExtractor {
    /// Episodes fetched per run
    const FETCH_LIMIT: usize = 1000;

    /// Create an extractor over the two stores
    #[must_use]
    pub fn new(episodic: Arc<dyn EpisodicStore>, consolidated: Arc<ConsolidatedStore>) -> Self {
        Self {
            episodic,
            consolidated,
            min_episodes: 3,
            window_days: 7,
        }
    }

    /// Minimum bucket size to mine a pattern (default 3)
    #[must_use]
    pub const fn with_min_episodes(mut self, min_episodes: usize) -> Self {
        self.min_episodes = min_episodes;
        self
    }

    /// Default window for incremental runs (default 7 days)
    #[must_use]
    pub const fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self
    }

    /// Mine candidates from successful episodes newer than `since`
    pub async fn extract_candidates(
        &self,
        since: DateTime<Utc>,
        min_confidence: f64,
    ) -> Result<Vec<PatternCandidate>> {
        let episodes = self
            .episodic
            .successful(Self::FETCH_LIMIT, Some(since))
            .await?;
        if episodes.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_instance: HashMap<String, Vec<&RoutingEpisode>> = HashMap::new();
        for episode in &episodes {
            by_instance
                .entry(episode.chosen_instance.clone())
                .or_default()
                .push(episode);
        }

        let mut candidates: Vec<PatternCandidate> = by_instance
            .into_iter()
            .filter(|(_, bucket)| bucket.len() >= self.min_episodes)
            .filter_map(|(instance, bucket)| Self::candidate_for_bucket(&instance, &bucket))
            .filter(|c| c.confidence >= min_confidence)
            .collect();

        // Deterministic run order regardless of bucket map iteration.
        candidates.sort_by(|a, b| a.target_instance.cmp(&b.target_instance));
        Ok(candidates)
    }

    fn candidate_for_bucket(
        instance: &str,
        bucket: &[&RoutingEpisode],
    ) -> Option<PatternCandidate> {
        #[allow(clippy::cast_precision_loss)]
        let total = bucket.len() as f64;

        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        let mut priority_counts: HashMap<TaskPriority, usize> = HashMap::new();
        let mut word_counts: HashMap<String, usize> = HashMap::new();

        for episode in bucket {
            let snapshot = &episode.task_snapshot;
            for tag in &snapshot.tags {
                *tag_counts.entry(tag.as_str()).or_insert(0) += 1;
            }
            *priority_counts.entry(snapshot.priority).or_insert(0) += 1;
            for word in snapshot.title.to_lowercase().split_whitespace() {
                if word.len() > 3 {
                    *word_counts.entry(word.to_string()).or_insert(0) += 1;
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let share = |count: usize| count as f64 / total;

        let mut required: Vec<String> = tag_counts
            .iter()
            .filter(|(_, &count)| share(count) >= REQUIRED_TAG_SHARE)
            .map(|(tag, _)| (*tag).to_string())
            .collect();
        required.sort();

        let mut optional: Vec<String> = tag_counts
            .iter()
            .filter(|(_, &count)| {
                let s = share(count);
                (OPTIONAL_TAG_SHARE..REQUIRED_TAG_SHARE).contains(&s)
            })
            .map(|(tag, _)| (*tag).to_string())
            .collect();
        optional.sort();

        let priority_criteria = priority_counts
            .iter()
            .max_by_key(|(_, &count)| count)
            .filter(|(_, &count)| share(count) >= PRIORITY_SHARE)
            .map(|(&priority, _)| priority);

        let mut keywords: Vec<(String, usize)> = word_counts
            .into_iter()
            .filter(|(_, count)| share(*count) >= KEYWORD_SHARE)
            .collect();
        keywords.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let keywords: Vec<String> = keywords
            .into_iter()
            .take(MAX_KEYWORDS)
            .map(|(word, _)| word)
            .collect();

        let candidate = PatternCandidate {
            target_instance: instance.to_string(),
            confidence: Self::candidate_confidence(required.len(), keywords.len(), bucket.len()),
            tag_criteria: TagCriteria { required, optional },
            text_criteria: TextCriteria { keywords },
            priority_criteria,
            episode_count: bucket.len(),
            episode_ids: bucket.iter().map(|e| e.id.clone()).collect(),
        };

        candidate.has_signal().then_some(candidate)
    }

    /// Additive confidence: base 0.1, plus up to 0.4 for required tags,
    /// up to 0.2 for keywords, and up to 0.3 for bucket size.
    fn candidate_confidence(required: usize, keywords: usize, episodes: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let confidence = 0.1
            + f64::min(0.4, 0.1 * required as f64)
            + f64::min(0.2, 0.05 * keywords as f64)
            + f64::min(0.3, 0.03 * episodes as f64);
        confidence.min(1.0)
    }

    /// Run a consolidation cycle: mine candidates, create or refine
    /// patterns, and report. Honors `cancel` between candidates; partial
    /// progress stays committed.
    pub async fn run_consolidation(
        &self,
        since: Option<DateTime<Utc>>,
        min_confidence: f64,
        cancel: &CancellationToken,
    ) -> Result<ConsolidationReport> {
        let since = since.unwrap_or_else(|| Utc::now() - Duration::days(self.window_days));
        let candidates = self.extract_candidates(since, min_confidence).await?;

        let mut created_ids = Vec::new();
        let mut refined = 0usize;

        for candidate in &candidates {
            if cancel.is_cancelled() {
                debug!("consolidation cancelled, keeping partial progress");
                break;
            }

            let name = candidate.name();
            if let Some(existing) = self.consolidated.get_by_name(&name) {
                self.consolidated.refine(
                    &existing.id,
                    Some(&candidate.tag_criteria),
                    Some(&candidate.text_criteria),
                    Some(existing.confidence.max(candidate.confidence)),
                )?;
                refined += 1;
                continue;
            }

            let mut pattern = RoutingPattern::new(
                name,
                candidate.target_instance.clone(),
                candidate.pattern_type(),
                candidate.confidence,
            );
            if !candidate.tag_criteria.is_empty() {
                pattern.tag_criteria = Some(candidate.tag_criteria.clone());
            }
            if !candidate.text_criteria.keywords.is_empty() {
                pattern.text_criteria = Some(candidate.text_criteria.clone());
            }
            pattern.priority_criteria = candidate.priority_criteria;
            pattern.source_episodes = candidate.episode_ids.iter().take(20).cloned().collect();

            let created = self.consolidated.create(pattern)?;
            created_ids.push(created.id);
        }

        let stats = self.consolidated.statistics();
        info!(
            candidates = candidates.len(),
            created = created_ids.len(),
            refined,
            "consolidation run finished"
        );

        Ok(ConsolidationReport {
            candidates_found: candidates.len(),
            patterns_created: created_ids.len(),
            patterns_refined: refined,
            created_pattern_ids: created_ids,
            total_patterns: stats.total_patterns,
            active_patterns: stats.active_patterns,
            since,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::episodic::InMemoryEpisodicStore;
    use crate::types::RoutingEpisode;
    use hopper_core::Task;

    async fn record_success(
        store: &InMemoryEpisodicStore,
        title: &str,
        tags: &[&str],
        priority: TaskPriority,
        chosen: &str,
    ) {
        let mut task = Task::new(title);
        task.tags = tags.iter().map(ToString::to_string).collect();
        task.priority = priority;
        let episode = RoutingEpisode::new(&task, chosen, 0.7);
        let recorded = store.record_episode(episode).await.unwrap();
        store
            .record_outcome(&recorded.id, true, None, None)
            .await
            .unwrap();
    }

    fn extractor(
        episodic: &Arc<InMemoryEpisodicStore>,
        consolidated: &Arc<ConsolidatedStore>,
    ) -> PatternExtractor {
        PatternExtractor::new(
            Arc::clone(episodic) as Arc<dyn EpisodicStore>,
            Arc::clone(consolidated),
        )
    }

    #[tokio::test]
    async fn mines_required_tags_and_names_deterministically() {
        let episodic = Arc::new(InMemoryEpisodicStore::new());
        let consolidated = ConsolidatedStore::shared();

        for i in 0..5 {
            record_success(
                &episodic,
                &format!("item number {i}"),
                &["api", "python"],
                TaskPriority::Medium,
                "api",
            )
            .await;
        }

        let ext = extractor(&episodic, &consolidated);
        let report = ext
            .run_consolidation(None, 0.3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.patterns_created, 1);
        let pattern = consolidated.get_by_name("api-python_medium_to-api").unwrap();
        assert_eq!(pattern.target_instance, "api");
        let tags = pattern.tag_criteria.as_ref().unwrap();
        assert_eq!(tags.required, vec!["api", "python"]);
        assert!(pattern.confidence > 0.3);
    }

    #[tokio::test]
    async fn consolidation_is_idempotent() {
        let episodic = Arc::new(InMemoryEpisodicStore::new());
        let consolidated = ConsolidatedStore::shared();

        for i in 0..5 {
            record_success(
                &episodic,
                &format!("work item {i}"),
                &["api", "python"],
                TaskPriority::Medium,
                "api",
            )
            .await;
        }

        let ext = extractor(&episodic, &consolidated);
        let first = ext
            .run_consolidation(None, 0.3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.patterns_created, 1);
        let confidence_after_first = consolidated
            .all(true, 10)
            .first()
            .map(|p| p.confidence)
            .unwrap();

        let second = ext
            .run_consolidation(None, 0.3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(second.patterns_created, 0);
        assert_eq!(second.patterns_refined, 1);
        assert_eq!(second.total_patterns, 1);

        let confidence_after_second = consolidated
            .all(true, 10)
            .first()
            .map(|p| p.confidence)
            .unwrap();
        assert!(confidence_after_second >= confidence_after_first);
    }

    #[tokio::test]
    async fn small_buckets_are_ignored() {
        let episodic = Arc::new(InMemoryEpisodicStore::new());
        let consolidated = ConsolidatedStore::shared();

        record_success(&episodic, "one", &["api"], TaskPriority::Medium, "api").await;
        record_success(&episodic, "two", &["api"], TaskPriority::Medium, "api").await;

        let ext = extractor(&episodic, &consolidated);
        let report = ext
            .run_consolidation(None, 0.3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.candidates_found, 0);
        assert_eq!(report.patterns_created, 0);
    }

    #[tokio::test]
    async fn priority_mode_needs_dominance() {
        let episodic = Arc::new(InMemoryEpisodicStore::new());
        let consolidated = ConsolidatedStore::shared();

        // 2 high / 2 low: no priority dominates at 70%
        record_success(&episodic, "aa bb", &["ops"], TaskPriority::High, "ops").await;
        record_success(&episodic, "cc dd", &["ops"], TaskPriority::High, "ops").await;
        record_success(&episodic, "ee ff", &["ops"], TaskPriority::Low, "ops").await;
        record_success(&episodic, "gg hh", &["ops"], TaskPriority::Low, "ops").await;

        let ext = extractor(&episodic, &consolidated);
        let candidates = ext
            .extract_candidates(Utc::now() - Duration::days(1), 0.0)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].priority_criteria.is_none());
        assert_eq!(candidates[0].tag_criteria.required, vec!["ops"]);
    }

    #[tokio::test]
    async fn title_keywords_need_half_share() {
        let episodic = Arc::new(InMemoryEpisodicStore::new());
        let consolidated = ConsolidatedStore::shared();

        record_success(&episodic, "deploy billing service", &[], TaskPriority::Medium, "ops").await;
        record_success(&episodic, "deploy payments service", &[], TaskPriority::Medium, "ops").await;
        record_success(&episodic, "deploy search service", &[], TaskPriority::Low, "ops").await;

        let ext = extractor(&episodic, &consolidated);
        let candidates = ext
            .extract_candidates(Utc::now() - Duration::days(1), 0.0)
            .await
            .unwrap();

        let keywords = &candidates[0].text_criteria.keywords;
        assert!(keywords.contains(&"deploy".to_string()));
        assert!(keywords.contains(&"service".to_string()));
        assert!(!keywords.contains(&"billing".to_string()));
    }
}
