//! Memory system configuration

use std::time::Duration;

/// Tuning knobs for the memory subsystem
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// TTL for cached routing contexts
    pub context_ttl: Duration,
    /// Working-memory entry cap (LRU eviction beyond this)
    pub working_max_entries: usize,
    /// Similar tasks attached to a context
    pub max_similar_tasks: usize,
    /// Recent decisions attached to a context
    pub max_recent_decisions: usize,
    /// Episode retention horizon in days
    pub episode_retention_days: i64,
    /// Text weight in the combined similarity score
    pub text_weight: f64,
    /// Tag weight in the combined similarity score
    pub tag_weight: f64,
    /// Similarity corpus document cap
    pub max_corpus: usize,
    /// Similarity corpus age cap in days
    pub corpus_max_age_days: i64,
    /// Minimum episodes per bucket to mine a pattern
    pub consolidation_min_episodes: usize,
    /// Minimum confidence for a mined pattern candidate. Low enough that a
    /// small all-successful bucket (two required tags, five episodes)
    /// clears the bar.
    pub consolidation_min_confidence: f64,
    /// Window for incremental consolidation runs
    pub consolidation_window_days: i64,
    /// Window for full consolidation runs
    pub consolidation_full_window_days: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_ttl: Duration::from_secs(3600),
            working_max_entries: 10_000,
            max_similar_tasks: 10,
            max_recent_decisions: 20,
            episode_retention_days: 90,
            text_weight: 0.6,
            tag_weight: 0.4,
            max_corpus: 10_000,
            corpus_max_age_days: 90,
            consolidation_min_episodes: 3,
            consolidation_min_confidence: 0.3,
            consolidation_window_days: 7,
            consolidation_full_window_days: 30,
        }
    }
}

impl MemoryConfig {
    /// Small limits and short TTLs, for tests
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            context_ttl: Duration::from_secs(60),
            working_max_entries: 64,
            max_corpus: 128,
            ..Self::default()
        }
    }
}
