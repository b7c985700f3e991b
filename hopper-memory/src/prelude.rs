//! Convenience re-exports for memory consumers

pub use crate::config::MemoryConfig;
pub use crate::consolidated::{
    ConsolidatedStore, ConsolidationReport, PatternExtractor, PatternType, RoutingPattern,
    TagCriteria, TextCriteria,
};
pub use crate::episodic::{EpisodeStatistics, EpisodicStore, InMemoryEpisodicStore};
pub use crate::feedback::{FeedbackAnalytics, FeedbackInput, FeedbackStore};
pub use crate::learning::{LearningEngine, LearningReport, RoutingSuggestion, SuggestionSource};
pub use crate::search::{SearchResult, TaskSearcher, TaskSimilarity};
pub use crate::types::{
    EpisodeOutcome, InstanceInfo, RoutingContext, RoutingEpisode, SimilarTask, TaskSnapshot,
};
pub use crate::working::{LocalBackend, MemoryBackend, WorkingMemory};
