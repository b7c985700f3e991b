//! # Three-tier memory system for Hopper
//!
//! This crate provides the memory architecture behind Hopper's routing
//! decisions, in three tiers:
//! - **Working**: short-lived routing contexts keyed by task id (TTL cache)
//! - **Episodic**: audit records of routing decisions and their outcomes
//! - **Consolidated**: learned routing patterns mined from successful episodes
//!
//! ## Architecture
//!
//! ```text
//! LearningEngine
//! ├── WorkingMemory    (TTL cache of RoutingContext)
//! ├── EpisodicStore    (RoutingEpisode lifecycle: record → outcome)
//! ├── TaskSearcher     (TF-IDF + Jaccard over the task corpus)
//! ├── ConsolidatedStore (RoutingPattern matching + confidence updates)
//! ├── PatternExtractor (mines patterns from successful episodes)
//! └── FeedbackStore    (user verdicts, propagated to episodes and patterns)
//! ```
//!
//! All components are explicit dependencies injected into the engine; there
//! is no process-wide state.

pub mod config;
pub mod consolidated;
pub mod episodic;
pub mod feedback;
pub mod learning;
pub mod prelude;
pub mod search;
pub mod types;
pub mod working;

pub use config::MemoryConfig;
pub use consolidated::{ConsolidatedStore, PatternExtractor, PatternType, RoutingPattern};
pub use episodic::{EpisodicStore, InMemoryEpisodicStore};
pub use feedback::{FeedbackAnalytics, FeedbackInput, FeedbackStore};
pub use learning::{LearningEngine, RoutingSuggestion, SuggestionSource};
pub use search::{TaskSearcher, TaskSimilarity};
pub use types::{
    EpisodeOutcome, InstanceInfo, RecentDecision, RoutingContext, RoutingEpisode, SimilarTask,
    TaskSnapshot,
};
pub use working::{LocalBackend, MemoryBackend, WorkingMemory};
