//! Episodic memory: routing episodes and their lifecycle
//!
//! Episodes are append-mostly: created at decision time, mutated exactly
//! once when the outcome lands, and swept after the retention horizon.

mod in_memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use hopper_core::Result;

use crate::types::RoutingEpisode;

pub use in_memory::InMemoryEpisodicStore;

/// Aggregate statistics over episodes
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeStatistics {
    /// Episodes counted
    pub total_episodes: usize,
    /// With a successful outcome
    pub successful: usize,
    /// With a failed outcome
    pub failed: usize,
    /// Without an outcome yet
    pub pending: usize,
    /// successes / (successes + failures)
    pub success_rate: f64,
    /// Mean decision confidence
    pub average_confidence: f64,
    /// Window start, when one was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

/// Store for routing episodes
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    /// Persist a new episode
    async fn record_episode(&self, episode: RoutingEpisode) -> Result<RoutingEpisode>;

    /// Record an episode's outcome.
    ///
    /// Idempotent: once an outcome is set it never changes; repeated calls
    /// return the episode unchanged.
    async fn record_outcome(
        &self,
        episode_id: &str,
        success: bool,
        duration: Option<String>,
        notes: Option<String>,
    ) -> Result<RoutingEpisode>;

    /// Fetch by id
    async fn get(&self, episode_id: &str) -> Result<Option<RoutingEpisode>>;

    /// All episodes for a task, most recent first
    async fn for_task(&self, task_id: &str) -> Result<Vec<RoutingEpisode>>;

    /// Most recent episode for a task
    async fn latest_for_task(&self, task_id: &str) -> Result<Option<RoutingEpisode>>;

    /// Episodes where an instance was chosen, most recent first
    async fn for_instance(&self, instance_id: &str, limit: usize) -> Result<Vec<RoutingEpisode>>;

    /// Successful episodes, most recent first, optionally windowed
    async fn successful(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RoutingEpisode>>;

    /// Failed episodes, most recent first, optionally windowed
    async fn failed(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RoutingEpisode>>;

    /// Episodes with no outcome yet, most recent first
    async fn pending(&self, limit: usize) -> Result<Vec<RoutingEpisode>>;

    /// Aggregate statistics, optionally windowed
    async fn statistics(&self, since: Option<DateTime<Utc>>) -> Result<EpisodeStatistics>;

    /// Delete episodes older than the retention horizon; returns how many
    async fn cleanup(&self, retention_days: i64) -> Result<usize>;
}
