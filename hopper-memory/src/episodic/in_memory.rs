//! In-memory episodic store
//!
//! Thread-safe implementation over `parking_lot::RwLock<HashMap>`. Outcome
//! writes serialize on the store lock, which also gives the per-episode
//! write-once guarantee.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use hopper_core::{HopperError, Result};

use crate::types::RoutingEpisode;

use super::{EpisodeStatistics, EpisodicStore};

/// Map-backed [`EpisodicStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryEpisodicStore {
    episodes: Arc<RwLock<HashMap<String, RoutingEpisode>>>,
}

impl InMemoryEpisodicStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted_desc(mut episodes: Vec<RoutingEpisode>) -> Vec<RoutingEpisode> {
        episodes.sort_by(|a, b| b.routed_at.cmp(&a.routed_at).then_with(|| a.id.cmp(&b.id)));
        episodes
    }
}

#[async_trait]
impl EpisodicStore for InMemoryEpisodicStore {
    async fn record_episode(&self, episode: RoutingEpisode) -> Result<RoutingEpisode> {
        info!(episode_id = %episode.id, task_id = %episode.task_id, chosen = %episode.chosen_instance, "recorded episode");
        self.episodes
            .write()
            .insert(episode.id.clone(), episode.clone());
        Ok(episode)
    }

    async fn record_outcome(
        &self,
        episode_id: &str,
        success: bool,
        duration: Option<String>,
        notes: Option<String>,
    ) -> Result<RoutingEpisode> {
        let mut episodes = self.episodes.write();
        let episode = episodes
            .get_mut(episode_id)
            .ok_or_else(|| HopperError::not_found("episode", episode_id))?;

        if episode.is_completed() {
            debug!(episode_id, "outcome already recorded, skipping");
            return Ok(episode.clone());
        }

        episode.record_outcome(success, duration, notes);
        info!(episode_id, success, "recorded outcome");
        Ok(episode.clone())
    }

    async fn get(&self, episode_id: &str) -> Result<Option<RoutingEpisode>> {
        Ok(self.episodes.read().get(episode_id).cloned())
    }

    async fn for_task(&self, task_id: &str) -> Result<Vec<RoutingEpisode>> {
        let episodes = self
            .episodes
            .read()
            .values()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        Ok(Self::sorted_desc(episodes))
    }

    async fn latest_for_task(&self, task_id: &str) -> Result<Option<RoutingEpisode>> {
        Ok(self.for_task(task_id).await?.into_iter().next())
    }

    async fn for_instance(&self, instance_id: &str, limit: usize) -> Result<Vec<RoutingEpisode>> {
        let episodes = self
            .episodes
            .read()
            .values()
            .filter(|e| e.chosen_instance == instance_id)
            .cloned()
            .collect();
        Ok(Self::sorted_desc(episodes).into_iter().take(limit).collect())
    }

    async fn successful(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RoutingEpisode>> {
        let episodes = self
            .episodes
            .read()
            .values()
            .filter(|e| e.is_success() && since.is_none_or(|s| e.routed_at >= s))
            .cloned()
            .collect();
        Ok(Self::sorted_desc(episodes).into_iter().take(limit).collect())
    }

    async fn failed(
        &self,
        limit: usize,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RoutingEpisode>> {
        let episodes = self
            .episodes
            .read()
            .values()
            .filter(|e| {
                e.outcome.as_ref().is_some_and(|o| !o.success)
                    && since.is_none_or(|s| e.routed_at >= s)
            })
            .cloned()
            .collect();
        Ok(Self::sorted_desc(episodes).into_iter().take(limit).collect())
    }

    async fn pending(&self, limit: usize) -> Result<Vec<RoutingEpisode>> {
        let episodes = self
            .episodes
            .read()
            .values()
            .filter(|e| !e.is_completed())
            .cloned()
            .collect();
        Ok(Self::sorted_desc(episodes).into_iter().take(limit).collect())
    }

    async fn statistics(&self, since: Option<DateTime<Utc>>) -> Result<EpisodeStatistics> {
        let episodes = self.episodes.read();
        let windowed: Vec<&RoutingEpisode> = episodes
            .values()
            .filter(|e| since.is_none_or(|s| e.routed_at >= s))
            .collect();

        let total = windowed.len();
        let successful = windowed.iter().filter(|e| e.is_success()).count();
        let failed = windowed
            .iter()
            .filter(|e| e.outcome.as_ref().is_some_and(|o| !o.success))
            .count();
        let pending = total - successful - failed;

        let completed = successful + failed;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if completed > 0 {
            successful as f64 / completed as f64
        } else {
            0.0
        };
        #[allow(clippy::cast_precision_loss)]
        let average_confidence = if total > 0 {
            windowed.iter().map(|e| e.confidence).sum::<f64>() / total as f64
        } else {
            0.0
        };

        Ok(EpisodeStatistics {
            total_episodes: total,
            successful,
            failed,
            pending,
            success_rate,
            average_confidence,
            since,
        })
    }

    async fn cleanup(&self, retention_days: i64) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut episodes = self.episodes.write();
        let before = episodes.len();
        episodes.retain(|_, e| e.routed_at >= cutoff);
        let removed = before - episodes.len();
        if removed > 0 {
            info!(removed, retention_days, "cleaned up old episodes");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::Task;

    fn episode_for(title: &str, chosen: &str) -> RoutingEpisode {
        let task = Task::new(title);
        RoutingEpisode::new(&task, chosen, 0.7)
    }

    #[tokio::test]
    async fn record_and_fetch() {
        let store = InMemoryEpisodicStore::new();
        let episode = store
            .record_episode(episode_for("t", "hop-a"))
            .await
            .unwrap();

        let fetched = store.get(&episode.id).await.unwrap().unwrap();
        assert_eq!(fetched.chosen_instance, "hop-a");
        assert!(!fetched.is_completed());
    }

    #[tokio::test]
    async fn outcome_is_idempotent() {
        let store = InMemoryEpisodicStore::new();
        let episode = store
            .record_episode(episode_for("t", "hop-a"))
            .await
            .unwrap();

        let first = store
            .record_outcome(&episode.id, true, Some("1h".into()), None)
            .await
            .unwrap();
        assert!(first.is_success());

        // flipping the verdict afterwards is a no-op
        let second = store
            .record_outcome(&episode.id, false, None, None)
            .await
            .unwrap();
        assert!(second.is_success());
        assert_eq!(second.completed_at, first.completed_at);
    }

    #[tokio::test]
    async fn latest_for_task_prefers_most_recent() {
        let store = InMemoryEpisodicStore::new();
        let task = Task::new("t");

        let mut older = RoutingEpisode::new(&task, "hop-a", 0.5);
        older.routed_at = Utc::now() - Duration::minutes(5);
        store.record_episode(older).await.unwrap();

        let newer = RoutingEpisode::new(&task, "hop-b", 0.9);
        store.record_episode(newer.clone()).await.unwrap();

        let latest = store.latest_for_task(&task.id).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[tokio::test]
    async fn statistics_and_windows() {
        let store = InMemoryEpisodicStore::new();
        for i in 0..4 {
            let episode = store
                .record_episode(episode_for(&format!("t{i}"), "hop-a"))
                .await
                .unwrap();
            if i < 2 {
                store
                    .record_outcome(&episode.id, true, None, None)
                    .await
                    .unwrap();
            } else if i == 2 {
                store
                    .record_outcome(&episode.id, false, None, None)
                    .await
                    .unwrap();
            }
        }

        let stats = store.statistics(None).await.unwrap();
        assert_eq!(stats.total_episodes, 4);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);

        let successes = store.successful(10, None).await.unwrap();
        assert_eq!(successes.len(), 2);
    }

    #[tokio::test]
    async fn cleanup_respects_retention() {
        let store = InMemoryEpisodicStore::new();
        let task = Task::new("old");
        let mut old = RoutingEpisode::new(&task, "hop-a", 0.5);
        old.routed_at = Utc::now() - Duration::days(120);
        store.record_episode(old).await.unwrap();
        store
            .record_episode(episode_for("new", "hop-a"))
            .await
            .unwrap();

        assert_eq!(store.cleanup(90).await.unwrap(), 1);
        assert_eq!(store.cleanup(90).await.unwrap(), 0);
        assert_eq!(store.statistics(None).await.unwrap().total_episodes, 1);
    }
}
