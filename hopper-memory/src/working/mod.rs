//! Working memory: short-lived routing contexts keyed by task id
//!
//! A thin cache in front of context assembly. Two backend families share
//! one interface: [`LocalBackend`] (in-process TTL map with approximate-LRU
//! eviction) and any remote TTL key-value store implementing
//! [`MemoryBackend`].

mod local;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use hopper_core::Result;

use crate::types::{RoutingContext, SimilarTask};

pub use local::LocalBackend;

/// TTL key-value interface backing working memory
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// Get a live value; expired entries read as absent
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Set a value with an optional TTL
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Live keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Drop everything; returns the number of entries removed
    async fn clear(&self) -> Result<usize>;

    /// Sweep expired entries; idempotent
    async fn clear_expired(&self) -> Result<usize>;

    /// Number of live entries
    async fn len(&self) -> Result<usize>;
}

/// Working memory over a [`MemoryBackend`]
pub struct WorkingMemory {
    backend: Arc<dyn MemoryBackend>,
    default_ttl: Duration,
    max_similar_tasks: usize,
}

impl WorkingMemory {
    /// Create over an explicit backend
    #[must_use]
    pub fn new(backend: Arc<dyn MemoryBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
            max_similar_tasks: 10,
        }
    }

    /// In-process working memory with defaults (1 hour TTL, 10k entries)
    #[must_use]
    pub fn local() -> Self {
        Self::new(Arc::new(LocalBackend::new(10_000)), Duration::from_secs(3600))
    }

    /// Cap on similar tasks attached to a context
    #[must_use]
    pub const fn with_max_similar_tasks(mut self, max: usize) -> Self {
        self.max_similar_tasks = max;
        self
    }

    fn context_key(task_id: &str) -> String {
        format!("context:{task_id}")
    }

    /// Cached context for a task, if still live
    pub async fn get_context(&self, task_id: &str) -> Result<Option<RoutingContext>> {
        let Some(value) = self.backend.get(&Self::context_key(task_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(value)?))
    }

    /// Cache a context under its task id
    pub async fn set_context(&self, context: &RoutingContext, ttl: Option<Duration>) -> Result<()> {
        let key = Self::context_key(&context.task_id);
        let value = serde_json::to_value(context)?;
        self.backend
            .set(&key, value, Some(ttl.unwrap_or(self.default_ttl)))
            .await
    }

    /// Drop the cached context for a task
    pub async fn delete_context(&self, task_id: &str) -> Result<bool> {
        self.backend.delete(&Self::context_key(task_id)).await
    }

    /// Enrich an existing cached context with similar tasks.
    ///
    /// Returns false when no context is cached for the task.
    pub async fn add_similar_tasks(
        &self,
        task_id: &str,
        similar_tasks: Vec<SimilarTask>,
    ) -> Result<bool> {
        let Some(mut context) = self.get_context(task_id).await? else {
            return Ok(false);
        };
        context.similar_tasks = similar_tasks
            .into_iter()
            .take(self.max_similar_tasks)
            .collect();
        self.set_context(&context, None).await?;
        Ok(true)
    }

    /// Sweep expired entries
    pub async fn clear_expired(&self) -> Result<usize> {
        self.backend.clear_expired().await
    }

    /// Drop all cached contexts
    pub async fn clear_all(&self) -> Result<usize> {
        self.backend.clear().await
    }

    /// Number of live cached contexts
    pub async fn size(&self) -> Result<usize> {
        self.backend.len().await
    }
}
