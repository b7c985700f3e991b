//! Task searcher: similarity corpus over the task store
//!
//! Indexes tasks (title + description, tags) into a [`TaskSimilarity`]
//! corpus and resolves matches back to task metadata. Point add/remove are
//! cheap; the full reindex is a rare operation that takes the corpus write
//! lock and honors cancellation between documents.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hopper_core::{Result, Task, TaskStatus};
use hopper_storage::TaskStore;

use super::similarity::TaskSimilarity;

/// A similar task resolved to its metadata
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Task id
    pub task_id: String,
    /// Title at index time
    pub title: String,
    /// Project at index time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Tags at index time
    pub tags: Vec<String>,
    /// Blended similarity score
    pub similarity_score: f64,
    /// Text component
    pub text_score: f64,
    /// Tag component
    pub tag_score: f64,
    /// Holding instance at index time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Status at index time
    pub status: TaskStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Searcher health counters
#[derive(Debug, Clone, Serialize)]
pub struct SearcherStatistics {
    /// Whether an index has been built
    pub indexed: bool,
    /// Documents in the corpus
    pub corpus_size: usize,
    /// Distinct terms across the corpus
    pub unique_terms: usize,
    /// Text weight of the blend
    pub text_weight: f64,
    /// Tag weight of the blend
    pub tag_weight: f64,
}

#[derive(Debug, Clone)]
struct TaskMeta {
    title: String,
    project: Option<String>,
    tags: Vec<String>,
    instance_id: Option<String>,
    status: TaskStatus,
    created_at: DateTime<Utc>,
}

struct Corpus {
    similarity: TaskSimilarity,
    meta: HashMap<String, TaskMeta>,
    indexed: bool,
}

/// Similarity search over a [`TaskStore`]
pub struct TaskSearcher {
    tasks: Arc<dyn TaskStore>,
    corpus: RwLock<Corpus>,
}

impl TaskSearcher {
    /// Create a searcher with default weights (0.6 text / 0.4 tags)
    #[must_use]
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self::with_similarity(tasks, TaskSimilarity::default())
    }

    /// Create with a tuned similarity engine
    #[must_use]
    pub fn with_similarity(tasks: Arc<dyn TaskStore>, similarity: TaskSimilarity) -> Self {
        Self {
            tasks,
            corpus: RwLock::new(Corpus {
                similarity,
                meta: HashMap::new(),
                indexed: false,
            }),
        }
    }

    fn meta_of(task: &Task) -> TaskMeta {
        TaskMeta {
            title: task.title.clone(),
            project: task.project.clone(),
            tags: task.tags.clone(),
            instance_id: task.instance_id.clone(),
            status: task.status,
            created_at: task.created_at,
        }
    }

    /// Rebuild the whole corpus from the task store.
    ///
    /// Blocks concurrent writers for the duration; honors `cancel` between
    /// documents and keeps whatever was indexed before cancellation.
    pub async fn reindex(&self, cancel: &CancellationToken) -> Result<usize> {
        let all = self.tasks.all().await?;

        let mut corpus = self.corpus.write();
        corpus.similarity.clear();
        corpus.meta.clear();

        for task in &all {
            if cancel.is_cancelled() {
                debug!("reindex cancelled, keeping partial corpus");
                break;
            }
            corpus.similarity.add_document(
                &task.id,
                &task.search_text(),
                &task.tags,
                task.created_at,
            );
            corpus.meta.insert(task.id.clone(), Self::meta_of(task));
        }
        corpus.similarity.prune_aged();
        corpus.indexed = true;

        let count = corpus.similarity.corpus_size();
        info!(count, "indexed tasks for similarity search");
        Ok(count)
    }

    async fn ensure_indexed(&self) -> Result<()> {
        if self.corpus.read().indexed {
            return Ok(());
        }
        self.reindex(&CancellationToken::new()).await?;
        Ok(())
    }

    /// Add a single task to the corpus
    pub fn add_task(&self, task: &Task) {
        let mut corpus = self.corpus.write();
        corpus
            .similarity
            .add_document(&task.id, &task.search_text(), &task.tags, task.created_at);
        corpus.meta.insert(task.id.clone(), Self::meta_of(task));
    }

    /// Remove a task from the corpus; returns whether it was present
    pub fn remove_task(&self, task_id: &str) -> bool {
        let mut corpus = self.corpus.write();
        corpus.meta.remove(task_id);
        corpus.similarity.remove_document(task_id)
    }

    /// Free-text similarity search
    pub async fn search(
        &self,
        text: &str,
        tags: &[String],
        limit: usize,
        min_score: f64,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_indexed().await?;

        let corpus = self.corpus.read();
        let similar = corpus
            .similarity
            .find_similar(text, tags, limit, min_score, exclude_ids);

        Ok(similar
            .into_iter()
            .filter_map(|s| {
                corpus.meta.get(&s.task_id).map(|meta| SearchResult {
                    task_id: s.task_id,
                    title: meta.title.clone(),
                    project: meta.project.clone(),
                    tags: meta.tags.clone(),
                    similarity_score: s.score,
                    text_score: s.text_score,
                    tag_score: s.tag_score,
                    instance_id: meta.instance_id.clone(),
                    status: meta.status,
                    created_at: meta.created_at,
                })
            })
            .collect())
    }

    /// Tasks similar to a given task, excluding itself
    pub async fn search_by_task(
        &self,
        task: &Task,
        limit: usize,
        min_score: f64,
    ) -> Result<Vec<SearchResult>> {
        let exclude: HashSet<String> = std::iter::once(task.id.clone()).collect();
        self.search(&task.search_text(), &task.tags, limit, min_score, &exclude)
            .await
    }

    /// Drop the corpus; the next search reindexes lazily
    pub fn clear(&self) {
        let mut corpus = self.corpus.write();
        corpus.similarity.clear();
        corpus.meta.clear();
        corpus.indexed = false;
    }

    /// Health counters
    #[must_use]
    pub fn statistics(&self) -> SearcherStatistics {
        let corpus = self.corpus.read();
        SearcherStatistics {
            indexed: corpus.indexed,
            corpus_size: corpus.similarity.corpus_size(),
            unique_terms: corpus.similarity.unique_terms(),
            text_weight: corpus.similarity.text_weight(),
            tag_weight: corpus.similarity.tag_weight(),
        }
    }
}
