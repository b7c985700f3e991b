//! In-memory task store
//!
//! Thread-safe implementation over `parking_lot::RwLock<HashMap>`, suitable
//! for tests and single-process deployments. Lock scopes never span an
//! `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use hopper_core::{HopperError, Result, Task, TaskStatus};

use crate::traits::{apply_transition, sort_for_listing, Page, TaskFilter, TaskPatch, TaskSpec, TaskStore};

/// Map-backed [`TaskStore`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<String, Task>>>,
}

impl InMemoryTaskStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pre-built task, overwriting any existing one with the same id.
    ///
    /// Test seam; production callers go through [`TaskStore::create`].
    pub fn insert(&self, task: Task) {
        self.tasks.write().insert(task.id.clone(), task);
    }

    fn filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks
            .read()
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, spec: TaskSpec) -> Result<Task> {
        let task = spec.into_task()?;
        debug!(task_id = %task.id, title = %task.title, "created task");
        self.tasks.write().insert(task.id.clone(), task.clone());
        Ok(task)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| HopperError::not_found("task", id))?;
        patch.apply(task);
        Ok(task.clone())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.tasks.write().remove(id).is_some())
    }

    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, usize)> {
        let mut matches = self.filtered(filter);
        sort_for_listing(&mut matches);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok((items, total))
    }

    async fn search(
        &self,
        query: &str,
        filter: &TaskFilter,
        page: Page,
    ) -> Result<(Vec<Task>, usize)> {
        let needle = query.to_lowercase();
        let mut matches: Vec<Task> = self
            .filtered(filter)
            .into_iter()
            .filter(|t| t.search_text().to_lowercase().contains(&needle))
            .collect();
        sort_for_listing(&mut matches);
        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok((items, total))
    }

    async fn transition_status(&self, id: &str, new_status: TaskStatus) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| HopperError::not_found("task", id))?;
        apply_transition(task, new_status)?;
        debug!(task_id = %id, status = %new_status, "task transitioned");
        Ok(task.clone())
    }

    async fn assign_instance(
        &self,
        id: &str,
        expected: Option<&str>,
        new_instance: Option<String>,
    ) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| HopperError::not_found("task", id))?;

        if task.instance_id.as_deref() != expected {
            return Err(HopperError::ConflictingUpdate);
        }

        task.instance_id = new_instance;
        task.updated_at = chrono::Utc::now();
        Ok(task.clone())
    }

    async fn all(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.read().values().cloned().collect();
        sort_for_listing(&mut tasks);
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_core::TaskPriority;

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryTaskStore::new();
        let task = store
            .create(TaskSpec::titled("implement login"))
            .await
            .unwrap();

        let fetched = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.title, "implement login");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn create_rejects_empty_title() {
        let store = InMemoryTaskStore::new();
        let err = store.create(TaskSpec::titled("  ")).await.unwrap_err();
        assert!(matches!(err, HopperError::Validation { .. }));
    }

    #[tokio::test]
    async fn transition_enforces_state_machine() {
        let store = InMemoryTaskStore::new();
        let task = store.create(TaskSpec::titled("t")).await.unwrap();

        // pending -> in_progress is not legal; must claim first
        let err = store
            .transition_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::InvalidStateTransition { .. }));

        store
            .transition_status(&task.id, TaskStatus::Claimed)
            .await
            .unwrap();
        let started = store
            .transition_status(&task.id, TaskStatus::InProgress)
            .await
            .unwrap();
        assert!(started.started_at.is_some());

        let done = store
            .transition_status(&task.id, TaskStatus::Done)
            .await
            .unwrap();
        assert!(done.stopped_at.is_some());

        // terminal states admit nothing
        let err = store
            .transition_status(&task.id, TaskStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::InvalidStateTransition { .. }));
    }

    #[tokio::test]
    async fn assign_instance_is_compare_and_set() {
        let store = InMemoryTaskStore::new();
        let task = store.create(TaskSpec::titled("t")).await.unwrap();

        store
            .assign_instance(&task.id, None, Some("hop-a".into()))
            .await
            .unwrap();

        // stale expectation loses the race
        let err = store
            .assign_instance(&task.id, None, Some("hop-b".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::ConflictingUpdate));

        let task = store
            .assign_instance(&task.id, Some("hop-a"), Some("hop-b".into()))
            .await
            .unwrap();
        assert_eq!(task.instance_id.as_deref(), Some("hop-b"));
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = InMemoryTaskStore::new();
        for i in 0..5 {
            let mut spec = TaskSpec::titled(format!("task {i}"));
            spec.priority = if i % 2 == 0 {
                TaskPriority::High
            } else {
                TaskPriority::Low
            };
            spec.tags = vec!["api".into()];
            store.create(spec).await.unwrap();
        }

        let filter = TaskFilter {
            priority: Some(TaskPriority::High),
            tag: Some("api".into()),
            ..TaskFilter::default()
        };
        let (items, total) = store
            .list(&filter, Page { offset: 0, limit: 2 })
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
    }

    #[tokio::test]
    async fn search_matches_title_and_description() {
        let store = InMemoryTaskStore::new();
        let mut spec = TaskSpec::titled("fix auth bug");
        spec.description = Some("users cannot log in with SSO".into());
        store.create(spec).await.unwrap();
        store.create(TaskSpec::titled("update docs")).await.unwrap();

        let (items, total) = store
            .search("sso", &TaskFilter::default(), Page::default())
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(items[0].title, "fix auth bug");
    }
}
