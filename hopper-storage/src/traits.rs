//! Task store trait and query types

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use hopper_core::{HopperError, Result, Task, TaskPriority, TaskStatus};

/// Fields for creating a task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Title (required, non-empty)
    pub title: String,
    /// Long-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Explicit project assignment
    #[serde(default)]
    pub project: Option<String>,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Required executor capabilities
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    /// Upstream task ids
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Priority (defaults to medium)
    #[serde(default)]
    pub priority: TaskPriority,
    /// External tracker platform
    #[serde(default)]
    pub external_platform: Option<String>,
    /// External tracker id
    #[serde(default)]
    pub external_id: Option<String>,
    /// External tracker URL
    #[serde(default)]
    pub external_url: Option<String>,
}

impl TaskSpec {
    /// Spec with just a title
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Validate constraints and build the task
    pub(crate) fn into_task(self) -> Result<Task> {
        if self.title.trim().is_empty() {
            return Err(HopperError::validation("title", "must not be empty"));
        }

        let mut task = Task::new(self.title);
        task.description = self.description;
        task.project = self.project;
        task.tags = self.tags;
        task.required_capabilities = self.required_capabilities;
        task.depends_on = self.depends_on;
        task.priority = self.priority;
        task.external_platform = self.external_platform;
        task.external_id = self.external_id;
        task.external_url = self.external_url;
        Ok(task)
    }
}

/// Partial update applied to a task; absent fields keep their values
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New description
    #[serde(default)]
    pub description: Option<String>,
    /// New project assignment
    #[serde(default)]
    pub project: Option<String>,
    /// Replacement tag set
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Replacement capability set
    #[serde(default)]
    pub required_capabilities: Option<Vec<String>>,
    /// Replacement dependency list
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    /// New priority
    #[serde(default)]
    pub priority: Option<TaskPriority>,
    /// New owner
    #[serde(default)]
    pub owner: Option<String>,
    /// Routing confidence to record on the task
    #[serde(default)]
    pub routing_confidence: Option<f64>,
    /// Routing reasoning to record on the task
    #[serde(default)]
    pub routing_reasoning: Option<String>,
}

impl TaskPatch {
    pub(crate) fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if self.description.is_some() {
            task.description = self.description;
        }
        if self.project.is_some() {
            task.project = self.project;
        }
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        if let Some(caps) = self.required_capabilities {
            task.required_capabilities = caps;
        }
        if let Some(deps) = self.depends_on {
            task.depends_on = deps;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if self.owner.is_some() {
            task.owner = self.owner;
        }
        if self.routing_confidence.is_some() {
            task.routing_confidence = self.routing_confidence;
        }
        if self.routing_reasoning.is_some() {
            task.routing_reasoning = self.routing_reasoning;
        }
        task.updated_at = Utc::now();
    }
}

/// Filter for listing tasks
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to these statuses (empty = any)
    pub statuses: Vec<TaskStatus>,
    /// Restrict to a holding instance
    pub instance_id: Option<String>,
    /// Restrict to a project
    pub project: Option<String>,
    /// Require this tag
    pub tag: Option<String>,
    /// Restrict to a priority
    pub priority: Option<TaskPriority>,
}

impl TaskFilter {
    /// Filter by holding instance
    #[must_use]
    pub fn for_instance(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: Some(instance_id.into()),
            ..Self::default()
        }
    }

    /// Whether a task passes this filter
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if let Some(instance_id) = &self.instance_id {
            if task.instance_id.as_deref() != Some(instance_id.as_str()) {
                return false;
            }
        }
        if let Some(project) = &self.project {
            if task.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !task.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        true
    }
}

/// Pagination window
#[derive(Debug, Clone, Copy)]
pub struct Page {
    /// Entries to skip
    pub offset: usize,
    /// Maximum entries to return
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Persistence interface for tasks
///
/// Implementations must keep `list` ordering stable: newest first by
/// `created_at`, ties broken by ascending id.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a task from a spec
    async fn create(&self, spec: TaskSpec) -> Result<Task>;

    /// Fetch a task by id
    async fn get(&self, id: &str) -> Result<Option<Task>>;

    /// Apply a partial update
    async fn update(&self, id: &str, patch: TaskPatch) -> Result<Task>;

    /// Delete a task; returns whether it existed
    async fn delete(&self, id: &str) -> Result<bool>;

    /// List tasks matching a filter, paged; returns (items, total matches)
    async fn list(&self, filter: &TaskFilter, page: Page) -> Result<(Vec<Task>, usize)>;

    /// Case-insensitive substring search over title + description,
    /// combined with a filter
    async fn search(&self, query: &str, filter: &TaskFilter, page: Page)
        -> Result<(Vec<Task>, usize)>;

    /// Move a task through its status state machine
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` when the move is not allowed from the
    /// task's current status.
    async fn transition_status(&self, id: &str, new_status: TaskStatus) -> Result<Task>;

    /// Compare-and-set the holding instance.
    ///
    /// Fails with `ConflictingUpdate` when the task's current instance does
    /// not equal `expected` — the caller lost a race and should re-read.
    async fn assign_instance(
        &self,
        id: &str,
        expected: Option<&str>,
        new_instance: Option<String>,
    ) -> Result<Task>;

    /// Every task in the store (used by index rebuilds)
    async fn all(&self) -> Result<Vec<Task>>;
}

/// Shared transition logic used by every backend
pub(crate) fn apply_transition(task: &mut Task, new_status: TaskStatus) -> Result<()> {
    if !task.status.can_transition_to(new_status) {
        return Err(HopperError::invalid_transition(task.status, new_status));
    }

    let now = Utc::now();
    if new_status == TaskStatus::InProgress && task.started_at.is_none() {
        task.started_at = Some(now);
    }
    if new_status.is_terminal() {
        task.stopped_at = Some(now);
    }

    task.status = new_status;
    task.updated_at = now;
    Ok(())
}

/// Stable ordering for listings: newest first, then ascending id
pub(crate) fn sort_for_listing(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}
