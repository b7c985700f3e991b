//! ABOUTME: Global scope behavior - strategic router, never executes
//! ABOUTME: Resolves explicit project, then tag overlap, then fallback balancing

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use hopper_core::{Instance, InstanceScope, Result, Task, TaskStatus};
use hopper_storage::{Page, TaskFilter, TaskStore};

use crate::registry::InstanceRegistry;

use super::{active_task_count, ScopeBehavior, TaskAction};

/// Behavior for `global` (and `federated`) instances.
///
/// Global instances are strategic routers: they place every task on a
/// project child and never execute anything themselves.
pub struct GlobalBehavior {
    scope: InstanceScope,
    registry: Arc<InstanceRegistry>,
    tasks: Arc<dyn TaskStore>,
}

impl GlobalBehavior {
    /// Create a behavior bound to the registry and task store
    #[must_use]
    pub fn new(
        scope: InstanceScope,
        registry: Arc<InstanceRegistry>,
        tasks: Arc<dyn TaskStore>,
    ) -> Self {
        Self {
            scope,
            registry,
            tasks,
        }
    }

    /// Project child explicitly named by the task
    async fn find_project_by_name(
        &self,
        parent_id: &str,
        project: &str,
    ) -> Result<Option<Instance>> {
        let children = self
            .registry
            .routable_children(parent_id, Some(InstanceScope::Project))
            .await?;
        Ok(children.into_iter().find(|c| c.name == project))
    }

    /// Project child with the largest overlap between its capabilities/tags
    /// and the task's tags. Ties break on ascending instance id.
    async fn find_project_by_tags(
        &self,
        parent_id: &str,
        task_tags: &[String],
    ) -> Result<Option<Instance>> {
        let task_tags: HashSet<&str> = task_tags.iter().map(String::as_str).collect();
        let children = self
            .registry
            .routable_children(parent_id, Some(InstanceScope::Project))
            .await?;

        let mut best: Option<(usize, Instance)> = None;
        for child in children {
            let mut caps = child.config_str_list("capabilities");
            caps.extend(child.config_str_list("tags"));
            let overlap = caps
                .iter()
                .filter(|c| task_tags.contains(c.as_str()))
                .collect::<HashSet<_>>()
                .len();
            if overlap > 0 && best.as_ref().is_none_or(|(n, _)| overlap > *n) {
                best = Some((overlap, child));
            }
        }
        Ok(best.map(|(_, instance)| instance))
    }

    /// Fallback placement over all routable project children, per the
    /// instance's `fallback_strategy` knob (`round_robin` | `least_loaded`).
    async fn find_available_project(&self, instance: &Instance) -> Result<Option<Instance>> {
        let children = self
            .registry
            .routable_children(&instance.id, Some(InstanceScope::Project))
            .await?;
        if children.is_empty() {
            return Ok(None);
        }

        let strategy = instance.config_str("fallback_strategy", "round_robin");
        if strategy == "least_loaded" {
            let mut best: Option<(usize, Instance)> = None;
            for child in children {
                let load = active_task_count(self.tasks.as_ref(), &child.id).await?;
                if best.as_ref().is_none_or(|(n, _)| load < *n) {
                    best = Some((load, child));
                }
            }
            return Ok(best.map(|(_, i)| i));
        }

        // round_robin: children are id-ordered, take the first
        Ok(children.into_iter().next())
    }
}

#[async_trait]
impl ScopeBehavior for GlobalBehavior {
    fn scope(&self) -> InstanceScope {
        self.scope
    }

    async fn handle_incoming(&self, task: &Task, instance: &Instance) -> Result<TaskAction> {
        match self.find_delegation_target(task, instance).await? {
            Some(target) => Ok(TaskAction::Delegate {
                reason: format!("routed to project {} based on task attributes", target.name),
                target_instance_id: target.id,
            }),
            None => Ok(TaskAction::Reject {
                reason: "no suitable project found for task routing".into(),
            }),
        }
    }

    async fn should_delegate(&self, _task: &Task, _instance: &Instance) -> Result<bool> {
        // Global always delegates; it routes, it doesn't execute.
        Ok(true)
    }

    async fn find_delegation_target(
        &self,
        task: &Task,
        instance: &Instance,
    ) -> Result<Option<Instance>> {
        if let Some(project) = &task.project {
            if let Some(target) = self.find_project_by_name(&instance.id, project).await? {
                debug!(task_id = %task.id, target = %target.name, "explicit project match");
                return Ok(Some(target));
            }
        }

        if !task.tags.is_empty() {
            if let Some(target) = self.find_project_by_tags(&instance.id, &task.tags).await? {
                debug!(task_id = %task.id, target = %target.name, "tag overlap match");
                return Ok(Some(target));
            }
        }

        self.find_available_project(instance).await
    }

    async fn on_task_completed(&self, task: &Task, instance: &Instance) -> Result<()> {
        info!(task_id = %task.id, instance_id = %instance.id, "completion bubbled to global");
        self.registry
            .update(&instance.id, |i| i.bump_counter("completed_tasks"))
            .await?;
        Ok(())
    }

    async fn get_task_queue(&self, instance: &Instance) -> Result<Vec<Task>> {
        // Global holds only tasks that haven't been routed yet.
        let filter = TaskFilter {
            statuses: vec![TaskStatus::Pending],
            instance_id: Some(instance.id.clone()),
            ..TaskFilter::default()
        };
        let (items, _) = self
            .tasks
            .list(
                &filter,
                Page {
                    offset: 0,
                    limit: usize::MAX,
                },
            )
            .await?;
        Ok(items)
    }
}
