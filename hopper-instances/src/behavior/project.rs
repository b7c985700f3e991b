//! ABOUTME: Project scope behavior - handles simple tasks, delegates complex ones
//! ABOUTME: Gate is task complexity against the orchestration_threshold knob

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use hopper_core::{Instance, InstanceScope, Result, Task, TaskStatus};
use hopper_storage::{Page, TaskFilter, TaskStore};

use crate::registry::InstanceRegistry;

use super::{active_task_count, ScopeBehavior, TaskAction};

/// Behavior for `project` instances.
///
/// Projects make tactical decisions: work a task directly when its
/// complexity stays under `orchestration_threshold`, otherwise hand it to
/// the least-loaded orchestration child.
pub struct ProjectBehavior {
    registry: Arc<InstanceRegistry>,
    tasks: Arc<dyn TaskStore>,
}

impl ProjectBehavior {
    /// Create a behavior bound to the registry and task store
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { registry, tasks }
    }
}

#[async_trait]
impl ScopeBehavior for ProjectBehavior {
    fn scope(&self) -> InstanceScope {
        InstanceScope::Project
    }

    async fn handle_incoming(&self, task: &Task, instance: &Instance) -> Result<TaskAction> {
        if self.should_delegate(task, instance).await? {
            if let Some(target) = self.find_delegation_target(task, instance).await? {
                return Ok(TaskAction::Delegate {
                    reason: format!(
                        "task complexity ({}) exceeds threshold, delegating to orchestration",
                        task.complexity()
                    ),
                    target_instance_id: target.id,
                });
            }

            // No orchestration child exists yet.
            if instance.config_bool("auto_create_orchestrations", true) {
                return Ok(TaskAction::Reject {
                    reason: "no orchestration instance available".into(),
                });
            }
            return Ok(TaskAction::Handle {
                reason: "no orchestration available, handling directly".into(),
            });
        }

        Ok(TaskAction::Handle {
            reason: "task complexity within threshold, handling directly".into(),
        })
    }

    async fn should_delegate(&self, task: &Task, instance: &Instance) -> Result<bool> {
        if !instance.config_bool("auto_delegate", true) {
            return Ok(false);
        }

        let threshold = instance.config_u64("orchestration_threshold", 3);
        let complexity = u64::from(task.complexity());
        debug!(task_id = %task.id, complexity, threshold, "delegation gate");
        Ok(complexity >= threshold)
    }

    async fn find_delegation_target(
        &self,
        _task: &Task,
        instance: &Instance,
    ) -> Result<Option<Instance>> {
        let orchestrations = self
            .registry
            .routable_children(&instance.id, Some(InstanceScope::Orchestration))
            .await?;

        let mut best: Option<(usize, Instance)> = None;
        for orchestration in orchestrations {
            let load = active_task_count(self.tasks.as_ref(), &orchestration.id).await?;
            if best.as_ref().is_none_or(|(n, _)| load < *n) {
                best = Some((load, orchestration));
            }
        }
        Ok(best.map(|(_, i)| i))
    }

    async fn on_task_completed(&self, task: &Task, instance: &Instance) -> Result<()> {
        info!(task_id = %task.id, instance_id = %instance.id, "task completed at project");
        self.registry
            .update(&instance.id, |i| i.bump_counter("completed_tasks"))
            .await?;
        Ok(())
    }

    async fn get_task_queue(&self, instance: &Instance) -> Result<Vec<Task>> {
        let filter = TaskFilter {
            statuses: vec![
                TaskStatus::Pending,
                TaskStatus::Claimed,
                TaskStatus::InProgress,
            ],
            instance_id: Some(instance.id.clone()),
            ..TaskFilter::default()
        };
        let (mut items, _) = self
            .tasks
            .list(
                &filter,
                Page {
                    offset: 0,
                    limit: usize::MAX,
                },
            )
            .await?;
        // Oldest first for project work-through order.
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}
