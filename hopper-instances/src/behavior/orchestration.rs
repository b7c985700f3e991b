//! ABOUTME: Orchestration scope behavior - leaf executor with a worker queue
//! ABOUTME: Queues up to max_concurrent_tasks, orders urgent > high > medium > low then FIFO

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use hopper_core::{Instance, InstanceScope, Result, Task, TaskStatus};
use hopper_storage::{Page, TaskFilter, TaskPatch, TaskStore};

use crate::registry::InstanceRegistry;

use super::{active_task_count, ScopeBehavior, TaskAction};

/// Queue utilisation snapshot for an orchestration instance
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Tasks waiting to be claimed
    pub pending: usize,
    /// Tasks claimed but not started
    pub claimed: usize,
    /// Tasks being worked on
    pub in_progress: usize,
    /// Tasks finished at this instance
    pub done: usize,
    /// claimed + in_progress
    pub active: usize,
    /// Configured concurrency cap
    pub max_concurrent: usize,
    /// active / max_concurrent
    pub capacity_used: f64,
}

/// Behavior for `orchestration` instances.
///
/// The execution level: maintains the worker queue, never delegates
/// further, and reports completion back up the delegation chain.
pub struct OrchestrationBehavior {
    registry: Arc<InstanceRegistry>,
    tasks: Arc<dyn TaskStore>,
}

impl OrchestrationBehavior {
    /// Default concurrency cap when `max_concurrent_tasks` is unset
    pub const DEFAULT_MAX_CONCURRENT: u64 = 10;

    /// Create a behavior bound to the registry and task store
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>, tasks: Arc<dyn TaskStore>) -> Self {
        Self { registry, tasks }
    }

    /// Whether the instance can take one more task
    pub async fn should_accept(&self, instance: &Instance) -> Result<bool> {
        Ok(self.ensure_capacity(instance).await.is_ok())
    }

    /// Typed capacity guard for queue admission.
    ///
    /// # Errors
    ///
    /// `CapacityExceeded` when active (claimed + in-progress) tasks have
    /// reached `max_concurrent_tasks`.
    pub async fn ensure_capacity(&self, instance: &Instance) -> Result<()> {
        let max = instance.config_u64("max_concurrent_tasks", Self::DEFAULT_MAX_CONCURRENT) as usize;
        let active = active_task_count(self.tasks.as_ref(), &instance.id).await?;
        if active >= max {
            return Err(hopper_core::HopperError::CapacityExceeded {
                instance_id: instance.id.clone(),
                active,
                max,
            });
        }
        Ok(())
    }

    /// The next pending task in queue order, if any
    pub async fn next_task(&self, instance: &Instance) -> Result<Option<Task>> {
        let queue = self.get_task_queue(instance).await?;
        Ok(queue
            .into_iter()
            .find(|t| t.status == TaskStatus::Pending))
    }

    /// Claim a pending task for a worker
    pub async fn claim_task(&self, task_id: &str, worker_id: &str) -> Result<Task> {
        self.tasks
            .transition_status(task_id, TaskStatus::Claimed)
            .await?;
        let claimed = self
            .tasks
            .update(
                task_id,
                TaskPatch {
                    owner: Some(worker_id.to_string()),
                    ..TaskPatch::default()
                },
            )
            .await?;
        debug!(task_id, worker_id, "task claimed");
        Ok(claimed)
    }

    /// Queue utilisation for this instance
    pub async fn queue_stats(&self, instance: &Instance) -> Result<QueueStats> {
        let count = |status: TaskStatus| {
            let filter = TaskFilter {
                statuses: vec![status],
                instance_id: Some(instance.id.clone()),
                ..TaskFilter::default()
            };
            let tasks = Arc::clone(&self.tasks);
            async move {
                let (_, total) = tasks
                    .list(
                        &filter,
                        Page {
                            offset: 0,
                            limit: 0,
                        },
                    )
                    .await?;
                Ok::<usize, hopper_core::HopperError>(total)
            }
        };

        let pending = count(TaskStatus::Pending).await?;
        let claimed = count(TaskStatus::Claimed).await?;
        let in_progress = count(TaskStatus::InProgress).await?;
        let done = count(TaskStatus::Done).await?;

        let max_concurrent =
            instance.config_u64("max_concurrent_tasks", Self::DEFAULT_MAX_CONCURRENT) as usize;
        let active = claimed + in_progress;

        #[allow(clippy::cast_precision_loss)]
        let capacity_used = if max_concurrent > 0 {
            active as f64 / max_concurrent as f64
        } else {
            0.0
        };

        Ok(QueueStats {
            pending,
            claimed,
            in_progress,
            done,
            active,
            max_concurrent,
            capacity_used,
        })
    }
}

#[async_trait]
impl ScopeBehavior for OrchestrationBehavior {
    fn scope(&self) -> InstanceScope {
        InstanceScope::Orchestration
    }

    async fn handle_incoming(&self, _task: &Task, instance: &Instance) -> Result<TaskAction> {
        match self.ensure_capacity(instance).await {
            Ok(()) => Ok(TaskAction::Queue {
                reason: "task added to orchestration queue for execution".into(),
            }),
            Err(hopper_core::HopperError::CapacityExceeded { active, max, .. }) => {
                Ok(TaskAction::Reject {
                    reason: format!("instance at capacity ({active}/{max} tasks)"),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn should_delegate(&self, _task: &Task, _instance: &Instance) -> Result<bool> {
        // Orchestration never delegates; it executes.
        Ok(false)
    }

    async fn find_delegation_target(
        &self,
        _task: &Task,
        _instance: &Instance,
    ) -> Result<Option<Instance>> {
        Ok(None)
    }

    async fn on_task_completed(&self, task: &Task, instance: &Instance) -> Result<()> {
        info!(task_id = %task.id, instance_id = %instance.id, "task completed at orchestration");
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

        // Priority ladder first, then FIFO within a priority band.
        items.sort_by(|a, b| {
            a.priority
                .queue_rank()
                .cmp(&b.priority.queue_rank())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }
}
