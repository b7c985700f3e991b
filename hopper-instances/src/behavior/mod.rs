//! ABOUTME: Scope-specific task handling behaviors
//! ABOUTME: Global routes, project gates on complexity, orchestration queues and executes

mod global;
mod orchestration;
mod project;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use hopper_core::{Instance, InstanceScope, Result, Task};
use hopper_storage::TaskStore;

use crate::registry::InstanceRegistry;

pub use global::GlobalBehavior;
pub use orchestration::{OrchestrationBehavior, QueueStats};
pub use project::ProjectBehavior;

/// What an instance decided to do with an incoming task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TaskAction {
    /// Hand the task to a child instance
    Delegate {
        /// Chosen child
        target_instance_id: String,
        /// Why this target
        reason: String,
    },
    /// Work the task at this instance
    Handle {
        /// Why it stays here
        reason: String,
    },
    /// Put the task on this instance's execution queue
    Queue {
        /// Why it was queued
        reason: String,
    },
    /// Push the task up to the parent
    Escalate {
        /// Parent instance
        target_instance_id: String,
        /// Why it goes up
        reason: String,
    },
    /// Refuse the task
    Reject {
        /// Why it was refused
        reason: String,
    },
}

/// Scope-dependent handling of tasks at an instance
///
/// One implementation per scope; selection happens in [`behavior_for_scope`]
/// with a single match on the scope.
#[async_trait]
pub trait ScopeBehavior: Send + Sync {
    /// The scope this behavior implements
    fn scope(&self) -> InstanceScope;

    /// Decide what to do with a task arriving at `instance`
    async fn handle_incoming(&self, task: &Task, instance: &Instance) -> Result<TaskAction>;

    /// Whether this instance wants to push the task further down
    async fn should_delegate(&self, task: &Task, instance: &Instance) -> Result<bool>;

    /// Best child to delegate to, if any
    async fn find_delegation_target(
        &self,
        task: &Task,
        instance: &Instance,
    ) -> Result<Option<Instance>>;

    /// Bookkeeping when a task finishes at this instance
    async fn on_task_completed(&self, task: &Task, instance: &Instance) -> Result<()>;

    /// The tasks currently held at this instance, in execution order
    async fn get_task_queue(&self, instance: &Instance) -> Result<Vec<Task>>;
}

/// Project behavior that never delegates, used by the personal, family, and
/// event scopes.
struct NonDelegating {
    scope: InstanceScope,
    inner: ProjectBehavior,
}

#[async_trait]
impl ScopeBehavior for NonDelegating {
    fn scope(&self) -> InstanceScope {
        self.scope
    }

    async fn handle_incoming(&self, _task: &Task, _instance: &Instance) -> Result<TaskAction> {
        Ok(TaskAction::Handle {
            reason: format!("{} instances handle tasks directly", self.scope),
        })
    }

    async fn should_delegate(&self, _task: &Task, _instance: &Instance) -> Result<bool> {
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
        self.inner.on_task_completed(task, instance).await
    }

    async fn get_task_queue(&self, instance: &Instance) -> Result<Vec<Task>> {
        self.inner.get_task_queue(instance).await
    }
}

/// Select the behavior implementation for a scope.
///
/// Personal, family, and event inherit the project behavior minus
/// delegation; federated inherits global.
#[must_use]
pub fn behavior_for_scope(
    scope: InstanceScope,
    registry: Arc<InstanceRegistry>,
    tasks: Arc<dyn TaskStore>,
) -> Box<dyn ScopeBehavior> {
    match scope {
        InstanceScope::Global | InstanceScope::Federated => {
            Box::new(GlobalBehavior::new(scope, registry, tasks))
        }
        InstanceScope::Project => Box::new(ProjectBehavior::new(registry, tasks)),
        InstanceScope::Orchestration => Box::new(OrchestrationBehavior::new(registry, tasks)),
        InstanceScope::Personal | InstanceScope::Family | InstanceScope::Event => {
            Box::new(NonDelegating {
                scope,
                inner: ProjectBehavior::new(registry, tasks),
            })
        }
    }
}

/// Count of claimed + in-progress tasks held at an instance
pub(crate) async fn active_task_count(tasks: &dyn TaskStore, instance_id: &str) -> Result<usize> {
    use hopper_core::TaskStatus;
    use hopper_storage::{Page, TaskFilter};

    let filter = TaskFilter {
        statuses: vec![TaskStatus::Claimed, TaskStatus::InProgress],
        instance_id: Some(instance_id.to_string()),
        ..TaskFilter::default()
    };
    let (_, total) = tasks
        .list(
            &filter,
            Page {
                offset: 0,
                limit: 0,
            },
        )
        .await?;
    Ok(total)
}
