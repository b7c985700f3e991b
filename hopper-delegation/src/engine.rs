//! ABOUTME: The delegation engine - delegate, accept, reject, complete, cancel
//! ABOUTME: Rolls task ownership back to the source on reject and cancel

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hopper_core::{
    Delegation, DelegationType, HopperError, Result, Task, TaskStatus,
};
use hopper_instances::InstanceRegistry;
use hopper_storage::TaskStore;

use crate::completion::summarize_chain;
use crate::ChainSummary;

/// Engine owning delegation records and their state machine
///
/// Delegations reference tasks and instances by id only. All mutations for
/// one task serialize on a per-task mutex; the critical section spans
/// read → validate → store update → ownership side-effect.
pub struct DelegationEngine {
    registry: Arc<InstanceRegistry>,
    tasks: Arc<dyn TaskStore>,
    delegations: DashMap<String, Delegation>,
    /// Delegation ids per task, in creation (= `delegated_at`) order
    by_task: DashMap<String, Vec<String>>,
    task_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DelegationEngine {
    /// Create an engine over a registry and task store
    #[must_use]
    pub fn new(registry: Arc<InstanceRegistry>, tasks: Arc<dyn TaskStore>) -> Self {
        Self {
            registry,
            tasks,
            delegations: DashMap::new(),
            by_task: DashMap::new(),
            task_locks: DashMap::new(),
        }
    }

    fn task_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        self.task_locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn require_task(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or_else(|| HopperError::not_found("task", task_id))
    }

    fn require_delegation(&self, delegation_id: &str) -> Result<Delegation> {
        self.delegations
            .get(delegation_id)
            .map(|d| d.clone())
            .ok_or_else(|| HopperError::not_found("delegation", delegation_id))
    }

    /// Create a pending delegation and move the task to the target.
    ///
    /// # Errors
    ///
    /// - `Validation` when the target is not in a routable status
    /// - `ActiveDelegationExists` when the task already has a non-terminal hop
    pub async fn delegate(
        &self,
        task_id: &str,
        target_instance_id: &str,
        delegation_type: DelegationType,
        notes: Option<String>,
        delegated_by: Option<String>,
    ) -> Result<Delegation> {
        self.delegate_inner(task_id, None, target_instance_id, delegation_type, notes, delegated_by)
            .await
    }

    /// [`DelegationEngine::delegate`] with a compare-and-act guard on the
    /// source: the task must still be held by `expected_source` under the
    /// task lock, else `ConflictingUpdate` is returned and the caller
    /// should re-read and retry. Used by the router, whose decision was
    /// computed over a lock-free snapshot.
    pub async fn delegate_expecting(
        &self,
        task_id: &str,
        expected_source: Option<&str>,
        target_instance_id: &str,
        delegation_type: DelegationType,
        notes: Option<String>,
        delegated_by: Option<String>,
    ) -> Result<Delegation> {
        self.delegate_inner(
            task_id,
            Some(expected_source),
            target_instance_id,
            delegation_type,
            notes,
            delegated_by,
        )
        .await
    }

    async fn delegate_inner(
        &self,
        task_id: &str,
        expected_source: Option<Option<&str>>,
        target_instance_id: &str,
        delegation_type: DelegationType,
        notes: Option<String>,
        delegated_by: Option<String>,
    ) -> Result<Delegation> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let task = self.require_task(task_id).await?;
        if let Some(expected) = expected_source {
            if task.instance_id.as_deref() != expected {
                return Err(HopperError::ConflictingUpdate);
            }
        }
        let target = self.registry.get_required(target_instance_id).await?;

        if !target.status.is_routable() {
            return Err(HopperError::validation(
                "target_instance",
                format!(
                    "cannot delegate to instance {} with status {}",
                    target.id, target.status
                ),
            ));
        }

        if self.active_unlocked(task_id).is_some() {
            return Err(HopperError::ActiveDelegationExists {
                task_id: task_id.to_string(),
            });
        }

        let source = task.instance_id.clone();
        let mut delegation = Delegation::new(
            task_id.to_string(),
            source.clone(),
            target.id.clone(),
            delegation_type,
        );
        delegation.notes = notes;
        delegation.delegated_by = delegated_by;

        // Compare-and-act: the task must still be where we read it.
        self.tasks
            .assign_instance(task_id, source.as_deref(), Some(target.id.clone()))
            .await?;

        info!(
            task_id,
            source = source.as_deref().unwrap_or("-"),
            target = %target.id,
            kind = ?delegation_type,
            "delegated task"
        );

        self.by_task
            .entry(task_id.to_string())
            .or_default()
            .push(delegation.id.clone());
        self.delegations
            .insert(delegation.id.clone(), delegation.clone());
        Ok(delegation)
    }

    /// Accept a pending delegation
    pub async fn accept(&self, delegation_id: &str, notes: Option<&str>) -> Result<Delegation> {
        let delegation = self.require_delegation(delegation_id)?;
        let lock = self.task_lock(&delegation.task_id);
        let _guard = lock.lock().await;

        let mut delegation = self.require_delegation(delegation_id)?;
        if !matches!(delegation.status, hopper_core::DelegationStatus::Pending) {
            return Err(HopperError::invalid_transition(delegation.status, "accepted"));
        }

        delegation.accept();
        if let Some(notes) = notes {
            delegation.append_note(&format!("accepted: {notes}"));
        }
        self.delegations
            .insert(delegation.id.clone(), delegation.clone());
        debug!(delegation_id, "delegation accepted");
        Ok(delegation)
    }

    /// Reject a pending delegation; ownership rolls back to the source
    pub async fn reject(&self, delegation_id: &str, reason: &str) -> Result<Delegation> {
        let delegation = self.require_delegation(delegation_id)?;
        let lock = self.task_lock(&delegation.task_id);
        let _guard = lock.lock().await;

        let mut delegation = self.require_delegation(delegation_id)?;
        if !matches!(delegation.status, hopper_core::DelegationStatus::Pending) {
            return Err(HopperError::invalid_transition(delegation.status, "rejected"));
        }

        delegation.reject(reason);
        self.delegations
            .insert(delegation.id.clone(), delegation.clone());

        self.rollback_ownership(&delegation).await?;
        info!(delegation_id, reason, "delegation rejected");
        Ok(delegation)
    }

    /// Complete a pending or accepted delegation, optionally with a result
    pub async fn complete(
        &self,
        delegation_id: &str,
        result: Option<Value>,
    ) -> Result<Delegation> {
        let delegation = self.require_delegation(delegation_id)?;
        let lock = self.task_lock(&delegation.task_id);
        let _guard = lock.lock().await;

        let mut delegation = self.require_delegation(delegation_id)?;
        if !delegation.is_active() {
            return Err(HopperError::invalid_transition(delegation.status, "completed"));
        }

        delegation.complete(result);
        self.delegations
            .insert(delegation.id.clone(), delegation.clone());
        info!(delegation_id, "delegation completed");
        Ok(delegation)
    }

    /// Cancel any non-terminal delegation; ownership rolls back to the source
    pub async fn cancel(&self, delegation_id: &str) -> Result<Delegation> {
        let delegation = self.require_delegation(delegation_id)?;
        let lock = self.task_lock(&delegation.task_id);
        let _guard = lock.lock().await;

        let mut delegation = self.require_delegation(delegation_id)?;
        if delegation.is_terminal() {
            return Err(HopperError::invalid_transition(delegation.status, "cancelled"));
        }

        delegation.cancel();
        self.delegations
            .insert(delegation.id.clone(), delegation.clone());

        self.rollback_ownership(&delegation).await?;
        info!(delegation_id, "delegation cancelled");
        Ok(delegation)
    }

    /// Return the task to the delegation's source instance
    async fn rollback_ownership(&self, delegation: &Delegation) -> Result<()> {
        let task = self.require_task(&delegation.task_id).await?;

        // Only roll back if the task is still where this hop put it.
        if task.instance_id.as_deref() == Some(delegation.target_instance_id.as_str()) {
            self.tasks
                .assign_instance(
                    &delegation.task_id,
                    Some(delegation.target_instance_id.as_str()),
                    delegation.source_instance_id.clone(),
                )
                .await?;
        }
        Ok(())
    }

    /// The full delegation chain for a task, ordered origin → current
    pub fn chain(&self, task_id: &str) -> Vec<Delegation> {
        let ids = self
            .by_task
            .get(task_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        let mut chain: Vec<Delegation> = ids
            .iter()
            .filter_map(|id| self.delegations.get(id).map(|d| d.clone()))
            .collect();
        chain.sort_by(|a, b| a.delegated_at.cmp(&b.delegated_at).then_with(|| a.id.cmp(&b.id)));
        chain
    }

    /// The active (pending or accepted) delegation for a task, if any
    #[must_use]
    pub fn active(&self, task_id: &str) -> Option<Delegation> {
        self.active_unlocked(task_id)
    }

    fn active_unlocked(&self, task_id: &str) -> Option<Delegation> {
        self.chain(task_id).into_iter().find(Delegation::is_active)
    }

    /// Mark a task done and bubble the completion through its chain.
    ///
    /// Transitions the task to `done` in the store, then completes every
    /// still-active delegation most-recent-first. Returns the delegations
    /// completed by this call.
    pub async fn complete_task(
        &self,
        task_id: &str,
        result: Option<Value>,
    ) -> Result<Vec<Delegation>> {
        {
            let lock = self.task_lock(task_id);
            let _guard = lock.lock().await;
            self.tasks
                .transition_status(task_id, TaskStatus::Done)
                .await?;
        }
        self.bubble_completion(task_id, result, &CancellationToken::new())
            .await
    }

    /// Bubble completion through the delegation chain.
    ///
    /// Idempotent: already-terminal hops are skipped, so a second call
    /// completes nothing. The cancellation token is honored between hops;
    /// partial progress stays committed.
    pub async fn bubble_completion(
        &self,
        task_id: &str,
        result: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Delegation>> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut chain = self.chain(task_id);
        chain.reverse(); // most recent hop first

        let mut completed = Vec::new();
        for delegation in chain {
            if cancel.is_cancelled() {
                debug!(task_id, "bubbling cancelled, keeping partial progress");
                break;
            }
            if !delegation.is_active() {
                continue;
            }

            let mut delegation = delegation;
            delegation.complete(result.clone());
            self.delegations
                .insert(delegation.id.clone(), delegation.clone());
            info!(task_id, delegation_id = %delegation.id, "bubbled completion");
            completed.push(delegation);
        }

        Ok(completed)
    }

    /// Per-status counts and an overall label for a task's chain
    #[must_use]
    pub fn chain_summary(&self, task_id: &str) -> ChainSummary {
        summarize_chain(task_id, &self.chain(task_id))
    }
}
