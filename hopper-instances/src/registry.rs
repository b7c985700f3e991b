//! ABOUTME: Instance registry with tree invariants and lifecycle management
//! ABOUTME: Lookup by id, (scope, name), parent; status gating for routing reads

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use hopper_core::{
    HopperError, Instance, InstanceKind, InstanceScope, InstanceStatus, Result,
};

/// Fields for registering an instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Human name
    pub name: String,
    /// Scope in the hierarchy
    pub scope: InstanceScope,
    /// Lifetime class
    #[serde(default)]
    pub kind: InstanceKind,
    /// Parent instance id (None for roots)
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Scope-specific configuration
    #[serde(default)]
    pub config: HashMap<String, Value>,
}

impl InstanceSpec {
    /// Spec with just a name and scope
    #[must_use]
    pub fn new(name: impl Into<String>, scope: InstanceScope) -> Self {
        Self {
            name: name.into(),
            scope,
            kind: InstanceKind::Persistent,
            parent_id: None,
            config: HashMap::new(),
        }
    }

    /// Attach to a parent
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set a configuration knob
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// Filter for listing instances
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    /// Restrict to a scope
    pub scope: Option<InstanceScope>,
    /// Restrict to a status
    pub status: Option<InstanceStatus>,
    /// Restrict to children of this parent
    pub parent_id: Option<String>,
    /// Only instances that may receive delegations
    pub routable_only: bool,
}

/// A node of the hierarchy with its resolved children
#[derive(Debug, Clone, Serialize)]
pub struct InstanceTree {
    /// The instance at this node
    pub instance: Instance,
    /// Its children, recursively
    pub children: Vec<InstanceTree>,
}

/// Registry for the instance tree
///
/// Single source of truth for instances. Writes serialize on the registry
/// lock; reads clone snapshots so routing never holds the lock across
/// decisions.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, Instance>>,
}

impl InstanceRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new instance.
    ///
    /// # Errors
    ///
    /// - `Validation` on an empty name, a missing parent, or a scope that
    ///   would break the root-downward ordering (a parent's scope rank must
    ///   not exceed its child's).
    pub async fn create(&self, spec: InstanceSpec) -> Result<Instance> {
        if spec.name.trim().is_empty() {
            return Err(HopperError::validation("name", "must not be empty"));
        }

        let mut instances = self.instances.write();

        if let Some(parent_id) = &spec.parent_id {
            let parent = instances
                .get(parent_id)
                .ok_or_else(|| HopperError::not_found("instance", parent_id.clone()))?;
            if parent.scope.rank() > spec.scope.rank() {
                return Err(HopperError::validation(
                    "scope",
                    format!(
                        "{} instance cannot be a child of {} instance",
                        spec.scope, parent.scope
                    ),
                ));
            }
        }

        let mut instance = Instance::new(spec.name, spec.scope);
        instance.kind = spec.kind;
        instance.parent_id = spec.parent_id;
        instance.config = spec.config;

        info!(instance_id = %instance.id, scope = %instance.scope, name = %instance.name, "registered instance");
        instances.insert(instance.id.clone(), instance.clone());
        Ok(instance)
    }

    /// Fetch by id
    pub async fn get(&self, id: &str) -> Result<Option<Instance>> {
        Ok(self.instances.read().get(id).cloned())
    }

    /// Fetch by id, erroring when absent
    pub async fn get_required(&self, id: &str) -> Result<Instance> {
        self.get(id)
            .await?
            .ok_or_else(|| HopperError::not_found("instance", id))
    }

    /// Find a routable instance by (scope, name).
    ///
    /// Only `running` and `created` instances are visible to routing reads.
    pub async fn find_routable(&self, scope: InstanceScope, name: &str) -> Result<Option<Instance>> {
        let mut matches: Vec<Instance> = self
            .instances
            .read()
            .values()
            .filter(|i| i.scope == scope && i.name == name && i.status.is_routable())
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches.into_iter().next())
    }

    /// All children of an instance
    pub async fn children(&self, parent_id: &str) -> Result<Vec<Instance>> {
        let mut children: Vec<Instance> = self
            .instances
            .read()
            .values()
            .filter(|i| i.parent_id.as_deref() == Some(parent_id))
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    /// Routable children of an instance, optionally restricted to a scope
    pub async fn routable_children(
        &self,
        parent_id: &str,
        scope: Option<InstanceScope>,
    ) -> Result<Vec<Instance>> {
        let mut children: Vec<Instance> = self
            .instances
            .read()
            .values()
            .filter(|i| {
                i.parent_id.as_deref() == Some(parent_id)
                    && i.status.is_routable()
                    && scope.is_none_or(|s| i.scope == s)
            })
            .cloned()
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    /// List instances matching a filter, ordered by id
    pub async fn list(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        let mut matches: Vec<Instance> = self
            .instances
            .read()
            .values()
            .filter(|i| {
                filter.scope.is_none_or(|s| i.scope == s)
                    && filter.status.is_none_or(|s| i.status == s)
                    && filter
                        .parent_id
                        .as_deref()
                        .is_none_or(|p| i.parent_id.as_deref() == Some(p))
                    && (!filter.routable_only || i.status.is_routable())
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    /// Resolve the subtree rooted at an instance
    pub async fn hierarchy(&self, id: &str) -> Result<InstanceTree> {
        let snapshot: Vec<Instance> = self.instances.read().values().cloned().collect();
        let root = snapshot
            .iter()
            .find(|i| i.id == id)
            .cloned()
            .ok_or_else(|| HopperError::not_found("instance", id))?;
        Ok(build_tree(root, &snapshot))
    }

    /// Mutate an instance in place (runtime counters, config updates).
    ///
    /// Reparenting through this entry point is checked for cycles.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<Instance>
    where
        F: FnOnce(&mut Instance),
    {
        let mut instances = self.instances.write();
        let old_parent = instances
            .get(id)
            .map(|i| i.parent_id.clone())
            .ok_or_else(|| HopperError::not_found("instance", id))?;

        let mut updated = instances
            .get(id)
            .cloned()
            .ok_or_else(|| HopperError::not_found("instance", id))?;
        mutate(&mut updated);
        updated.updated_at = Utc::now();

        if updated.parent_id != old_parent {
            if let Some(new_parent) = &updated.parent_id {
                if new_parent == id || is_descendant(&instances, id, new_parent) {
                    return Err(HopperError::validation(
                        "parent_id",
                        "reparenting would create a cycle",
                    ));
                }
                if !instances.contains_key(new_parent) {
                    return Err(HopperError::not_found("instance", new_parent.clone()));
                }
            }
        }

        instances.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Move an instance through its lifecycle state machine
    pub async fn transition_status(&self, id: &str, new_status: InstanceStatus) -> Result<Instance> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| HopperError::not_found("instance", id))?;

        if !instance.status.can_transition_to(new_status) {
            return Err(HopperError::invalid_transition(instance.status, new_status));
        }

        debug!(instance_id = %id, from = %instance.status, to = %new_status, "instance transition");
        instance.status = new_status;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    /// Start an instance: `created`/`stopped` → `starting` → `running`
    pub async fn start(&self, id: &str) -> Result<Instance> {
        self.transition_status(id, InstanceStatus::Starting).await?;
        self.transition_status(id, InstanceStatus::Running).await
    }

    /// Stop an instance: → `stopping` → `stopped`
    pub async fn stop(&self, id: &str) -> Result<Instance> {
        self.transition_status(id, InstanceStatus::Stopping).await?;
        self.transition_status(id, InstanceStatus::Stopped).await
    }

    /// Pause a running instance
    pub async fn pause(&self, id: &str) -> Result<Instance> {
        self.transition_status(id, InstanceStatus::Paused).await
    }

    /// Resume a paused instance
    pub async fn resume(&self, id: &str) -> Result<Instance> {
        self.transition_status(id, InstanceStatus::Running).await
    }

    /// Operator override: force an instance to `running` from any
    /// non-terminated state, bypassing the transition table.
    pub async fn restart(&self, id: &str) -> Result<Instance> {
        let mut instances = self.instances.write();
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| HopperError::not_found("instance", id))?;

        if instance.status == InstanceStatus::Terminated {
            return Err(HopperError::invalid_transition(
                instance.status,
                InstanceStatus::Running,
            ));
        }

        warn!(instance_id = %id, from = %instance.status, "restart override: forcing running");
        instance.status = InstanceStatus::Running;
        instance.updated_at = Utc::now();
        Ok(instance.clone())
    }

    /// Soft-delete: transition to the terminal `terminated` status
    pub async fn terminate(&self, id: &str) -> Result<Instance> {
        self.transition_status(id, InstanceStatus::Terminated).await
    }
}

fn build_tree(root: Instance, all: &[Instance]) -> InstanceTree {
    let mut children: Vec<Instance> = all
        .iter()
        .filter(|i| i.parent_id.as_deref() == Some(root.id.as_str()))
        .cloned()
        .collect();
    children.sort_by(|a, b| a.id.cmp(&b.id));

    InstanceTree {
        children: children
            .into_iter()
            .map(|c| build_tree(c, all))
            .collect(),
        instance: root,
    }
}

/// Whether `candidate` lies in the subtree rooted at `root`
fn is_descendant(instances: &HashMap<String, Instance>, root: &str, candidate: &str) -> bool {
    let mut current = instances.get(candidate).and_then(|i| i.parent_id.clone());
    while let Some(parent) = current {
        if parent == root {
            return true;
        }
        current = instances.get(&parent).and_then(|i| i.parent_id.clone());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn seed() -> (InstanceRegistry, Instance, Instance) {
        let registry = InstanceRegistry::new();
        let global = registry
            .create(InstanceSpec::new("root", InstanceScope::Global))
            .await
            .unwrap();
        let project = registry
            .create(InstanceSpec::new("alpha", InstanceScope::Project).with_parent(&global.id))
            .await
            .unwrap();
        (registry, global, project)
    }

    #[tokio::test]
    async fn create_validates_scope_ordering() {
        let (registry, _global, project) = seed().await;

        // orchestration under project is fine
        registry
            .create(InstanceSpec::new("workers", InstanceScope::Orchestration).with_parent(&project.id))
            .await
            .unwrap();

        // a global instance cannot hang under a project
        let err = registry
            .create(InstanceSpec::new("rogue", InstanceScope::Global).with_parent(&project.id))
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::Validation { .. }));
    }

    #[tokio::test]
    async fn find_routable_gates_on_status() {
        let (registry, _global, project) = seed().await;

        assert!(registry
            .find_routable(InstanceScope::Project, "alpha")
            .await
            .unwrap()
            .is_some());

        registry.start(&project.id).await.unwrap();
        registry.pause(&project.id).await.unwrap();

        assert!(registry
            .find_routable(InstanceScope::Project, "alpha")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn lifecycle_verbs() {
        let (registry, _global, project) = seed().await;

        let running = registry.start(&project.id).await.unwrap();
        assert_eq!(running.status, InstanceStatus::Running);

        let paused = registry.pause(&project.id).await.unwrap();
        assert_eq!(paused.status, InstanceStatus::Paused);

        let resumed = registry.resume(&project.id).await.unwrap();
        assert_eq!(resumed.status, InstanceStatus::Running);

        let stopped = registry.stop(&project.id).await.unwrap();
        assert_eq!(stopped.status, InstanceStatus::Stopped);

        let terminated = registry.terminate(&project.id).await.unwrap();
        assert_eq!(terminated.status, InstanceStatus::Terminated);

        // terminated is final, even for the restart override
        assert!(registry.restart(&project.id).await.is_err());
    }

    #[tokio::test]
    async fn restart_overrides_from_error() {
        let (registry, _global, project) = seed().await;
        registry.start(&project.id).await.unwrap();
        registry
            .transition_status(&project.id, InstanceStatus::Error)
            .await
            .unwrap();

        let restarted = registry.restart(&project.id).await.unwrap();
        assert_eq!(restarted.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn reparent_cycle_is_rejected() {
        let (registry, global, project) = seed().await;
        let orch = registry
            .create(InstanceSpec::new("workers", InstanceScope::Orchestration).with_parent(&project.id))
            .await
            .unwrap();

        // global under its own grandchild would be a cycle
        let err = registry
            .update(&global.id, |i| i.parent_id = Some(orch.id.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, HopperError::Validation { .. }));
    }

    #[tokio::test]
    async fn hierarchy_resolves_subtree() {
        let (registry, global, project) = seed().await;
        registry
            .create(InstanceSpec::new("workers", InstanceScope::Orchestration).with_parent(&project.id))
            .await
            .unwrap();

        let tree = registry.hierarchy(&global.id).await.unwrap();
        assert_eq!(tree.instance.name, "root");
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.children[0].children.len(), 1);
        assert_eq!(tree.children[0].children[0].instance.name, "workers");
    }

    #[tokio::test]
    async fn list_applies_filters() {
        let (registry, global, project) = seed().await;
        registry.start(&project.id).await.unwrap();

        let running = registry
            .list(&InstanceFilter {
                status: Some(InstanceStatus::Running),
                ..InstanceFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, project.id);

        let children = registry
            .list(&InstanceFilter {
                parent_id: Some(global.id.clone()),
                routable_only: true,
                ..InstanceFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(children.len(), 1);

        let projects = registry
            .list(&InstanceFilter {
                scope: Some(InstanceScope::Project),
                ..InstanceFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(projects.len(), 1);
    }

    #[tokio::test]
    async fn update_merges_config() {
        let (registry, _global, project) = seed().await;
        let updated = registry
            .update(&project.id, |i| {
                i.config.insert("orchestration_threshold".into(), json!(2));
            })
            .await
            .unwrap();
        assert_eq!(updated.config_u64("orchestration_threshold", 3), 2);
    }
}
