//! Instance model: scopes, lifecycle, and configuration access

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::short_id;

/// The role an instance plays in the routing tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceScope {
    /// Strategic router at the root; never executes
    Global,
    /// Tactical node; handles or delegates to orchestration
    Project,
    /// Leaf executor with a worker queue
    Orchestration,
    /// Individual user's node; behaves like a project that never delegates
    Personal,
    /// Household node
    Family,
    /// Event-bound node
    Event,
    /// Cross-federation router
    Federated,
}

impl InstanceScope {
    /// Position in the delegation hierarchy; lower is closer to the root.
    ///
    /// Scopes outside the global/project/orchestration spine sort after it.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Project => 1,
            Self::Orchestration => 2,
            _ => 10,
        }
    }
}

impl std::fmt::Display for InstanceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Orchestration => "orchestration",
            Self::Personal => "personal",
            Self::Family => "family",
            Self::Event => "event",
            Self::Federated => "federated",
        };
        f.write_str(s)
    }
}

/// Instance lifetime class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstanceKind {
    /// Long-lived instance
    #[default]
    Persistent,
    /// Created per run, torn down afterwards
    Ephemeral,
    /// Short-lived, bounded by an external deadline
    Temporary,
}

/// Instance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Registered, not yet started
    Created,
    /// Start-up in progress
    Starting,
    /// Accepting and executing tasks
    Running,
    /// Graceful shutdown in progress
    Stopping,
    /// Shut down, restartable
    Stopped,
    /// Temporarily suspended
    Paused,
    /// Failed; needs intervention
    Error,
    /// Soft-deleted (final)
    Terminated,
}

impl InstanceStatus {
    /// Whether this instance may receive delegations
    #[must_use]
    pub const fn is_routable(self) -> bool {
        matches!(self, Self::Running | Self::Created)
    }

    /// Check if moving to `target` is a legal lifecycle transition
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Created, Self::Starting | Self::Error | Self::Terminated)
                | (Self::Starting, Self::Running | Self::Stopping | Self::Error)
                | (Self::Running, Self::Stopping | Self::Paused | Self::Error)
                | (Self::Stopping, Self::Stopped | Self::Error)
                | (Self::Stopped, Self::Starting | Self::Terminated)
                | (Self::Paused, Self::Running | Self::Stopping | Self::Error)
                | (Self::Error, Self::Starting | Self::Stopping | Self::Terminated)
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A routing/execution node in the instance tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    /// Opaque id
    pub id: String,

    /// Human name; unique within (scope, parent)
    pub name: String,

    /// Scope governing behavior
    pub scope: InstanceScope,

    /// Lifetime class
    #[serde(default)]
    pub kind: InstanceKind,

    /// Parent instance (None for roots)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Scope-specific configuration knobs (`capabilities`, `tags`,
    /// `orchestration_threshold`, `max_concurrent_tasks`, `auto_delegate`,
    /// `fallback_strategy`, ...)
    #[serde(default)]
    pub config: HashMap<String, Value>,

    /// Runtime counters maintained by scope behaviors
    #[serde(default)]
    pub runtime_metadata: HashMap<String, Value>,

    /// Lifecycle status
    pub status: InstanceStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    /// Create a new instance in `Created` status
    #[must_use]
    pub fn new(name: impl Into<String>, scope: InstanceScope) -> Self {
        let now = Utc::now();
        Self {
            id: short_id("hop"),
            name: name.into(),
            scope,
            kind: InstanceKind::Persistent,
            parent_id: None,
            config: HashMap::new(),
            runtime_metadata: HashMap::new(),
            status: InstanceStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach to a parent instance
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

    /// Raw config value
    #[must_use]
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }

    /// Boolean config knob with a default
    #[must_use]
    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    /// Integer config knob with a default
    #[must_use]
    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(default)
    }

    /// String config knob with a default
    #[must_use]
    pub fn config_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
    }

    /// String-list config knob (`capabilities`, `tags`)
    #[must_use]
    pub fn config_str_list(&self, key: &str) -> Vec<String> {
        self.config
            .get(key)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Bump a runtime counter, creating it at zero
    pub fn bump_counter(&mut self, key: &str) {
        let next = self
            .runtime_metadata
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
            + 1;
        self.runtime_metadata.insert(key.to_string(), next.into());
    }
}
