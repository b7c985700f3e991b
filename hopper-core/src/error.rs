//! Error types shared across Hopper crates

use thiserror::Error;

/// Result type alias for Hopper operations
pub type Result<T> = std::result::Result<T, HopperError>;

/// Errors raised by the routing and delegation core
///
/// Validation and state errors are meant to be recovered at the adapter
/// layer and surfaced to the caller. `ConflictingUpdate` signals a lost
/// compare-and-act race and should be retried. Storage errors propagate
/// unchanged.
#[derive(Debug, Error)]
pub enum HopperError {
    /// Lookup by id returned nothing
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("task", "instance", "delegation", ...)
        entity: &'static str,
        /// The id that was looked up
        id: String,
    },

    /// Input failed a constraint check
    #[error("validation failed on '{field}': {detail}")]
    Validation {
        /// Field or parameter that failed
        field: String,
        /// Human-readable detail
        detail: String,
    },

    /// A task or delegation state rule was violated
    #[error("invalid state transition: {current} -> {attempted}")]
    InvalidStateTransition {
        /// State the entity is currently in
        current: String,
        /// State the caller attempted to move to
        attempted: String,
    },

    /// Attempt to delegate a task that already has a non-terminal delegation
    #[error("task {task_id} already has an active delegation")]
    ActiveDelegationExists {
        /// Task with the conflicting delegation
        task_id: String,
    },

    /// An orchestration instance rejected a task because its queue is full
    #[error("instance {instance_id} at capacity ({active}/{max})")]
    CapacityExceeded {
        /// Instance that rejected the task
        instance_id: String,
        /// Currently active (claimed + in-progress) tasks
        active: usize,
        /// Configured maximum
        max: usize,
    },

    /// No candidate instance passed the delegation validity filter
    #[error("routing unavailable: {reason}")]
    RoutingUnavailable {
        /// Why no target could be produced
        reason: String,
    },

    /// A compare-and-act update lost the race; the caller should retry
    #[error("conflicting update, retry")]
    ConflictingUpdate,

    /// An operation exceeded its configured budget
    #[error("{op} exceeded budget of {budget_ms}ms")]
    Timeout {
        /// Operation name
        op: String,
        /// Budget in milliseconds
        budget_ms: u64,
    },

    /// Backing store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HopperError {
    /// Shorthand for a [`HopperError::NotFound`]
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for a [`HopperError::Validation`]
    #[must_use]
    pub fn validation(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`HopperError::InvalidStateTransition`]
    #[must_use]
    pub fn invalid_transition(current: impl ToString, attempted: impl ToString) -> Self {
        Self::InvalidStateTransition {
            current: current.to_string(),
            attempted: attempted.to_string(),
        }
    }
}
