//! Tagged error kinds surfaced by the engine.

use thiserror::Error;

/// Every failure the engine itself can produce.
///
/// Collaborator code (action callbacks, generators) reports failures as
/// `anyhow::Error`; the engine wraps those into the tagged kinds below at the
/// point where they enter engine control flow. The engine never retries:
/// retry and fallback behaviors compose as wrapper actions
/// (see [`crate::actions::resilience`]).
#[derive(Debug, Error)]
pub enum EngineError {
    /// `execute` was called on a state that does not match preconditions.
    #[error("action '{action}' cannot execute: preconditions not met")]
    PreconditionViolated { action: String },

    /// A* exhausted its search space or iteration cap.
    #[error("no action plan found for atomic goal '{goal}'")]
    NoPlanFor { goal: String },

    /// Hierarchical recursion went beyond the configured depth.
    #[error("maximum planning depth exceeded: {max_depth}")]
    DepthExceeded { max_depth: usize },

    /// The refiner returned nothing usable for a non-atomic goal.
    #[error("goal refinement produced no subgoals for '{goal}'")]
    EmptyRefinement { goal: String },

    /// An atomic node referenced an action name the executor does not know.
    #[error("action not registered: '{action}'")]
    ActionNotRegistered { action: String },

    /// An action's executor callback returned an error.
    #[error("action '{action}' failed: {cause}")]
    ActionFailed {
        action: String,
        cause: anyhow::Error,
    },

    /// A sub-action of a composite action failed.
    #[error("composite action '{composite}' failed at subaction {index} ({sub}): {cause}")]
    CompositeFailure {
        composite: String,
        index: usize,
        sub: String,
        cause: Box<EngineError>,
    },

    /// A child node of a composite graph node failed.
    #[error("child node '{child_id}' failed: {cause}")]
    ChildFailed {
        child_id: String,
        cause: Box<EngineError>,
    },

    /// External cancellation (or deadline expiry) was observed.
    #[error("cancelled")]
    Cancelled,

    /// I/O or serialization failure on the persisted graph.
    #[error("graph persistence failed: {message}")]
    Persistence { message: String },
}

impl EngineError {
    /// Build a persistence error carrying the failing operation's context.
    pub fn persistence(context: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Persistence {
            message: format!("{}: {}", context.into(), source),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
