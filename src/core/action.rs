//! Actions: named state transformations with preconditions and effects.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::core::cancel::CancelToken;
use crate::core::error::{EngineError, Result};
use crate::core::state::WorldState;

/// Callback that performs an action's real work: an LLM prompt, a tool run,
/// or any other collaborator behavior. It may mutate the state directly;
/// the engine applies the declared effects afterwards on success.
pub type ActionFn = Arc<dyn Fn(&CancelToken, &mut WorldState) -> anyhow::Result<()> + Send + Sync>;

/// A unit of work the planner can schedule.
///
/// Implementations must keep `preconditions`, `effects`, and `cost` stable
/// for the lifetime of a planner instance; `cost` is non-negative and read
/// as complexity (lower is preferred during planning).
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// World-state fragment that must hold before this action can run.
    fn preconditions(&self) -> &WorldState;

    /// World-state fragment applied to the state after a successful run.
    fn effects(&self) -> &WorldState;

    fn cost(&self) -> f64;

    fn can_execute(&self, current: &WorldState) -> bool {
        current.matches(self.preconditions())
    }

    /// Perform the action against `current`.
    ///
    /// Re-checks preconditions defensively even though the planner never
    /// schedules a non-matching call. Partial effect application on failure
    /// is permitted, but a failing action must return an error.
    fn execute(&self, cancel: &CancelToken, current: &mut WorldState) -> Result<()>;

    /// Independent copy safe for use in another planner instance.
    fn boxed_clone(&self) -> Box<dyn Action>;

    /// Apply the effects this action would have if executed, without running
    /// its callback. Composites fold in their sub-actions' effects first.
    /// Used for effect threading between sibling subplans during planning.
    fn simulate(&self, target: &mut WorldState) {
        target.apply(self.effects());
    }
}

impl Clone for Box<dyn Action> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}

impl fmt::Debug for dyn Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name())
            .field("cost", &self.cost())
            .finish()
    }
}

/// An action defined by a single execution callback.
#[derive(Clone)]
pub struct SimpleAction {
    name: String,
    description: String,
    preconditions: WorldState,
    effects: WorldState,
    cost: f64,
    execute_fn: ActionFn,
}

impl SimpleAction {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        preconditions: WorldState,
        effects: WorldState,
        cost: f64,
        execute_fn: ActionFn,
    ) -> Self {
        debug_assert!(cost >= 0.0, "action cost must be non-negative");
        Self {
            name: name.into(),
            description: description.into(),
            preconditions,
            effects,
            cost,
            execute_fn,
        }
    }
}

impl Action for SimpleAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn preconditions(&self) -> &WorldState {
        &self.preconditions
    }

    fn effects(&self) -> &WorldState {
        &self.effects
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn execute(&self, cancel: &CancelToken, current: &mut WorldState) -> Result<()> {
        if !self.can_execute(current) {
            return Err(EngineError::PreconditionViolated {
                action: self.name.clone(),
            });
        }

        (self.execute_fn)(cancel, current).map_err(|cause| EngineError::ActionFailed {
            action: self.name.clone(),
            cause,
        })?;

        current.apply(&self.effects);
        Ok(())
    }

    fn boxed_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }
}

/// An action bundling an ordered list of sub-actions.
///
/// Sub-actions run in declared order under the parent's preconditions; the
/// parent's own effects apply only after every sub-action succeeded. This is
/// a separate type, not a subtype of [`SimpleAction`]: the engine treats
/// composite and simple actions as distinct variants of the same trait.
#[derive(Clone)]
pub struct CompositeAction {
    name: String,
    description: String,
    preconditions: WorldState,
    effects: WorldState,
    cost: f64,
    subactions: Vec<Box<dyn Action>>,
}

impl CompositeAction {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        preconditions: WorldState,
        effects: WorldState,
        cost: f64,
        subactions: Vec<Box<dyn Action>>,
    ) -> Self {
        debug_assert!(cost >= 0.0, "action cost must be non-negative");
        Self {
            name: name.into(),
            description: description.into(),
            preconditions,
            effects,
            cost,
            subactions,
        }
    }

    pub fn push(&mut self, subaction: Box<dyn Action>) {
        self.subactions.push(subaction);
    }

    pub fn subactions(&self) -> &[Box<dyn Action>] {
        &self.subactions
    }
}

impl Action for CompositeAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn preconditions(&self) -> &WorldState {
        &self.preconditions
    }

    fn effects(&self) -> &WorldState {
        &self.effects
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn execute(&self, cancel: &CancelToken, current: &mut WorldState) -> Result<()> {
        if !self.can_execute(current) {
            return Err(EngineError::PreconditionViolated {
                action: self.name.clone(),
            });
        }

        for (index, sub) in self.subactions.iter().enumerate() {
            cancel.check()?;
            debug!(composite = %self.name, index, sub = %sub.name(), "running subaction");
            if let Err(cause) = sub.execute(cancel, current) {
                return Err(EngineError::CompositeFailure {
                    composite: self.name.clone(),
                    index,
                    sub: sub.name().to_string(),
                    cause: Box::new(cause),
                });
            }
        }

        current.apply(&self.effects);
        Ok(())
    }

    fn boxed_clone(&self) -> Box<dyn Action> {
        Box::new(self.clone())
    }

    fn simulate(&self, target: &mut WorldState) {
        for sub in &self.subactions {
            sub.simulate(target);
        }
        target.apply(&self.effects);
    }
}
