//! Test-only helpers for constructing states, actions, and goals.

use std::sync::Arc;

use crate::core::action::SimpleAction;
use crate::core::goal::Goal;
use crate::core::state::{Value, WorldState};

/// Build a state fragment from literal pairs.
pub fn fragment<V: Into<Value> + Clone>(pairs: &[(&str, V)]) -> WorldState {
    pairs
        .iter()
        .map(|(key, value)| (*key, value.clone().into()))
        .collect()
}

/// An action whose callback always succeeds without touching the state.
pub fn noop_action(
    name: &str,
    cost: f64,
    preconditions: WorldState,
    effects: WorldState,
) -> SimpleAction {
    SimpleAction::new(
        name,
        format!("{} (test action)", name),
        preconditions,
        effects,
        cost,
        Arc::new(|_, _| Ok(())),
    )
}

/// An action whose callback always fails with `message`.
pub fn failing_action(
    name: &str,
    preconditions: WorldState,
    effects: WorldState,
    message: &str,
) -> SimpleAction {
    let message = message.to_string();
    SimpleAction::new(
        name,
        format!("{} (failing test action)", name),
        preconditions,
        effects,
        1.0,
        Arc::new(move |_, _| anyhow::bail!("{}", message)),
    )
}

/// A goal with a derived description and priority 1.0.
pub fn goal(name: &str, desired: WorldState) -> Goal {
    Goal::new(name, format!("{} (test goal)", name), desired, 1.0)
}
