//! LLM-backed goal refiner.
//!
//! Classical planning stays in [`crate::core`]; the model is consulted only
//! for decomposition hints. Its response must conform to an embedded JSON
//! Schema; anything unusable (transport failure, schema violation, empty
//! subgoal list) surfaces as `EmptyRefinement` for the goal being refined.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::core::cancel::CancelToken;
use crate::core::error::{EngineError, Result};
use crate::core::goal::Goal;
use crate::core::hierarchy::GoalRefiner;
use crate::core::state::WorldState;
use crate::refine::generator::Generator;
use crate::refine::prompt::render_refinement;

const REFINEMENT_SCHEMA: &str = include_str!("schemas/refinement.schema.json");

/// Name marker that forces a goal to be treated as atomic.
const ATOMIC_MARKER: &str = "[atomic]";

static SCHEMA: LazyLock<Validator> = LazyLock::new(|| {
    let schema: JsonValue =
        serde_json::from_str(REFINEMENT_SCHEMA).expect("refinement schema should be valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("refinement schema should compile")
});

/// Decomposition response shape required from the generator.
#[derive(Debug, Clone, Deserialize)]
struct GoalRefinement {
    #[allow(dead_code)]
    rationale: String,
    subgoals: Vec<SubgoalSpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubgoalSpec {
    name: String,
    description: String,
    desired_state: WorldState,
}

/// Goal refiner that asks a [`Generator`] for decomposition hints.
pub struct LlmRefiner<G: Generator> {
    generator: G,
}

impl<G: Generator> LlmRefiner<G> {
    pub fn new(generator: G) -> Self {
        Self { generator }
    }

    fn parse_refinement(&self, goal: &Goal, response: &str) -> Result<Vec<Goal>> {
        let value: JsonValue = serde_json::from_str(response).map_err(|err| {
            warn!(goal = goal.name(), error = %err, "refinement response is not JSON");
            empty_refinement(goal)
        })?;

        if !SCHEMA.is_valid(&value) {
            let messages: Vec<String> = SCHEMA.iter_errors(&value).map(|e| e.to_string()).collect();
            warn!(
                goal = goal.name(),
                errors = %messages.join("; "),
                "refinement response violates schema"
            );
            return Err(empty_refinement(goal));
        }

        let refinement: GoalRefinement = serde_json::from_value(value).map_err(|err| {
            warn!(goal = goal.name(), error = %err, "refinement response failed to deserialize");
            empty_refinement(goal)
        })?;

        if refinement.subgoals.is_empty() {
            warn!(goal = goal.name(), "refinement produced zero subgoals");
            return Err(empty_refinement(goal));
        }

        // Earlier subgoals get higher priority so selection helpers prefer
        // prerequisites first.
        let count = refinement.subgoals.len();
        Ok(refinement
            .subgoals
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                Goal::new(
                    spec.name,
                    spec.description,
                    spec.desired_state,
                    (count - i) as f64,
                )
            })
            .collect())
    }
}

impl<G: Generator> GoalRefiner for LlmRefiner<G> {
    fn refine(&self, cancel: &CancelToken, goal: &Goal, current: &WorldState) -> Result<Vec<Goal>> {
        info!(goal = goal.name(), "refining goal");
        cancel.check()?;

        let prompt = render_refinement(goal, current).map_err(|err| {
            warn!(goal = goal.name(), error = %err, "failed to render refinement prompt");
            empty_refinement(goal)
        })?;

        let response = self.generator.generate(cancel, &prompt).map_err(|err| {
            warn!(goal = goal.name(), error = %err, "generator query failed");
            empty_refinement(goal)
        })?;

        let subgoals = self.parse_refinement(goal, &response)?;
        info!(goal = goal.name(), subgoals = subgoals.len(), "goal refined");
        Ok(subgoals)
    }

    /// Atomicity heuristic: goals that pin a single key, carry an explicit
    /// `[atomic]` marker, or sit within one key of the current state are not
    /// worth a decomposition round-trip.
    fn is_atomic(&self, goal: &Goal, current: &WorldState) -> bool {
        if goal.desired().len() == 1 {
            return true;
        }
        if goal.name().to_lowercase().contains(ATOMIC_MARKER) {
            return true;
        }
        let distance = goal.distance(current);
        debug!(goal = goal.name(), distance, "atomicity check");
        distance <= 1
    }
}

fn empty_refinement(goal: &Goal) -> EngineError {
    EngineError::EmptyRefinement {
        goal: goal.name().to_string(),
    }
}
