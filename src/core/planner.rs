//! A* action planner over world states.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fmt;

use tracing::{debug, info, warn};

use crate::core::action::Action;
use crate::core::cancel::CancelToken;
use crate::core::error::{EngineError, Result};
use crate::core::goal::Goal;
use crate::core::state::WorldState;

/// Cap on node expansions before the search gives up.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// An ordered action sequence plus its accumulated cost.
///
/// The empty plan is valid and means the goal was already satisfied.
#[derive(Clone, Default)]
pub struct Plan {
    pub actions: Vec<Box<dyn Action>>,
    pub cost: f64,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field(
                "actions",
                &self.actions.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("cost", &self.cost)
            .finish()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            return f.write_str("empty plan");
        }
        writeln!(f, "plan (cost: {:.2}):", self.cost)?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "{}. {}", i + 1, action.name())?;
        }
        Ok(())
    }
}

/// Finds minimum-cost action sequences with A* search.
pub struct Planner {
    actions: Vec<Box<dyn Action>>,
    max_iterations: usize,
}

impl Planner {
    pub fn new(actions: Vec<Box<dyn Action>>) -> Self {
        Self {
            actions,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn add_action(&mut self, action: Box<dyn Action>) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    /// Find the cheapest action sequence from `current` to `goal`.
    ///
    /// Returns the empty plan when the goal is already satisfied and
    /// [`EngineError::NoPlanFor`] when the search space or iteration cap is
    /// exhausted. Plans are deterministic: ties on f-cost break toward lower
    /// g-cost, then toward the order actions were registered.
    pub fn find_plan(&self, cancel: &CancelToken, current: &WorldState, goal: &Goal) -> Result<Plan> {
        info!(goal = goal.name(), state = %current, "starting plan search");

        if goal.is_satisfied(current) {
            info!(goal = goal.name(), "goal already satisfied, no actions needed");
            return Ok(Plan::default());
        }

        let mut open = BinaryHeap::new();
        let mut closed: HashSet<String> = HashSet::new();
        let mut seq: u64 = 0;

        open.push(SearchNode {
            state: current.clone(),
            path: Vec::new(),
            g_cost: 0.0,
            h_cost: goal.distance(current) as f64,
            seq,
        });

        let mut iterations = 0;
        while let Some(node) = open.pop() {
            if iterations >= self.max_iterations {
                warn!(
                    max_iterations = self.max_iterations,
                    goal = goal.name(),
                    "plan search reached iteration cap"
                );
                break;
            }
            iterations += 1;
            cancel.check()?;

            let state_key = node.state.stringify();
            if !closed.insert(state_key.clone()) {
                continue;
            }

            debug!(
                depth = node.path.len(),
                f_cost = node.f_cost(),
                state = %state_key,
                "exploring node"
            );

            if goal.is_satisfied(&node.state) {
                info!(
                    goal = goal.name(),
                    actions = node.path.len(),
                    cost = node.g_cost,
                    iterations,
                    "plan found"
                );
                return Ok(Plan {
                    actions: node
                        .path
                        .iter()
                        .map(|&idx| self.actions[idx].boxed_clone())
                        .collect(),
                    cost: node.g_cost,
                });
            }

            for (idx, action) in self.actions.iter().enumerate() {
                if !action.can_execute(&node.state) {
                    continue;
                }

                let mut successor = node.state.clone();
                successor.apply(action.effects());
                if closed.contains(&successor.stringify()) {
                    continue;
                }

                let mut path = node.path.clone();
                path.push(idx);
                seq += 1;
                open.push(SearchNode {
                    h_cost: goal.distance(&successor) as f64,
                    state: successor,
                    path,
                    g_cost: node.g_cost + action.cost(),
                    seq,
                });
            }
        }

        warn!(goal = goal.name(), iterations, "no plan found");
        Err(EngineError::NoPlanFor {
            goal: goal.name().to_string(),
        })
    }
}

/// A state reached during search, with the action indices that reached it.
struct SearchNode {
    state: WorldState,
    path: Vec<usize>,
    g_cost: f64,
    h_cost: f64,
    seq: u64,
}

impl SearchNode {
    fn f_cost(&self) -> f64 {
        self.g_cost + self.h_cost
    }
}

// BinaryHeap is a max-heap, so the ordering is reversed: the "greatest" node
// is the one with the lowest f-cost, then lowest g-cost, then earliest
// insertion. The tie chain keeps plans deterministic for identical inputs.
impl Ord for SearchNode {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_cost()
            .total_cmp(&self.f_cost())
            .then_with(|| other.g_cost.total_cmp(&self.g_cost))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for SearchNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SearchNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SearchNode {}
