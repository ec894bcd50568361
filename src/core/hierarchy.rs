//! Hierarchical planning: recursive goal decomposition over an action planner.

use std::fmt;

use tracing::{debug, info, warn};

use crate::core::action::Action;
use crate::core::cancel::CancelToken;
use crate::core::error::{EngineError, Result};
use crate::core::goal::Goal;
use crate::core::planner::Planner;
use crate::core::state::WorldState;

/// Decomposes non-atomic goals into ordered subgoals.
///
/// A refiner may signal atomicity through `is_atomic`, or by returning an
/// empty list from `refine` (the planner treats both the same). It must be
/// deterministic from the caller's perspective even when it consults
/// external sources.
pub trait GoalRefiner {
    /// Ordered subgoals that, achieved in sequence, accomplish `goal`.
    fn refine(&self, cancel: &CancelToken, goal: &Goal, current: &WorldState) -> Result<Vec<Goal>>;

    /// True if `goal` cannot be refined further and should be planned with A*.
    fn is_atomic(&self, goal: &Goal, current: &WorldState) -> bool;
}

/// A node in a recursive plan: atomic (actions, no children) or composite
/// (children, no direct actions).
pub struct HierarchicalPlan {
    goal: Goal,
    subplans: Vec<HierarchicalPlan>,
    actions: Vec<Box<dyn Action>>,
    depth: usize,
}

impl fmt::Debug for HierarchicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalPlan")
            .field("goal", &self.goal)
            .field("subplans", &self.subplans)
            .field(
                "actions",
                &self.actions.iter().map(|a| a.name()).collect::<Vec<_>>(),
            )
            .field("depth", &self.depth)
            .finish()
    }
}

impl HierarchicalPlan {
    pub fn goal(&self) -> &Goal {
        &self.goal
    }

    pub fn subplans(&self) -> &[HierarchicalPlan] {
        &self.subplans
    }

    pub fn actions(&self) -> &[Box<dyn Action>] {
        &self.actions
    }

    /// Depth from the root, 0-based.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_atomic(&self) -> bool {
        self.subplans.is_empty()
    }

    /// All leaf actions in execution order.
    pub fn all_actions(&self) -> Vec<&dyn Action> {
        if self.is_atomic() {
            return self.actions.iter().map(|a| a.as_ref()).collect();
        }
        self.subplans
            .iter()
            .flat_map(|subplan| subplan.all_actions())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .subplans
            .iter()
            .map(HierarchicalPlan::node_count)
            .sum::<usize>()
    }

    pub fn max_depth(&self) -> usize {
        self.subplans
            .iter()
            .map(HierarchicalPlan::max_depth)
            .max()
            .unwrap_or(self.depth)
    }

    fn fmt_with_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let prefix = "  ".repeat(indent);
        writeln!(f, "{}goal: {}", prefix, self.goal.name())?;
        if self.is_atomic() {
            writeln!(f, "{}  actions ({}):", prefix, self.actions.len())?;
            for (i, action) in self.actions.iter().enumerate() {
                writeln!(f, "{}    {}. {}", prefix, i + 1, action.name())?;
            }
        } else {
            writeln!(f, "{}  subgoals ({}):", prefix, self.subplans.len())?;
            for subplan in &self.subplans {
                subplan.fmt_with_indent(f, indent + 2)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for HierarchicalPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with_indent(f, 0)
    }
}

/// Combines goal refinement with action planning: goals are recursively
/// decomposed until atomic, then planned with A*.
pub struct HierarchicalPlanner<'a> {
    planner: &'a Planner,
    refiner: &'a dyn GoalRefiner,
    max_depth: usize,
}

impl<'a> HierarchicalPlanner<'a> {
    pub fn new(planner: &'a Planner, refiner: &'a dyn GoalRefiner, max_depth: usize) -> Self {
        Self {
            planner,
            refiner,
            max_depth,
        }
    }

    /// Build a complete plan tree for `goal`, or fail with the first error.
    ///
    /// Partial plans are never returned: any recursive failure aborts the
    /// whole call.
    pub fn plan_hierarchical(
        &self,
        cancel: &CancelToken,
        current: &WorldState,
        goal: &Goal,
    ) -> Result<HierarchicalPlan> {
        info!(goal = goal.name(), "starting hierarchical planning");
        self.plan_recursive(cancel, current, goal, 0)
    }

    fn plan_recursive(
        &self,
        cancel: &CancelToken,
        current: &WorldState,
        goal: &Goal,
        depth: usize,
    ) -> Result<HierarchicalPlan> {
        if depth > self.max_depth {
            return Err(EngineError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }
        cancel.check()?;

        debug!(depth, goal = goal.name(), "planning at depth");

        if goal.is_satisfied(current) {
            debug!(goal = goal.name(), "goal already satisfied");
            return Ok(HierarchicalPlan {
                goal: goal.clone(),
                subplans: Vec::new(),
                actions: Vec::new(),
                depth,
            });
        }

        if self.refiner.is_atomic(goal, current) {
            debug!(goal = goal.name(), "goal is atomic, finding action plan");
            let plan = self.planner.find_plan(cancel, current, goal)?;
            return Ok(HierarchicalPlan {
                goal: goal.clone(),
                subplans: Vec::new(),
                actions: plan.actions,
                depth,
            });
        }

        let subgoals = self.refiner.refine(cancel, goal, current)?;
        if subgoals.is_empty() {
            return Err(EngineError::EmptyRefinement {
                goal: goal.name().to_string(),
            });
        }
        info!(
            goal = goal.name(),
            subgoals = subgoals.len(),
            "goal refined"
        );

        // Thread effects between siblings: each subplan is planned against
        // the simulated post-state of its predecessors, so later subgoals
        // can depend on keys earlier subgoals produce. No executor runs here.
        let mut working = current.clone();
        let mut subplans = Vec::with_capacity(subgoals.len());
        for subgoal in &subgoals {
            let subplan = self
                .plan_recursive(cancel, &working, subgoal, depth + 1)
                .map_err(|err| {
                    warn!(subgoal = subgoal.name(), error = %err, "subgoal planning failed");
                    err
                })?;

            for action in subplan.all_actions() {
                action.simulate(&mut working);
            }
            subplans.push(subplan);
        }

        Ok(HierarchicalPlan {
            goal: goal.clone(),
            subplans,
            actions: Vec::new(),
            depth,
        })
    }
}
