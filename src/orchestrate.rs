//! Orchestration of a full run: plan, persist, execute, report.
//!
//! Classical planning (decomposition, A*, graph search) makes every
//! deliberative decision; the generator behind the refiner only suggests
//! decompositions and produces content inside leaf actions.

use std::time::Duration;

use tracing::{info, instrument};

use crate::core::action::Action;
use crate::core::cancel::CancelToken;
use crate::core::error::Result;
use crate::core::goal::Goal;
use crate::core::hierarchy::{GoalRefiner, HierarchicalPlan, HierarchicalPlanner};
use crate::core::planner::Planner;
use crate::core::state::WorldState;
use crate::io::executor::GraphExecutor;
use crate::io::graph::{build_graph, GraphStatus};
use crate::io::store::GraphStore;

/// Summary statistics for a hierarchical plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanAnalysis {
    pub total_nodes: usize,
    pub atomic_nodes: usize,
    pub max_depth: usize,
    pub total_actions: usize,
    pub total_cost: f64,
}

/// Walk a plan tree and collect its statistics.
pub fn analyze_plan(plan: &HierarchicalPlan) -> PlanAnalysis {
    let mut analysis = PlanAnalysis {
        total_nodes: 0,
        atomic_nodes: 0,
        max_depth: 0,
        total_actions: 0,
        total_cost: 0.0,
    };
    analyze_recursive(plan, &mut analysis);
    analysis
}

fn analyze_recursive(plan: &HierarchicalPlan, analysis: &mut PlanAnalysis) {
    analysis.total_nodes += 1;
    analysis.max_depth = analysis.max_depth.max(plan.depth());

    if plan.is_atomic() {
        analysis.atomic_nodes += 1;
        analysis.total_actions += plan.actions().len();
        analysis.total_cost += plan.actions().iter().map(|a| a.cost()).sum::<f64>();
    } else {
        for subplan in plan.subplans() {
            analyze_recursive(subplan, analysis);
        }
    }
}

/// Outcome of a completed [`Orchestrator::run_goal`] call.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub analysis: PlanAnalysis,
    pub status: GraphStatus,
}

/// Drives one goal through planning, persistence, and execution.
pub struct Orchestrator<'a> {
    planner: &'a Planner,
    refiner: &'a dyn GoalRefiner,
    store: &'a GraphStore,
    max_depth: usize,
    action_pause: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        planner: &'a Planner,
        refiner: &'a dyn GoalRefiner,
        store: &'a GraphStore,
        max_depth: usize,
    ) -> Self {
        Self {
            planner,
            refiner,
            store,
            max_depth,
            action_pause: crate::io::executor::DEFAULT_ACTION_PAUSE,
        }
    }

    pub fn with_action_pause(mut self, pause: Duration) -> Self {
        self.action_pause = pause;
        self
    }

    /// Plan `goal` hierarchically, persist the lowered graph under `run_id`,
    /// execute it against `state`, and report the final status.
    #[instrument(skip_all, fields(goal = goal.name(), run_id))]
    pub fn run_goal(
        &self,
        cancel: &CancelToken,
        state: &mut WorldState,
        goal: &Goal,
        run_id: &str,
    ) -> Result<RunReport> {
        info!(priority = goal.priority(), "orchestrator starting");

        let hierarchical = HierarchicalPlanner::new(self.planner, self.refiner, self.max_depth);
        let plan = hierarchical.plan_hierarchical(cancel, state, goal)?;
        let analysis = analyze_plan(&plan);
        info!(
            nodes = analysis.total_nodes,
            actions = analysis.total_actions,
            max_depth = analysis.max_depth,
            "planning complete"
        );

        let graph = build_graph(&plan, run_id);
        self.store.save_graph(&graph, run_id)?;
        info!(
            nodes = graph.metadata.total_nodes,
            max_depth = graph.metadata.max_depth,
            "plan graph persisted"
        );

        let mut executor =
            GraphExecutor::new(self.store, run_id).with_action_pause(self.action_pause);
        executor.register_all(
            plan.all_actions()
                .iter()
                .map(|action| action.boxed_clone())
                .collect::<Vec<Box<dyn Action>>>(),
        );

        let status = executor.execute(cancel, state)?;
        info!(
            completed = status.completed,
            skipped = status.skipped,
            failed = status.failed,
            "execution finished"
        );

        Ok(RunReport {
            run_id: run_id.to_string(),
            analysis,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::generator::ScriptedGenerator;
    use crate::refine::llm::LlmRefiner;
    use crate::test_support::{fragment, goal, noop_action};

    fn demo_planner() -> Planner {
        Planner::new(vec![
            Box::new(noop_action("write_code", 2.0, WorldState::new(), fragment(&[("code_written", true)]))),
            Box::new(noop_action(
                "run_tests",
                1.0,
                fragment(&[("code_written", true)]),
                fragment(&[("tests_passed", true)]),
            )),
        ])
    }

    const DECOMPOSITION: &str = r#"{
        "rationale": "write first, then verify",
        "subgoals": [
            {"name": "write", "description": "produce the code", "desired_state": {"code_written": true}},
            {"name": "verify", "description": "make tests pass", "desired_state": {"tests_passed": true}}
        ]
    }"#;

    #[test]
    fn run_goal_plans_persists_and_executes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = GraphStore::new(temp.path());
        let planner = demo_planner();
        let refiner = LlmRefiner::new(ScriptedGenerator::new([DECOMPOSITION.to_string()]));
        let orchestrator = Orchestrator::new(&planner, &refiner, &store, 5)
            .with_action_pause(Duration::ZERO);

        let mut state = WorldState::new();
        let report = orchestrator
            .run_goal(
                &CancelToken::new(),
                &mut state,
                &goal(
                    "ship_feature",
                    fragment(&[("code_written", true), ("tests_passed", true)]),
                ),
                "run-42",
            )
            .expect("run");

        assert_eq!(report.run_id, "run-42");
        assert_eq!(report.analysis.total_nodes, 3);
        assert_eq!(report.analysis.atomic_nodes, 2);
        assert_eq!(report.analysis.total_actions, 2);
        assert_eq!(report.analysis.total_cost, 3.0);
        assert!(report.status.is_complete());
        assert!(!report.status.has_failures());
        assert!(state.matches(&fragment(&[("code_written", true), ("tests_passed", true)])));

        // The graph is on disk and queryable after the run.
        let graph = store.load_graph("run-42").expect("load");
        assert_eq!(graph.metadata.total_nodes, 3);
    }

    #[test]
    fn planning_failure_leaves_no_graph_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = GraphStore::new(temp.path());
        let planner = demo_planner();
        // No scripted response: refinement fails before anything persists.
        let refiner = LlmRefiner::new(ScriptedGenerator::new(Vec::<String>::new()));
        let orchestrator = Orchestrator::new(&planner, &refiner, &store, 5);

        let mut state = WorldState::new();
        let err = orchestrator
            .run_goal(
                &CancelToken::new(),
                &mut state,
                &goal(
                    "ship_feature",
                    fragment(&[("code_written", true), ("tests_passed", true)]),
                ),
                "run-43",
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::core::error::EngineError::EmptyRefinement { .. }
        ));
        assert!(store.load_graph("run-43").is_err());
    }

    #[test]
    fn analysis_counts_costs_across_leaves() {
        let planner = demo_planner();
        let refiner = LlmRefiner::new(ScriptedGenerator::new([DECOMPOSITION.to_string()]));
        let hp = HierarchicalPlanner::new(&planner, &refiner, 5);
        let plan = hp
            .plan_hierarchical(
                &CancelToken::new(),
                &WorldState::new(),
                &goal(
                    "ship_feature",
                    fragment(&[("code_written", true), ("tests_passed", true)]),
                ),
            )
            .expect("plan");

        let analysis = analyze_plan(&plan);
        assert_eq!(analysis.max_depth, 1);
        assert_eq!(analysis.total_cost, 3.0);
    }
}
