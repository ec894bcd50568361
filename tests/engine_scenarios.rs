//! End-to-end scenarios across planning, persistence, and execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plangraph::core::action::{Action, SimpleAction};
use plangraph::core::cancel::CancelToken;
use plangraph::core::error::{EngineError, Result as EngineResult};
use plangraph::core::goal::Goal;
use plangraph::core::hierarchy::{GoalRefiner, HierarchicalPlanner};
use plangraph::core::planner::Planner;
use plangraph::core::state::WorldState;
use plangraph::io::executor::GraphExecutor;
use plangraph::io::graph::{build_graph, NodeStatus, PlanGraph};
use plangraph::io::store::GraphStore;
use plangraph::refine::generator::ScriptedGenerator;
use plangraph::refine::llm::LlmRefiner;
use plangraph::test_support::{failing_action, fragment, goal, noop_action};

/// Refiner that never decomposes: every goal goes straight to A*.
struct AlwaysAtomic;

impl GoalRefiner for AlwaysAtomic {
    fn refine(&self, _: &CancelToken, _: &Goal, _: &WorldState) -> EngineResult<Vec<Goal>> {
        Ok(Vec::new())
    }

    fn is_atomic(&self, _: &Goal, _: &WorldState) -> bool {
        true
    }
}

/// Action that appends its name to a shared trace when executed.
fn tracing_action(
    name: &str,
    cost: f64,
    pre: WorldState,
    eff: WorldState,
    trace: Arc<Mutex<Vec<String>>>,
) -> SimpleAction {
    let recorded = name.to_string();
    SimpleAction::new(
        name,
        "records execution order",
        pre,
        eff,
        cost,
        Arc::new(move |_, _| {
            trace
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(recorded.clone());
            Ok(())
        }),
    )
}

fn plan_and_save(
    store: &GraphStore,
    run_id: &str,
    planner: &Planner,
    refiner: &dyn GoalRefiner,
    initial: &WorldState,
    root_goal: &Goal,
) -> PlanGraph {
    let hierarchical = HierarchicalPlanner::new(planner, refiner, 5);
    let plan = hierarchical
        .plan_hierarchical(&CancelToken::new(), initial, root_goal)
        .expect("plan");
    let graph = build_graph(&plan, "scenario-agent");
    store.save_graph(&graph, run_id).expect("save");
    graph
}

const TWO_SUBGOALS: &str = r#"{
    "rationale": "establish a first, then b",
    "subgoals": [
        {"name": "g1", "description": "reach a=1", "desired_state": {"a": 1}},
        {"name": "g2", "description": "reach b=2", "desired_state": {"b": 2}}
    ]
}"#;

fn refinement_planner(trace: &Arc<Mutex<Vec<String>>>) -> Planner {
    Planner::new(vec![
        Box::new(tracing_action(
            "a1",
            1.0,
            WorldState::new(),
            fragment(&[("a", 1)]),
            Arc::clone(trace),
        )),
        Box::new(tracing_action(
            "a2",
            1.0,
            fragment(&[("a", 1)]),
            fragment(&[("b", 2)]),
            Arc::clone(trace),
        )),
    ])
}

/// Scenario: empty goal over an empty state plans to nothing and executes to
/// a single skipped node.
#[test]
fn empty_goal_skips_single_node() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());
    let planner = Planner::new(vec![]);

    let graph = plan_and_save(
        &store,
        "empty",
        &planner,
        &AlwaysAtomic,
        &WorldState::new(),
        &goal("nothing", WorldState::new()),
    );
    assert_eq!(graph.metadata.total_nodes, 1);
    assert!(graph.root().expect("root").action_names.is_empty());

    let exec = GraphExecutor::new(&store, "empty").with_action_pause(Duration::ZERO);
    let mut state = WorldState::new();
    let status = exec.execute(&CancelToken::new(), &mut state).expect("execute");

    assert_eq!(status.skipped, 1);
    assert!(status.is_complete());
    assert!(!status.has_failures());
}

/// Scenario: two-step linear plan runs both actions in declared order and
/// completes the root.
#[test]
fn two_step_linear_plan_executes_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());
    let trace = Arc::new(Mutex::new(Vec::new()));

    let planner = Planner::new(vec![
        Box::new(tracing_action("A1", 1.0, WorldState::new(), fragment(&[("s1", true)]), Arc::clone(&trace))),
        Box::new(tracing_action("A2", 1.0, fragment(&[("s1", true)]), fragment(&[("s2", true)]), Arc::clone(&trace))),
    ]);

    let hierarchical = HierarchicalPlanner::new(&planner, &AlwaysAtomic, 5);
    let plan = hierarchical
        .plan_hierarchical(
            &CancelToken::new(),
            &WorldState::new(),
            &goal("both", fragment(&[("s1", true), ("s2", true)])),
        )
        .expect("plan");

    let names: Vec<&str> = plan.all_actions().iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["A1", "A2"]);

    let graph = build_graph(&plan, "scenario-agent");
    store.save_graph(&graph, "linear").expect("save");

    let mut exec = GraphExecutor::new(&store, "linear").with_action_pause(Duration::ZERO);
    exec.register_all(plan.all_actions().iter().map(|a| a.boxed_clone()).collect());

    let mut state = WorldState::new();
    let status = exec.execute(&CancelToken::new(), &mut state).expect("execute");

    assert_eq!(*trace.lock().expect("trace"), vec!["A1", "A2"]);
    assert_eq!(status.completed, 1);
    assert!(status.is_complete());

    let stored = store.load_graph("linear").expect("load");
    assert_eq!(stored.root().expect("root").status, NodeStatus::Completed);
}

/// An atomic root with zero actions and an unsatisfied goal still completes:
/// there is nothing to run, and completion is recorded vacuously.
#[test]
fn zero_action_atomic_root_completes_when_not_satisfied() {
    use plangraph::io::graph::{GraphMetadata, GraphNode};
    use std::collections::BTreeMap;

    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());

    let root = GraphNode {
        id: "node_1".to_string(),
        goal_name: "vacuous".to_string(),
        goal_description: "atomic node without actions".to_string(),
        desired_state: fragment(&[("x", true)]),
        parent_id: String::new(),
        child_ids: Vec::new(),
        action_names: Vec::new(),
        is_atomic: true,
        depth: 0,
        status: NodeStatus::Pending,
        result: None,
    };
    let graph = PlanGraph {
        root_node_id: "node_1".to_string(),
        nodes: BTreeMap::from([("node_1".to_string(), root)]),
        metadata: GraphMetadata {
            agent_id: "scenario-agent".to_string(),
            created_at: "2026-08-02T00:00:00Z".to_string(),
            total_nodes: 1,
            max_depth: 0,
        },
    };
    store.save_graph(&graph, "vacuous").expect("save");

    let exec = GraphExecutor::new(&store, "vacuous").with_action_pause(Duration::ZERO);
    let mut state = WorldState::new();
    let status = exec.execute(&CancelToken::new(), &mut state).expect("execute");

    assert_eq!(status.completed, 1);
    assert_eq!(status.skipped, 0);
    assert!(status.is_complete());
}

/// Scenario: A* prefers the cheaper two-action path over a costly shortcut.
#[test]
fn astar_prefers_cheaper_composed_path() {
    let planner = Planner::new(vec![
        Box::new(noop_action("A", 10.0, WorldState::new(), fragment(&[("g", true)]))),
        Box::new(noop_action("B", 1.0, WorldState::new(), fragment(&[("x", true)]))),
        Box::new(noop_action("C", 1.0, fragment(&[("x", true)]), fragment(&[("g", true)]))),
    ]);

    let plan = planner
        .find_plan(
            &CancelToken::new(),
            &WorldState::new(),
            &goal("g", fragment(&[("g", true)])),
        )
        .expect("plan");

    let names: Vec<&str> = plan.actions.iter().map(|a| a.name()).collect();
    assert_eq!(names, vec!["B", "C"]);
    assert_eq!(plan.cost, 2.0);

    // Replaying the plan's effects over the initial state reaches the goal.
    let mut replay = WorldState::new();
    for action in &plan.actions {
        replay.apply(action.effects());
    }
    assert!(replay.matches(&fragment(&[("g", true)])));
}

/// Scenario: LLM-style refinement produces a three-node graph that executes
/// root, then each leaf in order.
#[test]
fn hierarchical_refinement_executes_leaves_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());
    let trace = Arc::new(Mutex::new(Vec::new()));
    let planner = refinement_planner(&trace);
    let refiner = LlmRefiner::new(ScriptedGenerator::new([TWO_SUBGOALS.to_string()]));

    let graph = plan_and_save(
        &store,
        "refined",
        &planner,
        &refiner,
        &WorldState::new(),
        &goal("root", fragment(&[("a", 1), ("b", 2)])),
    );
    assert_eq!(graph.metadata.total_nodes, 3);
    assert_eq!(graph.metadata.max_depth, 1);

    let mut exec = GraphExecutor::new(&store, "refined").with_action_pause(Duration::ZERO);
    exec.register_all(vec![
        Box::new(tracing_action("a1", 1.0, WorldState::new(), fragment(&[("a", 1)]), Arc::clone(&trace))),
        Box::new(tracing_action("a2", 1.0, fragment(&[("a", 1)]), fragment(&[("b", 2)]), Arc::clone(&trace))),
    ]);

    let mut state = WorldState::new();
    let status = exec.execute(&CancelToken::new(), &mut state).expect("execute");

    assert_eq!(*trace.lock().expect("trace"), vec!["a1", "a2"]);
    assert_eq!(status.completed, 3);
    assert!(status.is_complete());
    assert!(!status.has_failures());
}

/// Scenario: a failing second sibling marks itself and the root failed while
/// the completed first sibling keeps its status.
#[test]
fn sibling_failure_propagates_to_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());
    let trace = Arc::new(Mutex::new(Vec::new()));
    let planner = refinement_planner(&trace);
    let refiner = LlmRefiner::new(ScriptedGenerator::new([TWO_SUBGOALS.to_string()]));

    plan_and_save(
        &store,
        "failing",
        &planner,
        &refiner,
        &WorldState::new(),
        &goal("root", fragment(&[("a", 1), ("b", 2)])),
    );

    let mut exec = GraphExecutor::new(&store, "failing").with_action_pause(Duration::ZERO);
    exec.register_all(vec![
        Box::new(tracing_action("a1", 1.0, WorldState::new(), fragment(&[("a", 1)]), Arc::clone(&trace))),
        Box::new(failing_action("a2", fragment(&[("a", 1)]), fragment(&[("b", 2)]), "simulated tool failure")),
    ]);

    let mut state = WorldState::new();
    let err = exec.execute(&CancelToken::new(), &mut state).unwrap_err();
    match &err {
        EngineError::ChildFailed { child_id, .. } => assert_eq!(child_id, "node_3"),
        other => panic!("unexpected error: {other}"),
    }

    let graph = store.load_graph("failing").expect("load");
    assert_eq!(graph.node("node_2").expect("n").status, NodeStatus::Completed);
    assert_eq!(graph.node("node_3").expect("n").status, NodeStatus::Failed);
    assert_eq!(graph.node("node_1").expect("n").status, NodeStatus::Failed);

    let status = exec.status().expect("status");
    assert!(status.has_failures());
}

/// Scenario: an already-satisfied initial state skips every node and invokes
/// no action executors.
#[test]
fn satisfied_initial_state_skips_everything() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());
    let trace = Arc::new(Mutex::new(Vec::new()));
    let planner = refinement_planner(&trace);
    let refiner = LlmRefiner::new(ScriptedGenerator::new([TWO_SUBGOALS.to_string()]));

    plan_and_save(
        &store,
        "satisfied",
        &planner,
        &refiner,
        &WorldState::new(),
        &goal("root", fragment(&[("a", 1), ("b", 2)])),
    );

    let invoked = Arc::new(AtomicUsize::new(0));
    let mk_counting = |name: &str, pre: WorldState, eff: WorldState| {
        let counter = Arc::clone(&invoked);
        SimpleAction::new(
            name,
            "must not run",
            pre,
            eff,
            1.0,
            Arc::new(move |_: &CancelToken, _: &mut WorldState| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
    };

    let mut exec = GraphExecutor::new(&store, "satisfied").with_action_pause(Duration::ZERO);
    exec.register_all(vec![
        Box::new(mk_counting("a1", WorldState::new(), fragment(&[("a", 1)]))),
        Box::new(mk_counting("a2", fragment(&[("a", 1)]), fragment(&[("b", 2)]))),
    ]);

    let mut state = fragment(&[("a", 1), ("b", 2)]);
    let status = exec.execute(&CancelToken::new(), &mut state).expect("execute");

    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(status.skipped, 3);
    assert_eq!(status.pending + status.running + status.failed + status.completed, 0);
    assert!(status.is_complete());
}

/// A persisted graph reloads bit-identically, and a second execution of a
/// finished run changes nothing.
#[test]
fn persistence_round_trip_and_idempotent_rerun() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = GraphStore::new(temp.path());
    let trace = Arc::new(Mutex::new(Vec::new()));
    let planner = refinement_planner(&trace);
    let refiner = LlmRefiner::new(ScriptedGenerator::new([TWO_SUBGOALS.to_string()]));

    let graph = plan_and_save(
        &store,
        "rerun",
        &planner,
        &refiner,
        &WorldState::new(),
        &goal("root", fragment(&[("a", 1), ("b", 2)])),
    );
    assert_eq!(store.load_graph("rerun").expect("load"), graph);

    let mut exec = GraphExecutor::new(&store, "rerun").with_action_pause(Duration::ZERO);
    exec.register_all(vec![
        Box::new(tracing_action("a1", 1.0, WorldState::new(), fragment(&[("a", 1)]), Arc::clone(&trace))),
        Box::new(tracing_action("a2", 1.0, fragment(&[("a", 1)]), fragment(&[("b", 2)]), Arc::clone(&trace))),
    ]);

    let mut state = WorldState::new();
    let first = exec.execute(&CancelToken::new(), &mut state).expect("first");
    let persisted_after_first = store.load_graph("rerun").expect("load");

    let mut fresh_state = WorldState::new();
    let second = exec.execute(&CancelToken::new(), &mut fresh_state).expect("second");

    assert_eq!(first, second);
    assert_eq!(store.load_graph("rerun").expect("load"), persisted_after_first);
    assert_eq!(
        trace.lock().expect("trace").len(),
        2,
        "second run must not re-execute actions"
    );
}

/// Effect threading: the second sibling is planned against the simulated
/// post-state of the first, so its leaf carries only the incremental action.
/// A subgoal no action sequence can reach fails the whole tree.
#[test]
fn effect_threading_plans_siblings_incrementally() {
    let planner = Planner::new(vec![
        Box::new(noop_action("make_a", 1.0, WorldState::new(), fragment(&[("a", 1)]))),
        Box::new(noop_action("make_b", 1.0, fragment(&[("a", 1)]), fragment(&[("b", 2)]))),
    ]);

    let forward = LlmRefiner::new(ScriptedGenerator::new([TWO_SUBGOALS.to_string()]));
    let hierarchical = HierarchicalPlanner::new(&planner, &forward, 5);
    let plan = hierarchical
        .plan_hierarchical(
            &CancelToken::new(),
            &WorldState::new(),
            &goal("root", fragment(&[("a", 1), ("b", 2)])),
        )
        .expect("plan");

    let leaves: Vec<Vec<&str>> = plan
        .subplans()
        .iter()
        .map(|sub| sub.all_actions().iter().map(|a| a.name()).collect())
        .collect();
    // Without threading the g2 leaf would have to re-derive "a" and plan
    // [make_a, make_b] against the initial state.
    assert_eq!(leaves, vec![vec!["make_a"], vec!["make_b"]]);

    let unreachable = r#"{
        "rationale": "asks for a key nothing produces",
        "subgoals": [
            {"name": "impossible", "description": "cannot happen", "desired_state": {"z": 9}}
        ]
    }"#;
    let stuck = LlmRefiner::new(ScriptedGenerator::new([unreachable.to_string()]));
    let hierarchical = HierarchicalPlanner::new(&planner, &stuck, 5);
    let err = hierarchical
        .plan_hierarchical(
            &CancelToken::new(),
            &WorldState::new(),
            &goal("root", fragment(&[("a", 1), ("b", 2)])),
        )
        .unwrap_err();
    match err {
        EngineError::NoPlanFor { goal } => assert_eq!(goal, "impossible"),
        other => panic!("unexpected error: {other}"),
    }
}
