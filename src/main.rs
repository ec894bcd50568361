//! Goal-driven planning and execution CLI.
//!
//! Wraps the engine library: inspect persisted plan graphs (`status`,
//! `validate`) or run the built-in scripted demo end-to-end (`demo`).

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};

use plangraph::core::action::SimpleAction;
use plangraph::core::cancel::CancelToken;
use plangraph::core::goal::Goal;
use plangraph::core::planner::Planner;
use plangraph::core::state::WorldState;
use plangraph::io::config::{load_config, EngineConfig};
use plangraph::io::graph::graph_status;
use plangraph::io::store::GraphStore;
use plangraph::orchestrate::Orchestrator;
use plangraph::refine::generator::ScriptedGenerator;
use plangraph::refine::llm::LlmRefiner;

#[derive(Parser)]
#[command(
    name = "plangraph",
    version,
    about = "Hierarchical goal-oriented planning and execution engine"
)]
struct Cli {
    /// Path to the engine config file.
    #[arg(long, default_value = "plangraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print status counts for a persisted plan graph.
    Status {
        /// Run identifier under the output directory.
        run_id: String,
    },
    /// Check a persisted plan graph against its structural invariants.
    Validate {
        /// Run identifier under the output directory.
        run_id: String,
    },
    /// Plan and execute a built-in scripted goal end-to-end.
    Demo {
        /// Run identifier; defaults to a timestamped id.
        #[arg(long)]
        run_id: Option<String>,
    },
}

fn main() {
    plangraph::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;
    let store = GraphStore::new(&cfg.output_dir);

    match cli.command {
        Command::Status { run_id } => cmd_status(&store, &run_id),
        Command::Validate { run_id } => cmd_validate(&store, &run_id),
        Command::Demo { run_id } => cmd_demo(&store, &cfg, run_id),
    }
}

fn cmd_status(store: &GraphStore, run_id: &str) -> Result<()> {
    let graph = store
        .load_graph(run_id)
        .with_context(|| format!("load graph for run '{}'", run_id))?;
    let status = graph_status(&graph);
    let mut payload = serde_json::to_string_pretty(&status).context("serialize status")?;
    payload.push('\n');
    print!("{}", payload);
    Ok(())
}

fn cmd_validate(store: &GraphStore, run_id: &str) -> Result<()> {
    match store.load_graph(run_id) {
        Ok(graph) => {
            println!(
                "ok: {} nodes, max depth {}",
                graph.metadata.total_nodes, graph.metadata.max_depth
            );
            Ok(())
        }
        Err(err) => bail!("graph validation failed: {}", err),
    }
}

/// Runs the canonical feature-shipping scenario against a scripted
/// decomposition, exercising the whole plan -> persist -> execute pipeline
/// without a live model.
fn cmd_demo(store: &GraphStore, cfg: &EngineConfig, run_id: Option<String>) -> Result<()> {
    let run_id = run_id.unwrap_or_else(|| format!("demo-{}", Utc::now().format("%Y%m%d-%H%M%S")));

    let planner = Planner::new(vec![
        Box::new(demo_action(
            "write_code",
            "pretend to write the implementation",
            2.0,
            WorldState::new(),
            [("code_written", true)].into_iter().collect(),
        )),
        Box::new(demo_action(
            "run_tests",
            "pretend to run the test suite",
            1.0,
            [("code_written", true)].into_iter().collect(),
            [("tests_passed", true)].into_iter().collect(),
        )),
    ])
    .with_max_iterations(cfg.max_iterations);

    let decomposition = r#"{
        "rationale": "write the code first, then make the tests pass",
        "subgoals": [
            {"name": "write", "description": "produce the implementation", "desired_state": {"code_written": true}},
            {"name": "verify", "description": "get the suite green", "desired_state": {"tests_passed": true}}
        ]
    }"#;
    let refiner = LlmRefiner::new(ScriptedGenerator::new([decomposition.to_string()]));

    let orchestrator = Orchestrator::new(&planner, &refiner, store, cfg.max_depth)
        .with_action_pause(Duration::from_millis(cfg.action_pause_ms));
    let goal = Goal::new(
        "ship_feature",
        "implement a feature and pass quality gates",
        [("code_written", true), ("tests_passed", true)]
            .into_iter()
            .collect(),
        1.0,
    );

    let mut state = WorldState::new();
    let report = orchestrator.run_goal(&CancelToken::new(), &mut state, &goal, &run_id)?;

    println!("run:        {}", report.run_id);
    println!(
        "plan:       {} nodes ({} atomic), {} actions, cost {:.1}",
        report.analysis.total_nodes,
        report.analysis.atomic_nodes,
        report.analysis.total_actions,
        report.analysis.total_cost
    );
    println!(
        "execution:  {} completed, {} skipped, {} failed",
        report.status.completed, report.status.skipped, report.status.failed
    );
    println!("final:      {}", state.stringify());
    Ok(())
}

/// A leaf action that just announces itself; the demo exercises the engine,
/// not real tooling.
fn demo_action(
    name: &str,
    description: &str,
    cost: f64,
    preconditions: WorldState,
    effects: WorldState,
) -> SimpleAction {
    let announced = name.to_string();
    SimpleAction::new(
        name,
        description,
        preconditions,
        effects,
        cost,
        std::sync::Arc::new(move |_, _| {
            println!("  -> {}", announced);
            Ok(())
        }),
    )
}
