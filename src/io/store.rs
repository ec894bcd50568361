//! Graph load/save with atomic writes and per-node context files.
//!
//! Layout under the store base directory:
//!
//! ```text
//! <base>/<run_id>/graph/
//!   plan_graph.json    -- entire PlanGraph
//!   nodes/<id>.json    -- NodeContext per node
//! ```
//!
//! Every file is written via temp file + rename, so persistence is
//! crash-safe at graph granularity. Status updates rewrite the whole graph;
//! intermediate `running` states are advisory only.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::core::error::{EngineError, Result};
use crate::io::graph::{
    build_node_context, validate_graph, NodeContext, NodeResult, NodeStatus, PlanGraph,
};

/// Handle on the on-disk graph layout rooted at `base`.
#[derive(Debug, Clone)]
pub struct GraphStore {
    base: PathBuf,
}

impl GraphStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn graph_dir(&self, run_id: &str) -> PathBuf {
        self.base.join(run_id).join("graph")
    }

    fn graph_path(&self, run_id: &str) -> PathBuf {
        self.graph_dir(run_id).join("plan_graph.json")
    }

    fn node_path(&self, run_id: &str, node_id: &str) -> PathBuf {
        self.graph_dir(run_id)
            .join("nodes")
            .join(format!("{}.json", node_id))
    }

    /// Write the whole graph plus one context file per node.
    pub fn save_graph(&self, graph: &PlanGraph, run_id: &str) -> Result<()> {
        let nodes_dir = self.graph_dir(run_id).join("nodes");
        fs::create_dir_all(&nodes_dir)
            .map_err(|err| EngineError::persistence(format!("create {}", nodes_dir.display()), err))?;

        write_json(&self.graph_path(run_id), graph)?;

        for node_id in graph.nodes.keys() {
            // Contexts embed copies of neighboring nodes, so every context is
            // rewritten whenever any node changes.
            if let Some(context) = build_node_context(graph, node_id) {
                write_json(&self.node_path(run_id, node_id), &context)?;
            }
        }

        info!(run_id, nodes = graph.nodes.len(), "plan graph saved");
        Ok(())
    }

    /// Load and invariant-check the graph for `run_id`.
    pub fn load_graph(&self, run_id: &str) -> Result<PlanGraph> {
        let path = self.graph_path(run_id);
        debug!(path = %path.display(), "loading plan graph");
        let contents = fs::read_to_string(&path)
            .map_err(|err| EngineError::persistence(format!("read {}", path.display()), err))?;
        let graph: PlanGraph = serde_json::from_str(&contents)
            .map_err(|err| EngineError::persistence(format!("parse {}", path.display()), err))?;

        let errors = validate_graph(&graph);
        if !errors.is_empty() {
            return Err(EngineError::persistence(
                format!("invariants violated in {}", path.display()),
                errors.join("; "),
            ));
        }
        Ok(graph)
    }

    /// Load the minimal context slice for one node.
    pub fn load_node_context(&self, run_id: &str, node_id: &str) -> Result<NodeContext> {
        let path = self.node_path(run_id, node_id);
        let contents = fs::read_to_string(&path)
            .map_err(|err| EngineError::persistence(format!("read {}", path.display()), err))?;
        serde_json::from_str(&contents)
            .map_err(|err| EngineError::persistence(format!("parse {}", path.display()), err))
    }

    /// Transition one node's status (and result) and persist the graph.
    pub fn update_node_status(
        &self,
        run_id: &str,
        node_id: &str,
        status: NodeStatus,
        result: Option<NodeResult>,
    ) -> Result<()> {
        let mut graph = self.load_graph(run_id)?;
        let node = graph.nodes.get_mut(node_id).ok_or_else(|| {
            EngineError::persistence(format!("update node '{}'", node_id), "node not found")
        })?;
        debug!(run_id, node_id, status = ?status, "updating node status");
        node.status = status;
        node.result = result;
        self.save_graph(&graph, run_id)
    }
}

/// Serialize to pretty JSON with trailing newline, atomically
/// (temp file + rename).
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .map_err(|err| EngineError::persistence(format!("serialize {}", path.display()), err))?;
    buf.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .map_err(|err| EngineError::persistence(format!("write {}", tmp_path.display()), err))?;
    fs::rename(&tmp_path, path)
        .map_err(|err| EngineError::persistence(format!("replace {}", path.display()), err))
}
