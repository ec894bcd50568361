//! Plan graph: the persisted rendering of a hierarchical plan.
//!
//! The graph is a tree by construction (every node has exactly one parent)
//! held in arena style: nodes live in an id-keyed map and reference each
//! other by id only, so serialization and reloading are trivial and cycles
//! are impossible by structure.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::hierarchy::HierarchicalPlan;
use crate::core::state::WorldState;

/// Execution status of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    /// Completed, failed, and skipped are terminal for a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Outcome recorded on a node once it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_changes: Option<WorldState>,
}

impl NodeResult {
    pub fn success(state_changes: Option<WorldState>) -> Self {
        Self {
            success: true,
            error_message: None,
            state_changes,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            state_changes: None,
        }
    }
}

/// A single node of the persisted plan graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub goal_name: String,
    pub goal_description: String,
    pub desired_state: WorldState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub child_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_names: Vec<String>,
    pub is_atomic: bool,
    pub depth: usize,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<NodeResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub agent_id: String,
    pub created_at: String,
    pub total_nodes: usize,
    pub max_depth: usize,
}

/// The whole persisted plan graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanGraph {
    pub root_node_id: String,
    pub nodes: BTreeMap<String, GraphNode>,
    pub metadata: GraphMetadata,
}

impl PlanGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn root(&self) -> Option<&GraphNode> {
        self.nodes.get(&self.root_node_id)
    }
}

/// The slice of the graph an executor loads to process one node: the node,
/// its parent, its ordered children and siblings, and the id path from the
/// root down to the node inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeContext {
    pub node: GraphNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<GraphNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GraphNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub siblings: Vec<GraphNode>,
    pub path_from_root: Vec<String>,
}

/// Lower a hierarchical plan into a plan graph.
///
/// Node ids are allocated monotonically (`node_1`, `node_2`, ...) via
/// pre-order traversal, so a parent's id always sorts before its children's
/// and rebuilding from disk preserves declared order.
pub fn build_graph(plan: &HierarchicalPlan, agent_id: &str) -> PlanGraph {
    let mut nodes = BTreeMap::new();
    let mut counter = 0usize;
    let root_node_id = lower_node(plan, "", &mut counter, &mut nodes);

    let max_depth = nodes.values().map(|node| node.depth).max().unwrap_or(0);
    PlanGraph {
        root_node_id,
        metadata: GraphMetadata {
            agent_id: agent_id.to_string(),
            created_at: Utc::now().to_rfc3339(),
            total_nodes: counter,
            max_depth,
        },
        nodes,
    }
}

fn lower_node(
    plan: &HierarchicalPlan,
    parent_id: &str,
    counter: &mut usize,
    nodes: &mut BTreeMap<String, GraphNode>,
) -> String {
    *counter += 1;
    let id = format!("node_{}", counter);

    let action_names = if plan.is_atomic() {
        plan.actions()
            .iter()
            .map(|action| action.name().to_string())
            .collect()
    } else {
        Vec::new()
    };

    let child_ids: Vec<String> = plan
        .subplans()
        .iter()
        .map(|subplan| lower_node(subplan, &id, counter, nodes))
        .collect();

    nodes.insert(
        id.clone(),
        GraphNode {
            id: id.clone(),
            goal_name: plan.goal().name().to_string(),
            goal_description: plan.goal().description().to_string(),
            desired_state: plan.goal().desired().clone(),
            parent_id: parent_id.to_string(),
            child_ids,
            action_names,
            is_atomic: plan.is_atomic(),
            depth: plan.depth(),
            status: NodeStatus::Pending,
            result: None,
        },
    );

    id
}

/// Build the minimal per-node context slice.
pub fn build_node_context(graph: &PlanGraph, node_id: &str) -> Option<NodeContext> {
    let node = graph.nodes.get(node_id)?.clone();

    let parent = (!node.parent_id.is_empty())
        .then(|| graph.nodes.get(&node.parent_id).cloned())
        .flatten();

    let siblings = parent
        .as_ref()
        .map(|parent| {
            parent
                .child_ids
                .iter()
                .filter(|id| id.as_str() != node_id)
                .filter_map(|id| graph.nodes.get(id).cloned())
                .collect()
        })
        .unwrap_or_default();

    let children = node
        .child_ids
        .iter()
        .filter_map(|id| graph.nodes.get(id).cloned())
        .collect();

    let mut path_from_root = vec![node_id.to_string()];
    let mut current = node.parent_id.clone();
    while !current.is_empty() {
        path_from_root.insert(0, current.clone());
        current = match graph.nodes.get(&current) {
            Some(ancestor) => ancestor.parent_id.clone(),
            None => break,
        };
    }

    Some(NodeContext {
        node,
        parent,
        children,
        siblings,
        path_from_root,
    })
}

/// Check structural invariants not guaranteed by (de)serialization alone:
/// - the root exists and has depth 0 with no parent
/// - every `parent_id` resolves and the parent lists the child
/// - `depth(node) == depth(parent) + 1`
/// - a node is atomic iff it has no children iff it has action names
/// - metadata node count matches the map
pub fn validate_graph(graph: &PlanGraph) -> Vec<String> {
    let mut errors = Vec::new();

    match graph.root() {
        None => errors.push(format!("root node '{}' not found", graph.root_node_id)),
        Some(root) => {
            if !root.parent_id.is_empty() {
                errors.push(format!("root node '{}' has a parent", root.id));
            }
            if root.depth != 0 {
                errors.push(format!("root node '{}' has depth {}", root.id, root.depth));
            }
        }
    }

    let mut reachable = HashSet::new();
    if graph.root().is_some() {
        collect_reachable(graph, &graph.root_node_id, &mut reachable);
    }

    for (id, node) in &graph.nodes {
        if id != &node.id {
            errors.push(format!("node keyed '{}' carries id '{}'", id, node.id));
        }

        if node.is_atomic {
            if !node.child_ids.is_empty() {
                errors.push(format!("atomic node '{}' has children", id));
            }
        } else if !node.action_names.is_empty() {
            errors.push(format!("composite node '{}' has action names", id));
        } else if node.child_ids.is_empty() {
            errors.push(format!("composite node '{}' has no children", id));
        }

        if !node.parent_id.is_empty() {
            match graph.nodes.get(&node.parent_id) {
                None => errors.push(format!(
                    "node '{}' references missing parent '{}'",
                    id, node.parent_id
                )),
                Some(parent) => {
                    if !parent.child_ids.iter().any(|child| child == id) {
                        errors.push(format!(
                            "parent '{}' does not list child '{}'",
                            parent.id, id
                        ));
                    }
                    if node.depth != parent.depth + 1 {
                        errors.push(format!(
                            "node '{}' depth {} != parent depth {} + 1",
                            id, node.depth, parent.depth
                        ));
                    }
                }
            }
        } else if id != &graph.root_node_id {
            errors.push(format!("non-root node '{}' has no parent", id));
        }

        if !reachable.contains(id) {
            errors.push(format!("node '{}' unreachable from root", id));
        }
    }

    if graph.metadata.total_nodes != graph.nodes.len() {
        errors.push(format!(
            "metadata total_nodes {} != node count {}",
            graph.metadata.total_nodes,
            graph.nodes.len()
        ));
    }

    errors
}

fn collect_reachable(graph: &PlanGraph, node_id: &str, reachable: &mut HashSet<String>) {
    if !reachable.insert(node_id.to_string()) {
        return;
    }
    if let Some(node) = graph.nodes.get(node_id) {
        for child in &node.child_ids {
            collect_reachable(graph, child, reachable);
        }
    }
}

/// Per-status node counts for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStatus {
    pub total_nodes: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl GraphStatus {
    /// True once no node is pending or running.
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

pub fn graph_status(graph: &PlanGraph) -> GraphStatus {
    let mut status = GraphStatus {
        total_nodes: graph.nodes.len(),
        pending: 0,
        running: 0,
        completed: 0,
        failed: 0,
        skipped: 0,
    };
    for node in graph.nodes.values() {
        match node.status {
            NodeStatus::Pending => status.pending += 1,
            NodeStatus::Running => status.running += 1,
            NodeStatus::Completed => status.completed += 1,
            NodeStatus::Failed => status.failed += 1,
            NodeStatus::Skipped => status.skipped += 1,
        }
    }
    status
}
