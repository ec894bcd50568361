//! Graph executor: drives a persisted plan graph to completion.
//!
//! The executor walks the graph in pre-order on the calling thread. Children
//! of a composite node run sequentially, never in parallel: siblings may
//! share world-state keys, and effect threading during planning assumed
//! sequential observation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::core::action::Action;
use crate::core::cancel::CancelToken;
use crate::core::error::{EngineError, Result};
use crate::core::state::WorldState;
use crate::io::graph::{graph_status, GraphNode, GraphStatus, NodeResult, NodeStatus};
use crate::io::store::GraphStore;

/// Default pause between actions of an atomic node, smoothing external rate
/// limits.
pub const DEFAULT_ACTION_PAUSE: Duration = Duration::from_millis(100);

/// Executes one persisted plan graph with minimal per-node context loading.
pub struct GraphExecutor<'a> {
    store: &'a GraphStore,
    run_id: String,
    actions: HashMap<String, Box<dyn Action>>,
    action_pause: Duration,
    // Concurrent `execute` on the same graph is forbidden; this serializes
    // callers that share the executor across threads.
    run_lock: Mutex<()>,
}

impl<'a> GraphExecutor<'a> {
    pub fn new(store: &'a GraphStore, run_id: impl Into<String>) -> Self {
        Self {
            store,
            run_id: run_id.into(),
            actions: HashMap::new(),
            action_pause: DEFAULT_ACTION_PAUSE,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_action_pause(mut self, pause: Duration) -> Self {
        self.action_pause = pause;
        self
    }

    /// Register an action by name. Duplicate names replace prior entries.
    /// Names are resolved when a node runs, not at load time.
    pub fn register(&mut self, action: Box<dyn Action>) {
        self.actions.insert(action.name().to_string(), action);
    }

    pub fn register_all(&mut self, actions: Vec<Box<dyn Action>>) {
        for action in actions {
            self.register(action);
        }
    }

    /// Execute the plan graph from the root, mutating `state` in place.
    ///
    /// Re-invoking on a graph whose root is already terminal re-derives the
    /// status without running anything; a partially-executed graph restarts
    /// from its first non-terminal node.
    #[instrument(skip_all, fields(run_id = %self.run_id))]
    pub fn execute(&self, cancel: &CancelToken, state: &mut WorldState) -> Result<GraphStatus> {
        let _run_guard = self
            .run_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let graph = self.store.load_graph(&self.run_id)?;
        info!(
            root = %graph.root_node_id,
            total_nodes = graph.metadata.total_nodes,
            "starting graph execution"
        );

        let root_id = graph.root_node_id.clone();
        self.visit(cancel, &root_id, state)?;
        self.status()
    }

    /// Current status counts for the persisted graph.
    pub fn status(&self) -> Result<GraphStatus> {
        Ok(graph_status(&self.store.load_graph(&self.run_id)?))
    }

    fn visit(&self, cancel: &CancelToken, node_id: &str, state: &mut WorldState) -> Result<()> {
        let context = self.store.load_node_context(&self.run_id, node_id)?;
        let node = context.node;

        // Completed and skipped nodes stay untouched, so a re-run resumes
        // from the first unfinished node.
        if matches!(node.status, NodeStatus::Completed | NodeStatus::Skipped) {
            debug!(node_id, status = ?node.status, "node already terminal, not re-running");
            return Ok(());
        }

        info!(
            node_id,
            goal = %node.goal_name,
            depth = node.depth,
            atomic = node.is_atomic,
            "executing node"
        );
        self.mark_running(node_id);

        if let Err(err) = cancel.check() {
            self.mark_failed(node_id, &err);
            return Err(err);
        }

        if state.matches(&node.desired_state) {
            info!(node_id, "goal already satisfied, skipping node");
            self.skip_subtree(node_id)?;
            return Ok(());
        }

        let before = state.clone();
        let outcome = if node.is_atomic {
            self.run_atomic(cancel, &node, state)
        } else {
            self.run_children(cancel, &node, state)
        };

        if let Err(err) = outcome {
            self.mark_failed(node_id, &err);
            return Err(err);
        }

        let changes = observed_changes(&node.desired_state, &before, state);
        self.store.update_node_status(
            &self.run_id,
            node_id,
            NodeStatus::Completed,
            Some(NodeResult::success(changes)),
        )?;
        info!(node_id, goal = %node.goal_name, "node execution completed");
        Ok(())
    }

    fn run_atomic(
        &self,
        cancel: &CancelToken,
        node: &GraphNode,
        state: &mut WorldState,
    ) -> Result<()> {
        debug!(node_id = %node.id, actions = node.action_names.len(), "running atomic node");

        for (index, action_name) in node.action_names.iter().enumerate() {
            cancel.check()?;

            let action = self.actions.get(action_name.as_str()).ok_or_else(|| {
                EngineError::ActionNotRegistered {
                    action: action_name.clone(),
                }
            })?;

            info!(index, action = action_name.as_str(), "executing action");
            action.execute(cancel, state).map_err(|err| match err {
                wrapped @ (EngineError::ActionFailed { .. }
                | EngineError::PreconditionViolated { .. }
                | EngineError::Cancelled) => wrapped,
                other => EngineError::ActionFailed {
                    action: action_name.clone(),
                    cause: anyhow::Error::new(other),
                },
            })?;

            if !self.action_pause.is_zero() {
                thread::sleep(self.action_pause);
            }
        }

        Ok(())
    }

    fn run_children(
        &self,
        cancel: &CancelToken,
        node: &GraphNode,
        state: &mut WorldState,
    ) -> Result<()> {
        debug!(node_id = %node.id, children = node.child_ids.len(), "running composite node");

        for child_id in &node.child_ids {
            if let Err(cause) = self.visit(cancel, child_id, state) {
                return Err(EngineError::ChildFailed {
                    child_id: child_id.clone(),
                    cause: Box::new(cause),
                });
            }
        }
        Ok(())
    }

    /// Mark a satisfied node skipped, together with every non-terminal
    /// descendant: none of them will run, and a finished graph must hold no
    /// pending nodes.
    fn skip_subtree(&self, node_id: &str) -> Result<()> {
        let graph = self.store.load_graph(&self.run_id)?;
        let mut pending = vec![node_id.to_string()];
        while let Some(id) = pending.pop() {
            let Some(node) = graph.node(&id) else { continue };
            pending.extend(node.child_ids.iter().cloned());
            if id == node_id || !node.status.is_terminal() {
                self.store.update_node_status(
                    &self.run_id,
                    &id,
                    NodeStatus::Skipped,
                    Some(NodeResult::success(None)),
                )?;
            }
        }
        Ok(())
    }

    fn mark_running(&self, node_id: &str) {
        // Best-effort: a failed `running` write is advisory and must not
        // abort the run.
        if let Err(err) =
            self.store
                .update_node_status(&self.run_id, node_id, NodeStatus::Running, None)
        {
            warn!(node_id, error = %err, "failed to persist running status");
        }
    }

    fn mark_failed(&self, node_id: &str, cause: &EngineError) {
        if let Err(err) = self.store.update_node_status(
            &self.run_id,
            node_id,
            NodeStatus::Failed,
            Some(NodeResult::failure(cause.to_string())),
        ) {
            warn!(node_id, error = %err, "failed to persist failed status");
        }
    }
}

/// Keys of `desired` whose values changed between `before` and `after`,
/// with their post-execution values.
fn observed_changes(
    desired: &WorldState,
    before: &WorldState,
    after: &WorldState,
) -> Option<WorldState> {
    let changes: WorldState = desired
        .iter()
        .filter_map(|(key, _)| {
            let now = after.get(key)?;
            if before.get(key) != Some(now) {
                Some((key.clone(), now.clone()))
            } else {
                None
            }
        })
        .collect();

    if changes.is_empty() {
        None
    } else {
        Some(changes)
    }
}
