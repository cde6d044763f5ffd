//! # Result Sinks
//!
//! Per-node notifications from the driver. The driver never waits for a
//! sink and never learns whether a notification was handled.
//!
//! - `StatusBoard` keeps the latest state of every node for the HTTP API and
//!   flags failed nodes for a short, fixed interval.
//! - `TracingSink` logs every notification.

use cvlive_core::{Locator, NodeId, NodeState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Receiver of per-node outcomes.
pub trait ResultSink: Send + Sync {
    /// A node was computed and its outputs changed.
    fn on_node_computed(&self, node: NodeId, outputs: &[Locator]);

    /// The compute service rejected a node.
    fn on_node_error(&self, node: NodeId, message: &str);

    /// A node's outputs were cleared because it can no longer be trusted.
    fn on_node_cleared(&self, _node: NodeId) {}

    /// A node moved to a state without outputs to report.
    fn on_node_state(&self, _node: NodeId, _state: NodeState) {}

    /// The compute service reported its cache size.
    fn on_cache_size(&self, _bytes: u64) {}
}

// =============================================================================
// STATUS BOARD
// =============================================================================

/// Latest known status of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub state: NodeState,
    pub outputs: Vec<Locator>,
    /// Last compute error, kept until the node computes again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Transient error flag; clears itself after the flag interval.
    pub flagged: bool,
    #[serde(skip)]
    flag_generation: u64,
}

impl NodeStatus {
    fn new(state: NodeState) -> Self {
        Self {
            state,
            outputs: Vec::new(),
            error: None,
            flagged: false,
            flag_generation: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Board {
    nodes: BTreeMap<NodeId, NodeStatus>,
    cache_size: Option<u64>,
    next_generation: u64,
}

/// Point-in-time copy of the board.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BoardSnapshot {
    pub nodes: BTreeMap<NodeId, NodeStatus>,
    pub cache_size: Option<u64>,
}

/// In-memory status board.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    inner: Arc<Mutex<Board>>,
    flag_interval: Duration,
}

impl StatusBoard {
    /// Create a board whose error flags clear after `flag_interval`.
    #[must_use]
    pub fn new(flag_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Board::default())),
            flag_interval,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Copy the current board.
    #[must_use]
    pub fn snapshot(&self) -> BoardSnapshot {
        let board = self.lock();
        BoardSnapshot {
            nodes: board.nodes.clone(),
            cache_size: board.cache_size,
        }
    }

    /// Status of one node.
    #[must_use]
    pub fn get(&self, node: NodeId) -> Option<NodeStatus> {
        self.lock().nodes.get(&node).cloned()
    }

    /// Whether a node currently shows the error flag.
    #[must_use]
    pub fn is_flagged(&self, node: NodeId) -> bool {
        self.lock().nodes.get(&node).is_some_and(|s| s.flagged)
    }

    /// Drop a node from the board.
    pub fn forget(&self, node: NodeId) {
        self.lock().nodes.remove(&node);
    }

    fn update(&self, node: NodeId, state: NodeState, f: impl FnOnce(&mut NodeStatus)) {
        let mut board = self.lock();
        let status = board
            .nodes
            .entry(node)
            .or_insert_with(|| NodeStatus::new(state));
        status.state = state;
        f(status);
    }

    fn schedule_unflag(&self, node: NodeId, generation: u64) {
        // Without a runtime the flag simply stays until the next outcome.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let board = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(board.flag_interval).await;
            let mut inner = board.lock();
            if let Some(status) = inner.nodes.get_mut(&node) {
                if status.flag_generation == generation {
                    status.flagged = false;
                }
            }
        });
    }
}

impl ResultSink for StatusBoard {
    fn on_node_computed(&self, node: NodeId, outputs: &[Locator]) {
        self.update(node, NodeState::Computed, |s| {
            s.outputs = outputs.to_vec();
            s.error = None;
            s.flagged = false;
        });
    }

    fn on_node_error(&self, node: NodeId, message: &str) {
        let generation = {
            let mut board = self.lock();
            board.next_generation = board.next_generation.wrapping_add(1);
            let generation = board.next_generation;
            let status = board
                .nodes
                .entry(node)
                .or_insert_with(|| NodeStatus::new(NodeState::Errored));
            status.state = NodeState::Errored;
            status.error = Some(message.to_string());
            status.flagged = true;
            status.flag_generation = generation;
            generation
        };
        self.schedule_unflag(node, generation);
    }

    fn on_node_cleared(&self, node: NodeId) {
        self.update(node, NodeState::Unsatisfied, |s| s.outputs.clear());
    }

    fn on_node_state(&self, node: NodeId, state: NodeState) {
        self.update(node, state, |s| {
            if state == NodeState::CachedHit {
                s.error = None;
            }
        });
    }

    fn on_cache_size(&self, bytes: u64) {
        self.lock().cache_size = Some(bytes);
    }
}

// =============================================================================
// TRACING SINK
// =============================================================================

/// Logs every notification through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ResultSink for TracingSink {
    fn on_node_computed(&self, node: NodeId, outputs: &[Locator]) {
        tracing::info!(event = "node_computed", node = %node, outputs = outputs.len(), "node computed");
    }

    fn on_node_error(&self, node: NodeId, message: &str) {
        tracing::warn!(event = "node_error", node = %node, error = %message, "node failed");
    }

    fn on_node_cleared(&self, node: NodeId) {
        tracing::debug!(event = "node_cleared", node = %node, "node outputs cleared");
    }

    fn on_node_state(&self, node: NodeId, state: NodeState) {
        tracing::trace!(event = "node_state", node = %node, state = ?state, "node state");
    }

    fn on_cache_size(&self, bytes: u64) {
        tracing::debug!(event = "cache_size", bytes, "compute cache size");
    }
}

// =============================================================================
// TESTS
// =============================================================================
