//! # Readiness Analyzer
//!
//! Decides which operation nodes can be evaluated in the current pass and in
//! what order.
//!
//! 1. Operation nodes with an unsatisfied parameter are excluded.
//! 2. Source nodes are resolved by definition.
//! 3. A well-formed operation node is resolved once all of its dependencies
//!    are. Resolution runs as an explicit-stack depth-first search with
//!    three-colour marking, so deep chains cannot overflow the call stack.
//!    Meeting a node that is still in progress means a cycle: the whole
//!    waiting chain degrades to unresolved instead of failing.
//! 4. Nodes are appended to the order as they finish resolving, so every
//!    node comes after its dependencies.

use crate::graph::{Graph, NodeKind};
use crate::{NodeId, NodeState};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one readiness analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Operation nodes to evaluate, dependencies first.
    pub order: Vec<NodeId>,
    /// Operation nodes with at least one unsatisfied parameter.
    pub unsatisfied: BTreeSet<NodeId>,
    /// Well-formed operation nodes that are cyclic or wait on an excluded node.
    pub unresolved: BTreeSet<NodeId>,
    /// Members of `order`, for lookups.
    ready: BTreeSet<NodeId>,
}

impl Readiness {
    /// Where a node stands according to this analysis.
    ///
    /// Returns `None` for source nodes and unknown ids.
    #[must_use]
    pub fn state_of(&self, id: NodeId) -> Option<NodeState> {
        if self.unsatisfied.contains(&id) {
            Some(NodeState::Unsatisfied)
        } else if self.unresolved.contains(&id) {
            Some(NodeState::Unresolved)
        } else if self.ready.contains(&id) {
            Some(NodeState::Ready)
        } else {
            None
        }
    }

    /// All excluded operation nodes, in id order.
    pub fn excluded(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.unsatisfied.union(&self.unresolved).copied()
    }

    /// Clear the result annotations of every excluded node.
    ///
    /// Their outputs can no longer be trusted. Returns the nodes that
    /// actually had something cleared.
    pub fn invalidate(&self, graph: &mut Graph) -> Vec<NodeId> {
        self.excluded()
            .filter(|&id| graph.clear_result(id))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Resolved,
    Unresolved,
}

struct Frame {
    node: NodeId,
    deps: Vec<NodeId>,
    next: usize,
    ok: bool,
}

/// Computes ready orders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadinessAnalyzer;

impl ReadinessAnalyzer {
    /// Analyze the graph.
    ///
    /// Roots are visited in id order, so the result is deterministic for a
    /// given graph.
    #[must_use]
    pub fn compute_ready_order(graph: &Graph) -> Readiness {
        let mut readiness = Readiness::default();
        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();
        let mut deps_of: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();

        for node in graph.all_nodes() {
            match &node.kind {
                NodeKind::Source(_) => {
                    marks.insert(node.id, Mark::Resolved);
                }
                NodeKind::Operation(op) => {
                    if graph.is_well_formed(op) {
                        deps_of.insert(node.id, graph.dependencies(op));
                    } else {
                        readiness.unsatisfied.insert(node.id);
                        marks.insert(node.id, Mark::Unresolved);
                    }
                }
            }
        }

        for &root in deps_of.keys() {
            if marks.contains_key(&root) {
                continue;
            }
            Self::resolve_from(root, &deps_of, &mut marks, &mut readiness);
        }

        readiness
    }

    fn resolve_from(
        root: NodeId,
        deps_of: &BTreeMap<NodeId, Vec<NodeId>>,
        marks: &mut BTreeMap<NodeId, Mark>,
        readiness: &mut Readiness,
    ) {
        marks.insert(root, Mark::InProgress);
        let mut stack = vec![Frame {
            node: root,
            deps: deps_of.get(&root).cloned().unwrap_or_default(),
            next: 0,
            ok: true,
        }];

        while let Some(top) = stack.last_mut() {
            if let Some(&dep) = top.deps.get(top.next) {
                top.next += 1;
                match marks.get(&dep) {
                    Some(Mark::Resolved) => {}
                    Some(Mark::Unresolved | Mark::InProgress) => top.ok = false,
                    None => match deps_of.get(&dep) {
                        Some(deps) => {
                            marks.insert(dep, Mark::InProgress);
                            stack.push(Frame {
                                node: dep,
                                deps: deps.clone(),
                                next: 0,
                                ok: true,
                            });
                        }
                        // Not in the graph at all.
                        None => top.ok = false,
                    },
                }
                continue;
            }

            let Some(done) = stack.pop() else { break };
            if done.ok {
                marks.insert(done.node, Mark::Resolved);
                readiness.order.push(done.node);
                readiness.ready.insert(done.node);
            } else {
                marks.insert(done.node, Mark::Unresolved);
                readiness.unresolved.insert(done.node);
                if let Some(parent) = stack.last_mut() {
                    parent.ok = false;
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
