//! # Graph Model
//!
//! In-memory chart: source nodes, operation nodes and the parameter-level
//! references between them. There are no edge entities; an edge exists
//! whenever a parameter carries a `SourceRef`.
//!
//! The graph upholds exactly one structural guarantee: after
//! `remove_node(id)` no remaining parameter references `id`. Satisfiability
//! is judged by the readiness analyzer, not here.
//!
//! Operation nodes carry a `revision` that every local edit bumps. The driver
//! uses it, together with the dispatched cache key, to commit results as a
//! compare-and-set.

use crate::{CacheKey, CvliveError, Locator, NodeId, ParamValue, SourceRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// NODE DATA
// =============================================================================

/// A named parameter of an operation node.
///
/// A live `source` takes precedence over `value`. Purging the source falls
/// back to the literal if one is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ParamValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
}

impl Parameter {
    /// Create an empty parameter.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
            source: None,
        }
    }

    /// Set an initial literal.
    #[must_use]
    pub fn with_value(mut self, value: Option<ParamValue>) -> Self {
        self.value = value;
        self
    }
}

/// What a parameter currently evaluates from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Binding<'a> {
    Literal(&'a ParamValue),
    Source(SourceRef),
}

/// Locator under which a structured payload was saved by the compute service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPayload {
    pub hash: String,
    pub locator: Locator,
}

/// Content of a source node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourcePayload {
    /// An uploaded image, referenced by its stored path.
    Image { locator: Locator },
    /// User-entered structured data. Only referenceable once `saved`.
    Structured {
        payload: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        saved: Option<SavedPayload>,
    },
}

impl SourcePayload {
    /// The locator downstream nodes see, if the source is referenceable.
    #[must_use]
    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Self::Image { locator } => Some(locator),
            Self::Structured { saved, .. } => saved.as_ref().map(|s| &s.locator),
        }
    }
}

/// Result annotation written back by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultAnnotation {
    pub key: CacheKey,
    /// One locator per declared output slot.
    pub outputs: Vec<Locator>,
}

/// An operation node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationNode {
    /// Operation-type name, resolved against the registry.
    pub operation: String,
    pub params: Vec<Parameter>,
    /// Bumped by every local edit.
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultAnnotation>,
    /// Key of the request currently in flight for this node, if any.
    #[serde(skip)]
    pub dispatched: Option<CacheKey>,
}

impl OperationNode {
    /// Create an operation node with the given parameters.
    #[must_use]
    pub fn new(operation: impl Into<String>, params: Vec<Parameter>) -> Self {
        Self {
            operation: operation.into(),
            params,
            revision: 0,
            result: None,
            dispatched: None,
        }
    }

    /// Look up a parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    fn param_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }
}

/// The two node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Source(SourcePayload),
    Operation(OperationNode),
}

/// A node in the chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    /// Borrow the operation data, if this is an operation node.
    #[must_use]
    pub fn as_operation(&self) -> Option<&OperationNode> {
        match &self.kind {
            NodeKind::Operation(op) => Some(op),
            NodeKind::Source(_) => None,
        }
    }

    /// Borrow the source payload, if this is a source node.
    #[must_use]
    pub fn as_source(&self) -> Option<&SourcePayload> {
        match &self.kind {
            NodeKind::Source(src) => Some(src),
            NodeKind::Operation(_) => None,
        }
    }

    /// Whether this is a source node.
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.kind, NodeKind::Source(_))
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// The chart. Owns all nodes exclusively.
///
/// Uses `BTreeMap` so iteration order is the id order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    next_node_id: u64,
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a graph from loaded nodes, preserving their ids.
    ///
    /// `next_node_id` is raised above every loaded id so ids are never reused.
    pub fn from_nodes(
        nodes: impl IntoIterator<Item = Node>,
        next_node_id: u64,
    ) -> Result<Self, CvliveError> {
        let mut graph = Self {
            nodes: BTreeMap::new(),
            next_node_id,
        };
        for node in nodes {
            let id = node.id;
            if graph.nodes.insert(id, node).is_some() {
                return Err(CvliveError::SerializationError(format!(
                    "duplicate node id {}",
                    id
                )));
            }
            graph.next_node_id = graph.next_node_id.max(id.0.saturating_add(1));
        }
        Ok(graph)
    }

    /// Add a node and return its fresh id.
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.into(),
                kind,
            },
        );
        id
    }

    /// Remove a node, purging every source reference that targets it.
    ///
    /// Downstream nodes are invalidated, not deleted. Returns the removed
    /// node and the ids of nodes whose parameters were purged.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(Node, Vec<NodeId>), CvliveError> {
        let removed = self
            .nodes
            .remove(&id)
            .ok_or(CvliveError::NodeNotFound(id))?;

        let mut purged = Vec::new();
        for node in self.nodes.values_mut() {
            let NodeKind::Operation(op) = &mut node.kind else {
                continue;
            };
            let mut touched = false;
            for param in &mut op.params {
                if param.source.is_some_and(|s| s.node == id) {
                    param.source = None;
                    touched = true;
                }
            }
            if touched {
                op.revision = op.revision.wrapping_add(1);
                purged.push(node.id);
            }
        }
        Ok((removed, purged))
    }

    /// Set or clear a parameter's literal value.
    pub fn set_parameter_value(
        &mut self,
        id: NodeId,
        name: &str,
        value: Option<ParamValue>,
    ) -> Result<(), CvliveError> {
        let op = self.operation_mut(id)?;
        let param = op
            .param_mut(name)
            .ok_or_else(|| CvliveError::UnknownParameter {
                node: id,
                name: name.to_string(),
            })?;
        if param.value != value {
            param.value = value;
            op.revision = op.revision.wrapping_add(1);
        }
        Ok(())
    }

    /// Bind or unbind a parameter's source reference.
    ///
    /// Neither the target's existence nor acyclicity is checked here. A
    /// reference to a missing node leaves the parameter unsatisfied, and a
    /// self-reference or cycle leaves the node unresolved.
    pub fn set_parameter_source(
        &mut self,
        id: NodeId,
        name: &str,
        source: Option<SourceRef>,
    ) -> Result<(), CvliveError> {
        let op = self.operation_mut(id)?;
        let param = op
            .param_mut(name)
            .ok_or_else(|| CvliveError::UnknownParameter {
                node: id,
                name: name.to_string(),
            })?;
        if param.source != source {
            param.source = source;
            op.revision = op.revision.wrapping_add(1);
        }
        Ok(())
    }

    /// Replace a structured source's payload. Invalidates its saved locator.
    pub fn set_structured_payload(
        &mut self,
        id: NodeId,
        payload: serde_json::Value,
    ) -> Result<(), CvliveError> {
        let node = self.nodes.get_mut(&id).ok_or(CvliveError::NodeNotFound(id))?;
        match &mut node.kind {
            NodeKind::Source(SourcePayload::Structured {
                payload: current,
                saved,
            }) => {
                if *current != payload {
                    *current = payload;
                    *saved = None;
                }
                Ok(())
            }
            _ => Err(CvliveError::NotStructured(id)),
        }
    }

    /// Record where a structured payload was saved.
    ///
    /// Succeeds only if the node still holds `payload`; an edit made while
    /// the save was in flight wins. Returns whether the record was applied.
    pub fn mark_structured_saved(
        &mut self,
        id: NodeId,
        payload: &serde_json::Value,
        record: SavedPayload,
    ) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Source(SourcePayload::Structured {
                payload: current,
                saved,
            })) if current == payload => {
                *saved = Some(record);
                true
            }
            _ => false,
        }
    }

    /// Structured sources that still need a save round trip, with a snapshot
    /// of their payload.
    #[must_use]
    pub fn unsaved_structured(&self) -> Vec<(NodeId, serde_json::Value)> {
        self.nodes
            .values()
            .filter_map(|n| match &n.kind {
                NodeKind::Source(SourcePayload::Structured {
                    payload,
                    saved: None,
                }) => Some((n.id, payload.clone())),
                _ => None,
            })
            .collect()
    }

    /// Rename a node.
    pub fn rename(&mut self, id: NodeId, name: impl Into<String>) -> Result<(), CvliveError> {
        let node = self.nodes.get_mut(&id).ok_or(CvliveError::NodeNotFound(id))?;
        node.name = name.into();
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Driver write-back
    // -------------------------------------------------------------------------

    /// Drop a node's result annotation and any in-flight marker.
    ///
    /// Returns `true` if there was anything to clear.
    pub fn clear_result(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Operation(op)) => {
                let had = op.result.is_some() || op.dispatched.is_some();
                op.result = None;
                op.dispatched = None;
                had
            }
            _ => false,
        }
    }

    /// Record that a request with `key` is about to be sent for `id`.
    ///
    /// Refused if the node was edited since the request was prepared.
    pub fn mark_dispatched(&mut self, id: NodeId, revision: u64, key: CacheKey) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Operation(op)) if op.revision == revision => {
                op.dispatched = Some(key);
                true
            }
            _ => false,
        }
    }

    /// Commit a computed result as a compare-and-set on
    /// `(id, revision, dispatched key)`.
    ///
    /// Returns `false`, leaving the node untouched, if the node was removed,
    /// edited, invalidated or re-dispatched with another key meanwhile.
    pub fn commit_result(
        &mut self,
        id: NodeId,
        revision: u64,
        key: CacheKey,
        outputs: Vec<Locator>,
    ) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Operation(op))
                if op.revision == revision && op.dispatched == Some(key) =>
            {
                op.result = Some(ResultAnnotation { key, outputs });
                op.dispatched = None;
                true
            }
            _ => false,
        }
    }

    /// Release the in-flight marker after a failed or discarded request.
    ///
    /// The stored result is left as is so the next pass retries. Returns
    /// `true` only if the request was still current: the node exists, its
    /// revision is `revision` and the marker was `key`. A `false` return
    /// means the failure belongs to a superseded request.
    pub fn abandon_dispatch(&mut self, id: NodeId, revision: u64, key: CacheKey) -> bool {
        match self.nodes.get_mut(&id).map(|n| &mut n.kind) {
            Some(NodeKind::Operation(op)) if op.dispatched == Some(key) => {
                op.dispatched = None;
                op.revision == revision
            }
            _ => false,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Look up a node.
    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Whether a node exists.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Look up an operation node.
    pub fn operation(&self, id: NodeId) -> Result<&OperationNode, CvliveError> {
        self.get(id)
            .ok_or(CvliveError::NodeNotFound(id))?
            .as_operation()
            .ok_or(CvliveError::NotAnOperation(id))
    }

    fn operation_mut(&mut self, id: NodeId) -> Result<&mut OperationNode, CvliveError> {
        match &mut self
            .nodes
            .get_mut(&id)
            .ok_or(CvliveError::NodeNotFound(id))?
            .kind
        {
            NodeKind::Operation(op) => Ok(op),
            NodeKind::Source(_) => Err(CvliveError::NotAnOperation(id)),
        }
    }

    /// All nodes in id order.
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The id the next added node will receive.
    #[must_use]
    pub fn next_node_id(&self) -> u64 {
        self.next_node_id
    }

    /// What a parameter evaluates from right now.
    ///
    /// `None` means the parameter is unsatisfied: no literal and no live
    /// source.
    #[must_use]
    pub fn binding<'a>(&self, param: &'a Parameter) -> Option<Binding<'a>> {
        match (param.source, &param.value) {
            (Some(src), _) if self.contains(src.node) => Some(Binding::Source(src)),
            (_, Some(value)) => Some(Binding::Literal(value)),
            _ => None,
        }
    }

    /// Whether every parameter of an operation node is satisfied.
    #[must_use]
    pub fn is_well_formed(&self, op: &OperationNode) -> bool {
        op.params.iter().all(|p| self.binding(p).is_some())
    }

    /// Nodes an operation currently depends on, deduplicated, in id order.
    #[must_use]
    pub fn dependencies(&self, op: &OperationNode) -> Vec<NodeId> {
        let mut deps: Vec<NodeId> = op
            .params
            .iter()
            .filter_map(|p| match self.binding(p) {
                Some(Binding::Source(src)) => Some(src.node),
                _ => None,
            })
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }
}

// =============================================================================
// TESTS
// =============================================================================
