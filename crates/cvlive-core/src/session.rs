//! # Session Module
//!
//! The explicit engine context: one chart plus the operation registry it is
//! evaluated against. Every engine operation takes a `Session` (or borrows
//! its parts) instead of reaching for global state.
//!
//! User edits go through here so they can be validated against the registry
//! before they reach the graph.

use crate::graph::{Graph, Node, NodeKind, OperationNode, Parameter, SourcePayload};
use crate::registry::{OutputKind, Registry};
use crate::{CvliveError, Locator, NodeId, ParamValue, SourceRef};

/// A chart bound to a registry.
#[derive(Debug, Clone, Default)]
pub struct Session {
    graph: Graph,
    registry: Registry,
}

impl Session {
    /// Create a session with an empty chart.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            graph: Graph::new(),
            registry,
        }
    }

    /// Create a session around an existing chart.
    #[must_use]
    pub fn with_graph(graph: Graph, registry: Registry) -> Self {
        Self { graph, registry }
    }

    /// Borrow the chart.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutably borrow the chart, bypassing registry validation.
    ///
    /// Used by the driver for result write-back.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Borrow the registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Swap in a freshly fetched registry.
    pub fn set_registry(&mut self, registry: Registry) {
        self.registry = registry;
    }

    /// Split into chart and registry.
    #[must_use]
    pub fn into_parts(self) -> (Graph, Registry) {
        (self.graph, self.registry)
    }

    // =========================================================================
    // NODE CREATION & REMOVAL
    // =========================================================================

    /// Add an uploaded-image source.
    pub fn add_image_source(&mut self, name: impl Into<String>, locator: Locator) -> NodeId {
        self.graph
            .add_node(name, NodeKind::Source(SourcePayload::Image { locator }))
    }

    /// Add a structured-data source. It becomes referenceable once saved.
    pub fn add_structured_source(
        &mut self,
        name: impl Into<String>,
        payload: serde_json::Value,
    ) -> NodeId {
        self.graph.add_node(
            name,
            NodeKind::Source(SourcePayload::Structured {
                payload,
                saved: None,
            }),
        )
    }

    /// Add an operation node with the registry's declared parameters.
    ///
    /// Parameters start out holding their declared default, if any.
    pub fn add_operation(
        &mut self,
        name: Option<String>,
        operation: &str,
    ) -> Result<NodeId, CvliveError> {
        let def = self.registry.require(operation)?;
        let params = def
            .params
            .iter()
            .map(|spec| Parameter::new(spec.name.clone()).with_value(spec.default.clone()))
            .collect();
        let name = name.unwrap_or_else(|| def.display_name.clone());
        let node = OperationNode::new(def.name.clone(), params);
        Ok(self.graph.add_node(name, NodeKind::Operation(node)))
    }

    /// Remove a node. Returns the ids of nodes whose references were purged.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(Node, Vec<NodeId>), CvliveError> {
        self.graph.remove_node(id)
    }

    // =========================================================================
    // PARAMETER EDITS
    // =========================================================================

    /// Set or clear a parameter literal.
    pub fn set_parameter_value(
        &mut self,
        id: NodeId,
        name: &str,
        value: Option<ParamValue>,
    ) -> Result<(), CvliveError> {
        self.graph.set_parameter_value(id, name, value)
    }

    /// Bind a parameter to another node's output, or unbind it with `None`.
    ///
    /// The target must exist and declare the referenced slot.
    pub fn set_parameter_source(
        &mut self,
        id: NodeId,
        name: &str,
        source: Option<SourceRef>,
    ) -> Result<(), CvliveError> {
        if let Some(src) = source {
            let kinds = self.output_kinds(src.node)?;
            if src.slot.index() >= kinds.len() {
                return Err(CvliveError::MissingOutput {
                    node: src.node,
                    slot: src.slot,
                });
            }
        }
        self.graph.set_parameter_source(id, name, source)
    }

    /// Replace a structured source's payload.
    pub fn set_structured_payload(
        &mut self,
        id: NodeId,
        payload: serde_json::Value,
    ) -> Result<(), CvliveError> {
        self.graph.set_structured_payload(id, payload)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Output kinds a node exposes, slot by slot.
    pub fn output_kinds(&self, id: NodeId) -> Result<Vec<OutputKind>, CvliveError> {
        let node = self.graph.get(id).ok_or(CvliveError::NodeNotFound(id))?;
        match &node.kind {
            NodeKind::Source(SourcePayload::Image { .. }) => Ok(vec![OutputKind::Image]),
            NodeKind::Source(SourcePayload::Structured { .. }) => Ok(vec![OutputKind::Complex]),
            NodeKind::Operation(op) => Ok(self.registry.require(&op.operation)?.outputs.clone()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
