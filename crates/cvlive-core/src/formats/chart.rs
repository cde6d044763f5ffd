//! # Chart File Format
//!
//! JSON document holding a whole chart:
//!
//! ```json
//! { "version": 1, "next_node_id": 3, "nodes": [ ... ] }
//! ```
//!
//! Node ids, result annotations and saved structured locators are kept, so a
//! reloaded chart evaluates with zero remote calls if nothing changed.
//! In-flight markers are never persisted.
//!
//! Size, version and node count are validated before the graph is built.

use crate::graph::{Graph, Node};
use crate::primitives::{CHART_FORMAT_VERSION, MAX_CHART_FILE_SIZE, MAX_CHART_NODES};
use crate::CvliveError;
use serde::{Deserialize, Serialize};

/// Serialized chart document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartFile {
    pub version: u32,
    pub next_node_id: u64,
    pub nodes: Vec<Node>,
}

impl From<&Graph> for ChartFile {
    fn from(graph: &Graph) -> Self {
        Self {
            version: CHART_FORMAT_VERSION,
            next_node_id: graph.next_node_id(),
            nodes: graph.all_nodes().cloned().collect(),
        }
    }
}

impl TryFrom<ChartFile> for Graph {
    type Error = CvliveError;

    fn try_from(file: ChartFile) -> Result<Self, Self::Error> {
        if file.version != CHART_FORMAT_VERSION {
            return Err(CvliveError::SerializationError(format!(
                "Unsupported chart version: {} (expected {})",
                file.version, CHART_FORMAT_VERSION
            )));
        }
        if file.nodes.len() > MAX_CHART_NODES {
            return Err(CvliveError::SerializationError(format!(
                "Chart has {} nodes, maximum is {}",
                file.nodes.len(),
                MAX_CHART_NODES
            )));
        }
        Graph::from_nodes(file.nodes, file.next_node_id)
    }
}

/// Serialize a chart to pretty-printed JSON.
pub fn chart_to_json(graph: &Graph) -> Result<String, CvliveError> {
    serde_json::to_string_pretty(&ChartFile::from(graph))
        .map_err(|e| CvliveError::SerializationError(e.to_string()))
}

/// Parse a chart, rejecting oversized input before decoding it.
pub fn chart_from_json(json: &str) -> Result<Graph, CvliveError> {
    if json.len() as u64 > MAX_CHART_FILE_SIZE {
        return Err(CvliveError::SerializationError(format!(
            "Chart size {} bytes exceeds maximum allowed {} bytes",
            json.len(),
            MAX_CHART_FILE_SIZE
        )));
    }
    let file: ChartFile = serde_json::from_str(json)
        .map_err(|e| CvliveError::SerializationError(format!("Invalid chart: {}", e)))?;
    Graph::try_from(file)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, OperationNode, Parameter, SavedPayload, SourcePayload};
    use crate::{CacheKey, Locator, NodeId, OutputSlot, ParamValue, SourceRef};

    fn sample() -> (Graph, NodeId) {
        let mut graph = Graph::new();
        let img = graph.add_node(
            "img1",
            NodeKind::Source(SourcePayload::Image {
                locator: Locator::new("uploads/a.png"),
            }),
        );
        let data = graph.add_node(
            "kernel",
            NodeKind::Source(SourcePayload::Structured {
                payload: serde_json::json!([[0, 1], [1, 0]]),
                saved: None,
            }),
        );
        assert!(graph.mark_structured_saved(
            data,
            &serde_json::json!([[0, 1], [1, 0]]),
            SavedPayload {
                hash: "k1".into(),
                locator: Locator::new("cached/k1.json"),
            },
        ));
        let op = graph.add_node(
            "blur1",
            NodeKind::Operation(OperationNode::new(
                "blur",
                vec![
                    Parameter::new("image"),
                    Parameter::new("amount").with_value(Some(ParamValue::new(5))),
                ],
            )),
        );
        graph
            .set_parameter_source(op, "image", Some(SourceRef::new(img, OutputSlot(0))))
            .expect("bind");
        let key = CacheKey([7; 32]);
        assert!(graph.mark_dispatched(op, 1, key));
        assert!(graph.commit_result(op, 1, key, vec![Locator::new("cached/h.0.png")]));
        (graph, op)
    }

    #[test]
    fn chart_roundtrip_preserves_ids_and_results() {
        let (graph, op) = sample();
        let json = chart_to_json(&graph).expect("serialize");
        let restored = chart_from_json(&json).expect("parse");

        assert_eq!(restored.len(), 3);
        assert_eq!(restored.next_node_id(), graph.next_node_id());
        assert_eq!(restored.get(op), graph.get(op));
        assert_eq!(chart_to_json(&restored).expect("reserialize"), json);
    }

    #[test]
    fn inflight_marker_is_not_persisted() {
        let (mut graph, op) = sample();
        assert!(graph.mark_dispatched(op, 1, CacheKey([8; 32])));
        let restored = chart_from_json(&chart_to_json(&graph).expect("serialize")).expect("parse");
        assert!(restored.operation(op).expect("op").dispatched.is_none());
    }

    #[test]
    fn rejects_wrong_version() {
        let json = r#"{"version": 99, "next_node_id": 0, "nodes": []}"#;
        assert!(chart_from_json(json).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(chart_from_json("not json").is_err());
    }

    #[test]
    fn file_roundtrip_through_disk() {
        let (graph, _) = sample();
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chart.json");
        std::fs::write(&path, chart_to_json(&graph).expect("serialize")).expect("write");
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(chart_from_json(&text).expect("parse").len(), graph.len());
    }
}
