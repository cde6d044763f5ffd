//! # Pass Planning
//!
//! Per-node preparation for one evaluation pass.
//!
//! A `DependencyMap` is rebuilt for every pass. It is seeded with the
//! locators of all referenceable source nodes and grows as operation nodes
//! are resolved, either as cache hits or as fresh computations. Preparing a
//! node resolves its source-bound parameters against the map, builds its
//! cache key and decides whether a remote call is needed.
//!
//! A dependency that is missing from the map (because the upstream failed or
//! was superseded earlier in the pass) blocks the node for this pass only.

use crate::cache_key::{self, DependencyRef, KeyInput};
use crate::graph::{Binding, Graph, NodeKind};
use crate::readiness::{Readiness, ReadinessAnalyzer};
use crate::registry::OutputKind;
use crate::session::Session;
use crate::{CacheKey, CvliveError, Locator, NodeId, OutputSlot, ParamValue, SourceRef};
use serde::Serialize;
use std::collections::BTreeMap;

// =============================================================================
// DEPENDENCY MAP
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolved {
    Source(Locator),
    Computed { key: CacheKey, outputs: Vec<Locator> },
}

/// Pass-local map from node id to its latest known result.
#[derive(Debug, Clone, Default)]
pub struct DependencyMap {
    entries: BTreeMap<NodeId, Resolved>,
}

impl DependencyMap {
    /// Seed with every source node that has a locator.
    #[must_use]
    pub fn seed(graph: &Graph) -> Self {
        let entries = graph
            .all_nodes()
            .filter_map(|n| match &n.kind {
                NodeKind::Source(src) => src
                    .locator()
                    .map(|loc| (n.id, Resolved::Source(loc.clone()))),
                NodeKind::Operation(_) => None,
            })
            .collect();
        Self { entries }
    }

    /// Register a resolved operation node.
    pub fn register(&mut self, id: NodeId, key: CacheKey, outputs: Vec<Locator>) {
        self.entries
            .insert(id, Resolved::Computed { key, outputs });
    }

    /// Whether a node has a known result this pass.
    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of known results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a source reference to its key reference and wire locator.
    ///
    /// `Ok(None)` means the upstream has no result this pass.
    fn resolve(&self, src: SourceRef) -> Result<Option<(DependencyRef, Locator)>, CvliveError> {
        let missing = || CvliveError::MissingOutput {
            node: src.node,
            slot: src.slot,
        };
        match self.entries.get(&src.node) {
            None => Ok(None),
            Some(Resolved::Source(locator)) => {
                if src.slot != OutputSlot(0) {
                    return Err(missing());
                }
                Ok(Some((
                    DependencyRef::Source {
                        locator: locator.clone(),
                    },
                    locator.clone(),
                )))
            }
            Some(Resolved::Computed { key, outputs }) => {
                let locator = outputs.get(src.slot.index()).ok_or_else(missing)?;
                Ok(Some((
                    DependencyRef::Output {
                        hash: *key,
                        slot: src.slot,
                    },
                    locator.clone(),
                )))
            }
        }
    }
}

// =============================================================================
// PREPARATION
// =============================================================================

/// One output the compute service is expected to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpectedOutput {
    pub slot: OutputSlot,
    pub kind: OutputKind,
    pub locator: Locator,
}

/// Everything needed to evaluate one node remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub node: NodeId,
    pub operation: String,
    /// Literal arguments by parameter name.
    pub args: BTreeMap<String, ParamValue>,
    /// Resolved dependency locators by parameter name.
    pub dependencies: BTreeMap<String, Locator>,
    pub outputs: Vec<ExpectedOutput>,
    pub key: CacheKey,
    /// Node revision the request was prepared from.
    pub revision: u64,
}

impl EvaluationRequest {
    /// Output locators in slot order.
    #[must_use]
    pub fn output_locators(&self) -> Vec<Locator> {
        self.outputs.iter().map(|o| o.locator.clone()).collect()
    }
}

/// Decision for one ready node.
#[derive(Debug, Clone, PartialEq)]
pub enum Preparation {
    /// The key changed (or there is no result yet): call the service.
    Ready(EvaluationRequest),
    /// The stored key matches: reuse the stored outputs.
    CacheHit { key: CacheKey, outputs: Vec<Locator> },
    /// A dependency has no result this pass, or the node stopped being
    /// satisfied since readiness was computed.
    Blocked,
}

/// Prepare a node for evaluation.
///
/// Fails only for programmer errors: an unknown operation type or a source
/// reference to an undeclared output slot.
pub fn prepare(
    session: &Session,
    id: NodeId,
    deps: &DependencyMap,
) -> Result<Preparation, CvliveError> {
    let graph = session.graph();
    let op = graph.operation(id)?;
    let def = session.registry().require(&op.operation)?;

    let mut args = BTreeMap::new();
    let mut dependencies = BTreeMap::new();
    let mut inputs = BTreeMap::new();

    for param in &op.params {
        match graph.binding(param) {
            None => return Ok(Preparation::Blocked),
            Some(Binding::Literal(value)) => {
                args.insert(param.name.clone(), value.clone());
                inputs.insert(param.name.clone(), KeyInput::Literal(value.clone()));
            }
            Some(Binding::Source(src)) => {
                let Some((dep_ref, locator)) = deps.resolve(src)? else {
                    return Ok(Preparation::Blocked);
                };
                dependencies.insert(param.name.clone(), locator);
                inputs.insert(param.name.clone(), KeyInput::Dependency(dep_ref));
            }
        }
    }

    let key = cache_key::build_key(&op.operation, &inputs)?;

    if let Some(result) = &op.result {
        if result.key == key && result.outputs.len() == def.outputs.len() {
            return Ok(Preparation::CacheHit {
                key,
                outputs: result.outputs.clone(),
            });
        }
    }

    let outputs = def
        .outputs
        .iter()
        .enumerate()
        .map(|(i, &kind)| {
            let slot = OutputSlot(i as u32);
            ExpectedOutput {
                slot,
                kind,
                locator: cache_key::output_locator(&key, slot, kind),
            }
        })
        .collect();

    Ok(Preparation::Ready(EvaluationRequest {
        node: id,
        operation: op.operation.clone(),
        args,
        dependencies,
        outputs,
        key,
        revision: op.revision,
    }))
}

// =============================================================================
// DRY RUN
// =============================================================================

/// Offline prediction for one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedNode {
    pub node: NodeId,
    pub operation: String,
    pub key: Option<CacheKey>,
    /// `true` if the stored result would be reused.
    pub cached: bool,
}

/// Offline prediction for a whole pass.
#[derive(Debug, Clone, Default)]
pub struct DryRun {
    pub readiness: Readiness,
    pub nodes: Vec<PlannedNode>,
}

impl DryRun {
    /// Number of remote calls the pass would make if everything succeeds.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.nodes.iter().filter(|n| n.key.is_some() && !n.cached).count()
    }
}

/// Predict a pass without touching the graph or the service, assuming every
/// computation succeeds.
pub fn dry_run(session: &Session) -> Result<DryRun, CvliveError> {
    let readiness = ReadinessAnalyzer::compute_ready_order(session.graph());
    let mut deps = DependencyMap::seed(session.graph());
    let mut nodes = Vec::with_capacity(readiness.order.len());

    for &id in &readiness.order {
        let operation = session.graph().operation(id)?.operation.clone();
        let planned = match prepare(session, id, &deps)? {
            Preparation::Ready(request) => {
                deps.register(id, request.key, request.output_locators());
                PlannedNode {
                    node: id,
                    operation,
                    key: Some(request.key),
                    cached: false,
                }
            }
            Preparation::CacheHit { key, outputs } => {
                deps.register(id, key, outputs);
                PlannedNode {
                    node: id,
                    operation,
                    key: Some(key),
                    cached: true,
                }
            }
            Preparation::Blocked => PlannedNode {
                node: id,
                operation,
                key: None,
                cached: false,
            },
        };
        nodes.push(planned);
    }

    Ok(DryRun { readiness, nodes })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::registry::{OperationDef, ParamKind, ParamSpec, Registry};

    fn session() -> Session {
        Session::new(
            Registry::from_definitions([
                OperationDef::new(
                    "blur",
                    vec![
                        ParamSpec::new("image", ParamKind::Image),
                        ParamSpec::new("amount", ParamKind::Int).with_default(5),
                    ],
                ),
                OperationDef::new("stats", vec![ParamSpec::new("image", ParamKind::Image)])
                    .with_outputs(vec![OutputKind::Image, OutputKind::Complex]),
            ])
            .expect("registry"),
        )
    }

    fn wired() -> (Session, NodeId, NodeId) {
        let mut s = session();
        let img = s.add_image_source("img1", Locator::new("a.png"));
        let blur = s.add_operation(None, "blur").expect("blur");
        s.set_parameter_source(blur, "image", Some(SourceRef::new(img, OutputSlot(0))))
            .expect("bind");
        (s, img, blur)
    }

    #[test]
    fn ready_request_carries_args_and_dependencies() {
        let (s, _, blur) = wired();
        let deps = DependencyMap::seed(s.graph());
        let Preparation::Ready(req) = prepare(&s, blur, &deps).expect("prepare") else {
            panic!("expected a ready request");
        };
        assert_eq!(req.operation, "blur");
        assert_eq!(req.args.get("amount"), Some(&ParamValue::new(5)));
        assert!(!req.args.contains_key("image"));
        assert_eq!(req.dependencies.get("image"), Some(&Locator::new("a.png")));
        assert_eq!(req.outputs.len(), 1);
        assert_eq!(
            req.outputs[0].locator.as_str(),
            format!("cached/{}.0.png", req.key.to_hex())
        );
        assert_eq!(req.revision, 1);
    }

    #[test]
    fn stored_key_is_a_cache_hit() {
        let (mut s, _, blur) = wired();
        let deps = DependencyMap::seed(s.graph());
        let Preparation::Ready(req) = prepare(&s, blur, &deps).expect("prepare") else {
            panic!("expected a ready request");
        };
        let graph = s.graph_mut();
        assert!(graph.mark_dispatched(blur, req.revision, req.key));
        assert!(graph.commit_result(blur, req.revision, req.key, req.output_locators()));

        match prepare(&s, blur, &deps).expect("prepare") {
            Preparation::CacheHit { key, outputs } => {
                assert_eq!(key, req.key);
                assert_eq!(outputs, req.output_locators());
            }
            other => panic!("expected a cache hit, got {:?}", other),
        }
    }

    #[test]
    fn missing_upstream_blocks() {
        let (mut s, _, blur) = wired();
        let second = s.add_operation(None, "blur").expect("blur");
        s.set_parameter_source(second, "image", Some(SourceRef::new(blur, OutputSlot(0))))
            .expect("bind");

        let mut deps = DependencyMap::seed(s.graph());
        assert_eq!(prepare(&s, second, &deps).expect("prepare"), Preparation::Blocked);

        deps.register(blur, CacheKey([4; 32]), vec![Locator::new("cached/up.0.png")]);
        let Preparation::Ready(req) = prepare(&s, second, &deps).expect("prepare") else {
            panic!("expected a ready request");
        };
        assert_eq!(
            req.dependencies.get("image"),
            Some(&Locator::new("cached/up.0.png"))
        );
    }

    #[test]
    fn undeclared_upstream_slot_is_fatal() {
        let (mut s, _, blur) = wired();
        let second = s.add_operation(None, "blur").expect("blur");
        s.graph_mut()
            .set_parameter_source(second, "image", Some(SourceRef::new(blur, OutputSlot(4))))
            .expect("bind");
        let mut deps = DependencyMap::seed(s.graph());
        deps.register(blur, CacheKey([4; 32]), vec![Locator::new("cached/up.0.png")]);

        let err = prepare(&s, second, &deps).expect_err("fatal");
        assert!(err.is_fatal());
    }

    #[test]
    fn unsaved_structured_source_is_not_seeded() {
        let mut s = session();
        let data = s.add_structured_source("d", serde_json::json!([1]));
        let img = s.add_image_source("i", Locator::new("a.png"));
        let deps = DependencyMap::seed(s.graph());
        assert!(!deps.contains(data));
        assert!(deps.contains(img));
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn multi_output_request_uses_kind_extensions() {
        let (mut s, img, _) = wired();
        let stats = s.add_operation(None, "stats").expect("stats");
        s.set_parameter_source(stats, "image", Some(SourceRef::new(img, OutputSlot(0))))
            .expect("bind");
        let deps = DependencyMap::seed(s.graph());
        let Preparation::Ready(req) = prepare(&s, stats, &deps).expect("prepare") else {
            panic!("expected a ready request");
        };
        assert!(req.outputs[0].locator.as_str().ends_with(".0.png"));
        assert!(req.outputs[1].locator.as_str().ends_with(".1.json"));
    }

    #[test]
    fn dry_run_counts_calls() {
        let (mut s, _, blur) = wired();
        let second = s.add_operation(None, "blur").expect("blur");
        s.set_parameter_source(second, "image", Some(SourceRef::new(blur, OutputSlot(0))))
            .expect("bind");

        let plan = dry_run(&s).expect("plan");
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.calls(), 2);
        assert!(plan.nodes.iter().all(|n| n.key.is_some()));
    }
}
