//! # Evaluation Scenarios
//!
//! End-to-end passes at the core level. A tiny synchronous stand-in for the
//! driver walks the ready order, pretends to call the compute service and
//! commits through the compare-and-set API.

use cvlive_core::{
    DependencyMap, Locator, NodeId, OperationDef, OutputKind, OutputSlot, ParamKind, ParamSpec,
    ParamValue, Preparation, ReadinessAnalyzer, Registry, SavedPayload, Session, SourceRef,
    prepare, structured_locator,
};
use std::collections::BTreeSet;

#[derive(Debug, Default)]
struct PassLog {
    calls: Vec<NodeId>,
    hits: Vec<NodeId>,
    blocked: Vec<NodeId>,
    cleared: Vec<NodeId>,
}

/// Run one pass. Nodes in `failing` are rejected by the pretend service.
fn run_pass(session: &mut Session, failing: &BTreeSet<NodeId>) -> PassLog {
    let mut log = PassLog::default();
    let readiness = ReadinessAnalyzer::compute_ready_order(session.graph());
    log.cleared = readiness.invalidate(session.graph_mut());

    let mut deps = DependencyMap::seed(session.graph());
    for &id in &readiness.order {
        match prepare(session, id, &deps).expect("prepare") {
            Preparation::CacheHit { key, outputs } => {
                deps.register(id, key, outputs);
                log.hits.push(id);
            }
            Preparation::Blocked => log.blocked.push(id),
            Preparation::Ready(req) => {
                log.calls.push(id);
                let graph = session.graph_mut();
                assert!(graph.mark_dispatched(id, req.revision, req.key));
                if failing.contains(&id) {
                    assert!(graph.abandon_dispatch(id, req.revision, req.key));
                    continue;
                }
                assert!(graph.commit_result(id, req.revision, req.key, req.output_locators()));
                deps.register(id, req.key, req.output_locators());
            }
        }
    }
    log
}

fn registry() -> Registry {
    Registry::from_definitions([
        OperationDef::new(
            "blur",
            vec![
                ParamSpec::new("image", ParamKind::Image),
                ParamSpec::new("amount", ParamKind::Int).with_default(5),
            ],
        ),
        OperationDef::new(
            "filter2d",
            vec![
                ParamSpec::new("image", ParamKind::Image),
                ParamSpec::new("kernel", ParamKind::Complex),
            ],
        ),
        OperationDef::new("histogram", vec![ParamSpec::new("image", ParamKind::Image)])
            .with_outputs(vec![OutputKind::Complex]),
    ])
    .expect("registry")
}

fn bind(session: &mut Session, node: NodeId, param: &str, target: NodeId) {
    session
        .set_parameter_source(node, param, Some(SourceRef::new(target, OutputSlot(0))))
        .expect("bind");
}

fn stored_outputs(session: &Session, id: NodeId) -> Option<Vec<Locator>> {
    session
        .graph()
        .operation(id)
        .expect("op")
        .result
        .as_ref()
        .map(|r| r.outputs.clone())
}

#[test]
fn blur_walkthrough() {
    let mut session = Session::new(registry());
    let img1 = session.add_image_source("img1", Locator::new("a.png"));
    let blur1 = session.add_operation(Some("blur1".into()), "blur").expect("blur");
    bind(&mut session, blur1, "image", img1);

    // First pass computes.
    let first = run_pass(&mut session, &BTreeSet::new());
    assert_eq!(first.calls, vec![blur1]);
    let outputs = stored_outputs(&session, blur1).expect("result");
    assert!(outputs[0].as_str().starts_with("cached/"));
    assert!(outputs[0].as_str().ends_with(".0.png"));

    // Unchanged graph: zero calls, same locator.
    let second = run_pass(&mut session, &BTreeSet::new());
    assert!(second.calls.is_empty());
    assert_eq!(second.hits, vec![blur1]);
    assert_eq!(stored_outputs(&session, blur1), Some(outputs.clone()));

    // Editing a literal changes the key: exactly one call.
    session
        .set_parameter_value(blur1, "amount", Some(ParamValue::new(7)))
        .expect("edit");
    let third = run_pass(&mut session, &BTreeSet::new());
    assert_eq!(third.calls, vec![blur1]);
    assert_ne!(stored_outputs(&session, blur1), Some(outputs));

    // Removing the source leaves blur1 unsatisfied and clears its result.
    session.remove_node(img1).expect("remove");
    let fourth = run_pass(&mut session, &BTreeSet::new());
    assert!(fourth.calls.is_empty());
    assert_eq!(fourth.cleared, vec![blur1]);
    assert_eq!(stored_outputs(&session, blur1), None);
}

#[test]
fn unchanged_upstream_hash_keeps_downstream_cached() {
    let mut session = Session::new(registry());
    let img = session.add_image_source("img", Locator::new("a.png"));
    let a = session.add_operation(None, "blur").expect("a");
    let b = session.add_operation(None, "blur").expect("b");
    bind(&mut session, a, "image", img);
    bind(&mut session, b, "image", a);

    assert_eq!(run_pass(&mut session, &BTreeSet::new()).calls, vec![a, b]);

    // Editing b only recomputes b.
    session
        .set_parameter_value(b, "amount", Some(ParamValue::new(3)))
        .expect("edit");
    let log = run_pass(&mut session, &BTreeSet::new());
    assert_eq!(log.calls, vec![b]);
    assert_eq!(log.hits, vec![a]);

    // Editing a recomputes both, upstream first.
    session
        .set_parameter_value(a, "amount", Some(ParamValue::new(9)))
        .expect("edit");
    assert_eq!(run_pass(&mut session, &BTreeSet::new()).calls, vec![a, b]);
}

#[test]
fn failed_upstream_blocks_then_recovers() {
    let mut session = Session::new(registry());
    let img = session.add_image_source("img", Locator::new("a.png"));
    let a = session.add_operation(None, "blur").expect("a");
    let b = session.add_operation(None, "blur").expect("b");
    let other = session.add_operation(None, "blur").expect("other");
    bind(&mut session, a, "image", img);
    bind(&mut session, b, "image", a);
    bind(&mut session, other, "image", img);

    let failing: BTreeSet<NodeId> = [a].into_iter().collect();
    let log = run_pass(&mut session, &failing);
    assert_eq!(log.calls, vec![a, other]);
    assert_eq!(log.blocked, vec![b]);
    assert!(stored_outputs(&session, b).is_none());

    let log = run_pass(&mut session, &BTreeSet::new());
    assert_eq!(log.calls, vec![a, b]);
    assert_eq!(log.hits, vec![other]);
}

#[test]
fn structured_source_needs_a_save_first() {
    let mut session = Session::new(registry());
    let img = session.add_image_source("img", Locator::new("a.png"));
    let kernel = session.add_structured_source("kernel", serde_json::json!([[0, 1], [1, 0]]));
    let f = session.add_operation(None, "filter2d").expect("filter2d");
    bind(&mut session, f, "image", img);
    bind(&mut session, f, "kernel", kernel);

    let log = run_pass(&mut session, &BTreeSet::new());
    assert_eq!(log.blocked, vec![f]);

    let payload = serde_json::json!([[0, 1], [1, 0]]);
    assert!(session.graph_mut().mark_structured_saved(
        kernel,
        &payload,
        SavedPayload {
            hash: "k1".into(),
            locator: structured_locator("k1"),
        },
    ));
    assert_eq!(run_pass(&mut session, &BTreeSet::new()).calls, vec![f]);

    // A new payload must be saved again before f can be recomputed.
    session
        .set_structured_payload(kernel, serde_json::json!([[1]]))
        .expect("edit");
    assert_eq!(run_pass(&mut session, &BTreeSet::new()).blocked, vec![f]);
}

#[test]
fn structured_output_feeds_downstream() {
    let mut session = Session::new(registry());
    let img = session.add_image_source("img", Locator::new("a.png"));
    let hist = session.add_operation(None, "histogram").expect("histogram");
    let f = session.add_operation(None, "filter2d").expect("filter2d");
    bind(&mut session, hist, "image", img);
    bind(&mut session, f, "image", img);
    bind(&mut session, f, "kernel", hist);

    let log = run_pass(&mut session, &BTreeSet::new());
    assert_eq!(log.calls, vec![hist, f]);
    let outputs = stored_outputs(&session, hist).expect("hist result");
    assert!(outputs[0].as_str().ends_with(".0.json"));
}
