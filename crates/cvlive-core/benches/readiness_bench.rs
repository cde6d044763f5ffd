//! # Readiness Benchmarks
//!
//! Readiness analysis and cache-key preparation on large charts.
//!
//! Run with: `cargo bench -p cvlive-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cvlive_core::{
    DependencyMap, Locator, NodeId, OperationDef, OutputSlot, ParamKind, ParamSpec,
    ReadinessAnalyzer, Registry, Session, SourceRef, dry_run, prepare,
};
use std::hint::black_box;

fn registry() -> Registry {
    Registry::from_definitions([OperationDef::new(
        "blend",
        vec![
            ParamSpec::new("a", ParamKind::Image),
            ParamSpec::new("b", ParamKind::Image),
            ParamSpec::new("alpha", ParamKind::Percent).with_default(50),
        ],
    )])
    .expect("registry")
}

/// A single chain of `size` operations hanging off one image.
fn create_chain(size: usize) -> (Session, NodeId) {
    let mut session = Session::new(registry());
    let img = session.add_image_source("img", Locator::new("a.png"));
    let mut prev = img;
    for _ in 0..size {
        let op = session.add_operation(None, "blend").expect("op");
        for param in ["a", "b"] {
            session
                .set_parameter_source(op, param, Some(SourceRef::new(prev, OutputSlot(0))))
                .expect("bind");
        }
        prev = op;
    }
    (session, prev)
}

/// A binary fan-in tree: every node blends the two before it.
fn create_ladder(size: usize) -> Session {
    let mut session = Session::new(registry());
    let mut window = [
        session.add_image_source("x", Locator::new("x.png")),
        session.add_image_source("y", Locator::new("y.png")),
    ];
    for _ in 0..size {
        let op = session.add_operation(None, "blend").expect("op");
        session
            .set_parameter_source(op, "a", Some(SourceRef::new(window[0], OutputSlot(0))))
            .expect("bind");
        session
            .set_parameter_source(op, "b", Some(SourceRef::new(window[1], OutputSlot(0))))
            .expect("bind");
        window = [window[1], op];
    }
    session
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_ready_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("ready_order");
    for size in [100, 1_000, 10_000] {
        let (chain, _) = create_chain(size);
        group.bench_with_input(BenchmarkId::new("chain", size), &chain, |b, s| {
            b.iter(|| ReadinessAnalyzer::compute_ready_order(black_box(s.graph())));
        });
        let ladder = create_ladder(size);
        group.bench_with_input(BenchmarkId::new("ladder", size), &ladder, |b, s| {
            b.iter(|| ReadinessAnalyzer::compute_ready_order(black_box(s.graph())));
        });
    }
    group.finish();
}

fn bench_prepare(c: &mut Criterion) {
    let (session, _) = create_chain(1);
    let deps = DependencyMap::seed(session.graph());
    let first = ReadinessAnalyzer::compute_ready_order(session.graph()).order[0];
    c.bench_function("prepare_single", |b| {
        b.iter(|| prepare(black_box(&session), first, &deps).expect("prepare"));
    });
}

fn bench_dry_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("dry_run");
    for size in [100, 1_000] {
        let ladder = create_ladder(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &ladder, |b, s| {
            b.iter(|| dry_run(black_box(s)).expect("dry run"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_ready_order, bench_prepare, bench_dry_run);
criterion_main!(benches);
