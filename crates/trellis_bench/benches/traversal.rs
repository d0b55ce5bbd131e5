//! Traversal benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use trellis_bench::layered_graph;
use trellis_core::traversal::{BranchCollisionPolicy, SideSelectorPolicy};
use trellis_core::{
    BidirectionalTraversalDescription, Direction, Expander, GraphDatabase, TraversalDescription,
    Uniqueness,
};
use trellis_testkit::grid;

fn breadth_first() -> TraversalDescription {
    TraversalDescription::default()
        .breadth_first()
        .uniqueness(Uniqueness::NodeGlobal)
        .expander(Expander::new(Direction::Outgoing))
}

/// Benchmark a full breadth-first walk over a grid.
fn bench_breadth_first_grid(c: &mut Criterion) {
    let mut group = c.benchmark_group("breadth_first_grid");

    for side in [10, 30, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(side), side, |b, &side| {
            let db = GraphDatabase::open_in_memory().unwrap();
            let nodes = grid(&db, side, side).unwrap();
            let description = breadth_first();

            b.iter(|| {
                let visited = description.traverse(db.graph(), nodes[0]).count();
                black_box(visited);
            });
        });
    }
    group.finish();
}

/// Benchmark bidirectional path finding per side selector.
fn bench_bidirectional(c: &mut Criterion) {
    let mut group = c.benchmark_group("bidirectional");
    let db = GraphDatabase::open_in_memory().unwrap();
    let (source, sink) = layered_graph(&db, 8, 50, 3).unwrap();

    for (label, policy) in [
        ("alternating", SideSelectorPolicy::Alternating),
        ("level", SideSelectorPolicy::Level),
        ("level_stop", SideSelectorPolicy::LevelStopDescentOnResult),
    ] {
        group.bench_function(label, |b| {
            let description = BidirectionalTraversalDescription::default()
                .mirrored_sides(breadth_first())
                .side_selector(policy);

            b.iter(|| {
                let found = description
                    .traverse(db.graph(), source, sink)
                    .take(100)
                    .count();
                black_box(found);
            });
        });
    }
    group.finish();
}

/// Benchmark shortest path search between distant grid corners.
fn bench_shortest_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("shortest_path");

    for side in [10, 30].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(side), side, |b, &side| {
            let db = GraphDatabase::open_in_memory().unwrap();
            let nodes = grid(&db, side, side).unwrap();
            let end = nodes[nodes.len() - 1];
            let description = BidirectionalTraversalDescription::default()
                .mirrored_sides(breadth_first())
                .side_selector(SideSelectorPolicy::LevelStopDescentOnResult)
                .collision_policy(BranchCollisionPolicy::ShortestPath);

            b.iter(|| {
                let path = description.traverse(db.graph(), nodes[0], end).next();
                black_box(path);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_breadth_first_grid,
    bench_bidirectional,
    bench_shortest_path,
);

criterion_main!(benches);
