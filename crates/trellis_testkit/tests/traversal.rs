//! Traversals over committed graphs.

use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use trellis_core::traversal::{
    BranchCollisionPolicy, Evaluator, GraphPath, Side, SideSelectorPolicy,
};
use trellis_core::{
    BidirectionalTraversalDescription, CoreResult, Direction, Evaluation, Evaluators, Expander,
    GraphRead, Path, TraversalDescription, Uniqueness,
};
use trellis_testkit::prelude::*;

type Trace = Arc<Mutex<Vec<(Side, usize)>>>;

/// An evaluator that records the length of every branch of one side.
fn recording(trace: &Trace, side: Side) -> Arc<dyn Evaluator> {
    let trace = Arc::clone(trace);
    Arc::new(move |path: &dyn GraphPath| {
        trace.lock().unwrap().push((side, path.length()));
        Evaluation::IncludeAndContinue
    })
}

fn breadth_first(direction: Direction) -> TraversalDescription {
    TraversalDescription::default()
        .breadth_first()
        .uniqueness(Uniqueness::NodeGlobal)
        .expander(Expander::new(direction))
}

#[test]
fn level_orderer_finishes_each_depth_on_both_sides_first() {
    with_temp_db(|db| {
        let n = chain(db, 5).unwrap();
        let trace: Trace = Arc::default();

        let start = breadth_first(Direction::Outgoing).evaluator(recording(&trace, Side::Start));
        let end = breadth_first(Direction::Incoming).evaluator(recording(&trace, Side::End));
        let paths: Vec<Path> = BidirectionalTraversalDescription::default()
            .start_side(start)
            .end_side(end)
            .side_selector(SideSelectorPolicy::Level)
            .traverse(db.graph(), n[0], n[4])
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].nodes(), n.as_slice());
        assert_eq!(paths[0].length(), 4);

        let trace = trace.lock().unwrap().clone();
        let mut deepest = [0usize; 2];
        for (side, length) in &trace {
            let (this, other) = match side {
                Side::Start => (0, 1),
                Side::End => (1, 0),
            };
            deepest[this] = deepest[this].max(*length);
            assert!(
                deepest[this] <= deepest[other] + 1,
                "one side ran two levels ahead: {trace:?}"
            );
        }

        let first_depth_two = trace.iter().position(|(_, len)| *len == 2).unwrap();
        let depth_one: Vec<usize> = trace
            .iter()
            .enumerate()
            .filter(|(_, (_, len))| *len == 1)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(depth_one.len(), 2);
        assert!(depth_one.iter().all(|&i| i < first_depth_two), "{trace:?}");
    });
}

#[test]
fn level_orderer_returns_paths_by_combined_length() {
    with_temp_db(|db| {
        // 0 -> 1 -> 4, 0 -> 2 -> 3 -> 4 and 0 -> 4
        let shape = GraphShape {
            node_count: 5,
            edges: vec![(0, 1), (1, 4), (0, 2), (2, 3), (3, 4), (0, 4)],
        };
        let n = shape.build(db, LINK).unwrap();

        let lengths: Vec<usize> = BidirectionalTraversalDescription::default()
            .mirrored_sides(breadth_first(Direction::Outgoing))
            .side_selector(SideSelectorPolicy::Level)
            .traverse(db.graph(), n[0], n[4])
            .map(|path| path.unwrap().length())
            .collect();
        assert_eq!(lengths, vec![1, 2, 3]);

        let shortest: Vec<usize> = BidirectionalTraversalDescription::default()
            .mirrored_sides(breadth_first(Direction::Outgoing))
            .side_selector(SideSelectorPolicy::Level)
            .collision_policy(BranchCollisionPolicy::ShortestPath)
            .traverse(db.graph(), n[0], n[4])
            .map(|path| path.unwrap().length())
            .collect();
        assert_eq!(shortest, vec![1]);
    });
}

#[test]
fn traversal_sees_only_committed_state() {
    with_temp_db(|db| {
        let n = chain(db, 3).unwrap();
        let session = db.session();
        let tx = session.begin().unwrap();
        let extra = tx.create_node().unwrap();
        tx.create_relationship(n[2], extra, LINK).unwrap();

        let reached: Vec<_> = breadth_first(Direction::Outgoing)
            .traverse(tx.graph(), n[0])
            .map(|path| path.unwrap().end_node())
            .collect();
        assert_eq!(reached, n);
    });
}

#[test]
fn depth_bounded_tree_walk() {
    with_temp_db(|db| {
        let n = tree(db, 2, 3).unwrap();
        let mut traverser = breadth_first(Direction::Outgoing)
            .evaluator(Evaluators::at_depth(2))
            .traverse(db.graph(), n[0]);
        let found: Vec<Path> = traverser.by_ref().collect::<CoreResult<_>>().unwrap();

        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|path| path.length() == 2));
        assert_eq!(traverser.stats().paths_returned, 4);
    });
}

#[test]
fn traversal_on_reopened_database() {
    let db = TestDatabase::file();
    let n = grid(&db, 3, 3).unwrap();
    let db = db.restart();

    let paths: Vec<Path> = BidirectionalTraversalDescription::default()
        .mirrored_sides(breadth_first(Direction::Outgoing).uniqueness(Uniqueness::NodePath))
        .traverse(db.graph(), n[0], n[8])
        .collect::<CoreResult<_>>()
        .unwrap();

    // every monotone route through a 3x3 grid: C(4, 2)
    assert_eq!(paths.len(), 6);
    assert!(paths.iter().all(|path| path.length() == 4));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn bidirectional_traversal_terminates_on_dags(
        shape in dag_strategy(10),
        policy in prop::sample::select(vec![
            SideSelectorPolicy::Alternating,
            SideSelectorPolicy::Level,
            SideSelectorPolicy::LevelStopDescentOnResult,
        ]),
    ) {
        let db = TestDatabase::memory();
        let n = shape.build(&db, LINK).unwrap();
        let (start, end) = (n[0], n[shape.node_count - 1]);

        let paths: Vec<Path> = BidirectionalTraversalDescription::default()
            .mirrored_sides(breadth_first(Direction::Outgoing))
            .side_selector(policy)
            .traverse(db.graph(), start, end)
            .take(10_000)
            .collect::<CoreResult<_>>()
            .unwrap();
        prop_assert!(paths.len() < 10_000);

        let mut seen = HashSet::new();
        for path in &paths {
            prop_assert!(seen.insert(path.clone()), "repeated path {}", path);
            prop_assert_eq!(path.start_node(), start);
            prop_assert_eq!(path.end_node(), end);
            for (rel, pair) in path.relationships().iter().zip(path.nodes().windows(2)) {
                prop_assert_eq!(rel.start, pair[0]);
                prop_assert_eq!(rel.end, pair[1]);
            }
        }
    }

    #[test]
    fn mono_traversal_visits_each_reachable_node_once(shape in graph_strategy(10)) {
        let db = TestDatabase::memory();
        let n = shape.build(&db, LINK).unwrap();

        let reached: Vec<_> = breadth_first(Direction::Both)
            .traverse(db.graph(), n[0])
            .map(|path| path.unwrap().end_node())
            .collect();
        let unique: HashSet<_> = reached.iter().copied().collect();
        prop_assert_eq!(unique.len(), reached.len());
        prop_assert!(reached.len() <= db.graph().node_count());
    }
}
