use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::store::GraphRead;
use crate::traversal::branch::{Branch, Expansion};
use crate::traversal::collision::{BranchCollisionDetector, BranchCollisionPolicy};
use crate::traversal::evaluator::{CombinedEvaluator, Evaluator, Evaluators};
use crate::traversal::expander::Expander;
use crate::traversal::orderer::{SelectorOrderer, SideSelectorPolicy, TraversalSide};
use crate::traversal::path::{GraphPath, Path};
use crate::traversal::selector::BranchOrdering;
use crate::traversal::uniqueness::{Uniqueness, UniquenessFilter};
use crate::types::NodeId;

/// Predicate over joined paths.
pub type PathFilter = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// Counters of a running traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraversalStats {
    /// Paths handed to the caller.
    pub paths_returned: u64,
    /// Relationships followed while expanding branches.
    pub relationships_traversed: u64,
}

fn missing_node(graph: &dyn GraphRead, nodes: &[NodeId]) -> Option<CoreError> {
    nodes
        .iter()
        .find(|node| !graph.node_exists(**node))
        .map(|node| CoreError::not_found(format!("node {node}")))
}

/// Configuration of a traversal from a single start node.
///
/// Descriptions are immutable values: every builder method returns a new
/// description, and each [`traverse`](Self::traverse) call starts from
/// scratch.
///
/// # Example
///
/// ```rust,ignore
/// let friends = TraversalDescription::default()
///     .breadth_first()
///     .expander(Expander::new(Direction::Outgoing).with_type("KNOWS"))
///     .evaluator(Evaluators::from_depth(1))
///     .max_depth(2);
/// for path in friends.traverse(db.graph(), alice) {
///     println!("{}", path?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TraversalDescription {
    ordering: BranchOrdering,
    uniqueness: Uniqueness,
    expander: Expander,
    evaluator: CombinedEvaluator,
}

impl TraversalDescription {
    /// Sets the branch ordering.
    #[must_use]
    pub fn ordering(mut self, ordering: BranchOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Preorder depth first.
    #[must_use]
    pub fn depth_first(self) -> Self {
        self.ordering(BranchOrdering::PreorderDepthFirst)
    }

    /// Preorder breadth first.
    #[must_use]
    pub fn breadth_first(self) -> Self {
        self.ordering(BranchOrdering::PreorderBreadthFirst)
    }

    /// Sets the uniqueness policy.
    #[must_use]
    pub fn uniqueness(mut self, uniqueness: Uniqueness) -> Self {
        self.uniqueness = uniqueness;
        self
    }

    /// Sets which relationships are followed.
    #[must_use]
    pub fn expander(mut self, expander: Expander) -> Self {
        self.expander = expander;
        self
    }

    /// Adds an evaluator. All evaluators must include a path for it to be
    /// returned and continue it for it to be expanded.
    #[must_use]
    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator.push(evaluator);
        self
    }

    /// Stops expanding at `depth`.
    #[must_use]
    pub fn max_depth(self, depth: usize) -> Self {
        self.evaluator(Evaluators::to_depth(depth))
    }

    /// The same description walking relationships the other way.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self {
            expander: self.expander.reverse(),
            ..self.clone()
        }
    }

    /// Starts a traversal at `start`.
    ///
    /// A missing start node is reported as the first item.
    pub fn traverse<'g>(&self, graph: &'g dyn GraphRead, start: NodeId) -> Traverser<'g> {
        if let Some(err) = missing_node(graph, &[start]) {
            return Traverser {
                side: None,
                error: Some(err),
                paths_returned: 0,
            };
        }
        Traverser {
            side: Some(self.side(graph, start)),
            error: None,
            paths_returned: 0,
        }
    }

    fn side<'g>(&self, graph: &'g dyn GraphRead, start: NodeId) -> TraversalSide<'g> {
        let mut expansion = Expansion::new(
            graph,
            self.expander.clone(),
            self.uniqueness.create(),
            self.evaluator.clone(),
        );
        let root = Branch::root(start, &mut expansion);
        TraversalSide::new(self.ordering.create(root), expansion)
    }
}

/// Lazy sequence of the paths a [`TraversalDescription`] includes.
pub struct Traverser<'g> {
    side: Option<TraversalSide<'g>>,
    error: Option<CoreError>,
    paths_returned: u64,
}

impl Traverser<'_> {
    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> TraversalStats {
        TraversalStats {
            paths_returned: self.paths_returned,
            relationships_traversed: self
                .side
                .as_ref()
                .map_or(0, TraversalSide::relationships_traversed),
        }
    }
}

impl Iterator for Traverser<'_> {
    type Item = CoreResult<Path>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }
        let side = self.side.as_mut()?;
        while let Some(branch) = side.next() {
            if branch.evaluation().includes() {
                self.paths_returned += 1;
                return Some(Ok(branch.to_path()));
            }
        }
        None
    }
}

impl fmt::Debug for Traverser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Traverser")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Configuration of a traversal that searches from both ends at once and
/// returns the paths where the two frontiers meet.
///
/// Unless [`end_side`](Self::end_side) is set, the end side is the start
/// side with its expander reversed.
#[derive(Clone)]
pub struct BidirectionalTraversalDescription {
    start: TraversalDescription,
    end: Option<TraversalDescription>,
    side_selector: SideSelectorPolicy,
    collision_policy: BranchCollisionPolicy,
    collision_evaluator: CombinedEvaluator,
    collision_filter: Option<PathFilter>,
    max_depth: Option<usize>,
}

impl Default for BidirectionalTraversalDescription {
    fn default() -> Self {
        Self {
            start: TraversalDescription::default().breadth_first(),
            end: None,
            side_selector: SideSelectorPolicy::default(),
            collision_policy: BranchCollisionPolicy::default(),
            collision_evaluator: CombinedEvaluator::default(),
            collision_filter: None,
            max_depth: None,
        }
    }
}

impl fmt::Debug for BidirectionalTraversalDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidirectionalTraversalDescription")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("side_selector", &self.side_selector)
            .field("collision_policy", &self.collision_policy)
            .field("collision_evaluator", &self.collision_evaluator)
            .field("collision_filter", &self.collision_filter.is_some())
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl BidirectionalTraversalDescription {
    /// Sets the start side.
    #[must_use]
    pub fn start_side(mut self, side: TraversalDescription) -> Self {
        self.start = side;
        self
    }

    /// Sets the end side explicitly.
    #[must_use]
    pub fn end_side(mut self, side: TraversalDescription) -> Self {
        self.end = Some(side);
        self
    }

    /// Uses `side` for the start and its reverse for the end.
    #[must_use]
    pub fn mirrored_sides(mut self, side: TraversalDescription) -> Self {
        self.start = side;
        self.end = None;
        self
    }

    /// Sets how the two sides are interleaved.
    #[must_use]
    pub fn side_selector(mut self, policy: SideSelectorPolicy) -> Self {
        self.side_selector = policy;
        self
    }

    /// Sets which collisions are accepted.
    #[must_use]
    pub fn collision_policy(mut self, policy: BranchCollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Adds an evaluator for joined paths. Pruning a joined path stops
    /// both of its branches.
    #[must_use]
    pub fn collision_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.collision_evaluator.push(evaluator);
        self
    }

    /// Rejects joined paths before they are evaluated.
    #[must_use]
    pub fn collision_filter(
        mut self,
        filter: impl Fn(&Path) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.collision_filter = Some(Arc::new(filter));
        self
    }

    /// Bounds the length of joined paths found by the level-synchronized
    /// side selectors.
    #[must_use]
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Starts a search for paths from `start` to `end`.
    ///
    /// A missing start or end node is reported as the first item.
    pub fn traverse<'g>(
        &self,
        graph: &'g dyn GraphRead,
        start: NodeId,
        end: NodeId,
    ) -> BidirectionalTraverser<'g> {
        let mut traverser = BidirectionalTraverser {
            orderer: None,
            detector: BranchCollisionDetector::new(self.collision_policy),
            path_uniqueness: self.start.uniqueness.create(),
            filter: self.collision_filter.clone(),
            evaluator: self.collision_evaluator.clone(),
            found: VecDeque::new(),
            paths_found: 0,
            paths_returned: 0,
            error: missing_node(graph, &[start, end]),
        };
        if traverser.error.is_none() {
            let end_side = self.end.clone().unwrap_or_else(|| self.start.reversed());
            traverser.orderer = Some(self.side_selector.create(
                self.start.side(graph, start),
                end_side.side(graph, end),
                self.max_depth,
            ));
        }
        traverser
    }
}

/// Lazy sequence of the joined paths a
/// [`BidirectionalTraversalDescription`] accepts.
pub struct BidirectionalTraverser<'g> {
    orderer: Option<SelectorOrderer<'g>>,
    detector: BranchCollisionDetector,
    path_uniqueness: UniquenessFilter,
    filter: Option<PathFilter>,
    evaluator: CombinedEvaluator,
    found: VecDeque<Path>,
    paths_found: u64,
    paths_returned: u64,
    error: Option<CoreError>,
}

impl BidirectionalTraverser<'_> {
    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> TraversalStats {
        TraversalStats {
            paths_returned: self.paths_returned,
            relationships_traversed: self
                .orderer
                .as_ref()
                .map_or(0, SelectorOrderer::relationships_traversed),
        }
    }
}

impl Iterator for BidirectionalTraverser<'_> {
    type Item = CoreResult<Path>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }
        loop {
            if let Some(path) = self.found.pop_front() {
                self.paths_returned += 1;
                return Some(Ok(path));
            }
            let (side, branch) = self.orderer.as_mut()?.next(self.paths_found)?;

            let uniqueness = &self.path_uniqueness;
            let filter = self.filter.as_deref();
            let accepted = self.detector.evaluate(
                &branch,
                side,
                |path| uniqueness.check_full(path) && filter.is_none_or(|f| f(path)),
                &self.evaluator,
            );
            self.paths_found += accepted.len() as u64;
            self.found.extend(accepted);
        }
    }
}

impl fmt::Debug for BidirectionalTraverser<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidirectionalTraverser")
            .field("stats", &self.stats())
            .field("buffered", &self.found.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GraphStore, GraphWrite};
    use crate::traversal::evaluator::Evaluation;
    use crate::types::Direction;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn nodes(graph: &GraphStore, count: usize) -> Vec<NodeId> {
        (0..count).map(|_| graph.create_node().unwrap()).collect()
    }

    fn link(graph: &GraphStore, nodes: &[NodeId], edges: &[(usize, usize)]) {
        for (start, end) in edges {
            graph
                .create_relationship(nodes[*start], nodes[*end], "R".into())
                .unwrap();
        }
    }

    fn lengths(paths: impl Iterator<Item = CoreResult<Path>>) -> Vec<usize> {
        paths.map(|path| path.unwrap().length()).collect()
    }

    /// a->b->z and a->c->d->z.
    fn two_routes() -> (GraphStore, Vec<NodeId>) {
        let graph = GraphStore::new();
        let n = nodes(&graph, 5);
        link(&graph, &n, &[(0, 1), (0, 2), (2, 3), (1, 4), (3, 4)]);
        (graph, n)
    }

    fn outgoing() -> TraversalDescription {
        TraversalDescription::default()
            .breadth_first()
            .expander(Expander::new(Direction::Outgoing))
    }

    #[test]
    fn breadth_first_with_depth_bound() {
        let (graph, n) = two_routes();
        let mut traverser = outgoing().max_depth(2).traverse(&graph, n[0]);
        let found: Vec<NodeId> = traverser
            .by_ref()
            .map(|path| path.unwrap().end_node())
            .collect();

        assert_eq!(found, vec![n[0], n[1], n[2], n[4], n[3]]);
        assert_eq!(traverser.stats().paths_returned, 5);
        assert_eq!(traverser.stats().relationships_traversed, 4);
    }

    #[test]
    fn evaluator_selects_results_without_stopping_expansion() {
        let (graph, n) = two_routes();
        let paths: Vec<Path> = outgoing()
            .depth_first()
            .uniqueness(Uniqueness::NodePath)
            .evaluator(Evaluators::include_where_end_node_is([n[4]]))
            .traverse(&graph, n[0])
            .collect::<CoreResult<_>>()
            .unwrap();

        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].nodes(), &[n[0], n[1], n[4]]);
        assert_eq!(paths[1].nodes(), &[n[0], n[2], n[3], n[4]]);
    }

    #[test]
    fn missing_start_node_is_reported_once() {
        let graph = GraphStore::new();
        let mut traverser = TraversalDescription::default().traverse(&graph, NodeId::new(9));
        assert!(matches!(
            traverser.next(),
            Some(Err(CoreError::NotFound { .. }))
        ));
        assert!(traverser.next().is_none());
    }

    #[test]
    fn bidirectional_chain_meets_in_the_middle() {
        let graph = GraphStore::new();
        let n = nodes(&graph, 5);
        link(&graph, &n, &[(0, 1), (1, 2), (2, 3), (3, 4)]);

        for policy in [
            SideSelectorPolicy::Alternating,
            SideSelectorPolicy::Level,
            SideSelectorPolicy::LevelStopDescentOnResult,
        ] {
            let paths: Vec<Path> = BidirectionalTraversalDescription::default()
                .mirrored_sides(outgoing())
                .side_selector(policy)
                .traverse(&graph, n[0], n[4])
                .collect::<CoreResult<_>>()
                .unwrap();
            assert_eq!(paths.len(), 1, "{policy:?}");
            assert_eq!(paths[0].nodes(), n.as_slice(), "{policy:?}");
        }
    }

    #[test]
    fn level_ordering_finds_shorter_paths_first() {
        let (graph, n) = two_routes();
        let both = BidirectionalTraversalDescription::default()
            .mirrored_sides(outgoing())
            .side_selector(SideSelectorPolicy::Level);

        assert_eq!(lengths(both.traverse(&graph, n[0], n[4])), vec![2, 3]);
        assert_eq!(
            lengths(
                both.clone()
                    .side_selector(SideSelectorPolicy::LevelStopDescentOnResult)
                    .traverse(&graph, n[0], n[4])
            ),
            vec![2]
        );
        assert_eq!(
            lengths(both.max_depth(2).traverse(&graph, n[0], n[4])),
            vec![2]
        );
    }

    #[test]
    fn shortest_path_policy() {
        let (graph, n) = two_routes();
        let shortest = BidirectionalTraversalDescription::default()
            .mirrored_sides(outgoing())
            .collision_policy(BranchCollisionPolicy::ShortestPath);
        assert_eq!(lengths(shortest.traverse(&graph, n[0], n[4])), vec![2]);
    }

    #[test]
    fn collision_filter_and_evaluator() {
        let (graph, n) = two_routes();
        let avoid = n[1];
        let filtered = BidirectionalTraversalDescription::default()
            .mirrored_sides(outgoing())
            .collision_filter(move |path| !path.nodes().contains(&avoid));
        assert_eq!(lengths(filtered.traverse(&graph, n[0], n[4])), vec![3]);

        let long_only = BidirectionalTraversalDescription::default()
            .mirrored_sides(outgoing())
            .collision_evaluator(Arc::new(|path: &dyn GraphPath| {
                Evaluation::of_includes(path.length() > 2)
            }));
        let mut traverser = long_only.traverse(&graph, n[0], n[4]);
        assert_eq!(lengths(traverser.by_ref()), vec![3]);
        assert_eq!(traverser.stats().paths_returned, 1);
    }

    #[test]
    fn start_equal_to_end_yields_the_empty_path() {
        let (graph, n) = two_routes();
        let paths = lengths(
            BidirectionalTraversalDescription::default()
                .mirrored_sides(outgoing())
                .traverse(&graph, n[2], n[2]),
        );
        assert_eq!(paths, vec![0]);
    }

    #[test]
    fn bidirectional_missing_end_node() {
        let (graph, n) = two_routes();
        let mut traverser =
            BidirectionalTraversalDescription::default().traverse(&graph, n[0], NodeId::new(99));
        assert!(matches!(
            traverser.next(),
            Some(Err(CoreError::NotFound { .. }))
        ));
        assert!(traverser.next().is_none());
    }

    fn dag() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
        (2usize..9).prop_flat_map(|count| {
            let edges = prop::collection::vec((0..count, 0..count), 0..24).prop_map(|pairs| {
                pairs
                    .into_iter()
                    .filter(|(a, b)| a != b)
                    .map(|(a, b)| (a.min(b), a.max(b)))
                    .collect::<Vec<_>>()
            });
            (Just(count), edges)
        })
    }

    proptest! {
        #[test]
        fn bidirectional_traversal_terminates_without_repeats(
            (count, edges) in dag(),
            level in any::<bool>(),
        ) {
            let graph = GraphStore::new();
            let n = nodes(&graph, count);
            link(&graph, &n, &edges);
            let policy = if level {
                SideSelectorPolicy::Level
            } else {
                SideSelectorPolicy::Alternating
            };

            let paths: Vec<Path> = BidirectionalTraversalDescription::default()
                .mirrored_sides(outgoing().uniqueness(Uniqueness::NodeGlobal))
                .side_selector(policy)
                .traverse(&graph, n[0], n[count - 1])
                .take(10_000)
                .collect::<CoreResult<_>>()
                .unwrap();

            prop_assert!(paths.len() < 10_000);
            let unique: HashSet<&Path> = paths.iter().collect();
            prop_assert_eq!(unique.len(), paths.len());
            for path in &paths {
                prop_assert_eq!(path.start_node(), n[0]);
                prop_assert_eq!(path.end_node(), n[count - 1]);
                for (k, rel) in path.relationships().iter().enumerate() {
                    prop_assert_eq!(rel.start, path.nodes()[k]);
                    prop_assert_eq!(rel.end, path.nodes()[k + 1]);
                }
            }
        }
    }
}
