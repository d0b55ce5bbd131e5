use std::collections::{HashMap, HashSet};

use crate::traversal::branch::Branch;
use crate::traversal::evaluator::CombinedEvaluator;
use crate::traversal::orderer::Side;
use crate::traversal::path::{GraphPath, Path};
use crate::types::NodeId;

/// Which joined paths a bidirectional traversal accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BranchCollisionPolicy {
    /// Every accepted collision.
    #[default]
    Standard,
    /// Only collisions as long as the first accepted one.
    ShortestPath,
}

/// Finds nodes reached from both sides and joins the branches that met
/// there into paths.
#[derive(Debug)]
pub(crate) struct BranchCollisionDetector {
    policy: BranchCollisionPolicy,
    branches: HashMap<NodeId, [Vec<Branch>; 2]>,
    returned: HashSet<Path>,
    shortest: Option<usize>,
}

impl BranchCollisionDetector {
    pub(crate) fn new(policy: BranchCollisionPolicy) -> Self {
        Self {
            policy,
            branches: HashMap::new(),
            returned: HashSet::new(),
            shortest: None,
        }
    }

    /// Records `branch` and returns the paths newly accepted through it.
    ///
    /// Candidates are joined with the other side's branches at the same
    /// node in the order those were recorded. Each candidate must pass
    /// `filter`, must not have been returned before, and must be included
    /// by `evaluator`. A candidate the evaluator does not continue prunes
    /// both of its branches.
    pub(crate) fn evaluate(
        &mut self,
        branch: &Branch,
        side: Side,
        filter: impl Fn(&Path) -> bool,
        evaluator: &CombinedEvaluator,
    ) -> Vec<Path> {
        let recorded = self.branches.entry(branch.node()).or_default();
        recorded[side.index()].push(branch.clone());
        let others = recorded[side.other().index()].clone();
        if others.is_empty() {
            return Vec::new();
        }

        let this = branch.to_path();
        let mut accepted = Vec::new();
        for other in &others {
            let other_path = other.to_path();
            let (joined, start, end) = match side {
                Side::Start => (Path::join(&this, &other_path), branch, other),
                Side::End => (Path::join(&other_path, &this), other, branch),
            };
            if !filter(&joined) || !self.returned.insert(joined.clone()) {
                continue;
            }

            let evaluation = evaluator.evaluate(&joined);
            if !evaluation.continues() {
                start.restrict(evaluation);
                end.restrict(evaluation);
            }
            if evaluation.includes() && self.within_shortest(&joined) {
                accepted.push(joined);
            }
        }
        accepted
    }

    fn within_shortest(&mut self, path: &Path) -> bool {
        if self.policy == BranchCollisionPolicy::Standard {
            return true;
        }
        match self.shortest {
            Some(length) => path.length() == length,
            None => {
                self.shortest = Some(path.length());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GraphStore, GraphWrite};
    use crate::traversal::branch::Expansion;
    use crate::traversal::evaluator::{Evaluation, Evaluators};
    use crate::traversal::expander::Expander;
    use crate::traversal::uniqueness::Uniqueness;
    use crate::types::Direction;

    /// Two routes from `a` to `d`: a-b-d and a-c-d.
    fn diamond() -> (GraphStore, [NodeId; 4]) {
        let graph = GraphStore::new();
        let [a, b, c, d] = [(); 4].map(|()| graph.create_node().unwrap());
        for (start, end) in [(a, b), (a, c), (b, d), (c, d)] {
            graph.create_relationship(start, end, "R".into()).unwrap();
        }
        (graph, [a, b, c, d])
    }

    fn expansion(graph: &GraphStore, direction: Direction) -> Expansion<'_> {
        Expansion::new(
            graph,
            Expander::new(direction),
            Uniqueness::None.create(),
            CombinedEvaluator::default(),
        )
    }

    /// Roots a branch at `root` and expands up to `take` of its children.
    fn step(ex: &mut Expansion<'_>, root: NodeId, take: usize) -> (Branch, Vec<Branch>) {
        let root = Branch::root(root, ex);
        let children = std::iter::from_fn(|| root.next_child(ex)).take(take).collect();
        (root, children)
    }

    #[test]
    fn joins_every_opposite_branch_at_the_meeting_node() {
        let (graph, [a, b, _c, d]) = diamond();
        let mut start = expansion(&graph, Direction::Outgoing);
        let mut end = expansion(&graph, Direction::Incoming);
        let (_, start_children) = step(&mut start, a, 1);
        let (_, end_children) = step(&mut end, d, 2);
        let mut detector = BranchCollisionDetector::new(BranchCollisionPolicy::Standard);
        let evaluator = CombinedEvaluator::default();

        // End side reaches b (via b->d) and c (via c->d); start reaches b.
        assert!(detector
            .evaluate(&end_children[0], Side::End, |_| true, &evaluator)
            .is_empty());
        let found = detector.evaluate(&start_children[0], Side::Start, |_| true, &evaluator);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].nodes(), &[a, b, d]);

        // The same meeting is not reported twice.
        assert!(detector
            .evaluate(&start_children[0], Side::Start, |_| true, &evaluator)
            .is_empty());
    }

    #[test]
    fn filter_runs_before_the_evaluator() {
        let (graph, [a, ..]) = diamond();
        let mut start = expansion(&graph, Direction::Outgoing);
        let mut end = expansion(&graph, Direction::Incoming);
        let (start_root, _) = step(&mut start, a, 0);
        let (end_root, _) = step(&mut end, a, 0);
        let mut detector = BranchCollisionDetector::new(BranchCollisionPolicy::Standard);
        let mut evaluator = CombinedEvaluator::default();
        evaluator.push(std::sync::Arc::new(|_: &dyn GraphPath| -> Evaluation {
            panic!("filtered paths are never evaluated")
        }));

        detector.evaluate(&start_root, Side::Start, |_| true, &evaluator);
        assert!(detector
            .evaluate(&end_root, Side::End, |path| path.length() > 0, &evaluator)
            .is_empty());
    }

    #[test]
    fn pruning_collision_stops_both_branches() {
        let (graph, [a, _, _, d]) = diamond();
        let mut start = expansion(&graph, Direction::Outgoing);
        let mut end = expansion(&graph, Direction::Incoming);
        let (_, start_children) = step(&mut start, a, 1);
        let (_, end_children) = step(&mut end, d, 1);
        let mut detector = BranchCollisionDetector::new(BranchCollisionPolicy::Standard);
        let mut evaluator = CombinedEvaluator::default();
        evaluator.push(Evaluators::to_depth(2));

        detector.evaluate(&start_children[0], Side::Start, |_| true, &evaluator);
        let found = detector.evaluate(&end_children[0], Side::End, |_| true, &evaluator);
        assert_eq!(found.len(), 1);
        assert!(!start_children[0].evaluation().continues());
        assert!(!end_children[0].evaluation().continues());
    }

    #[test]
    fn shortest_path_policy_rejects_longer_paths() {
        let graph = GraphStore::new();
        let [a, b, c] = [(); 3].map(|()| graph.create_node().unwrap());
        graph.create_relationship(a, c, "R".into()).unwrap();
        graph.create_relationship(a, b, "R".into()).unwrap();
        graph.create_relationship(b, c, "R".into()).unwrap();

        let mut start = expansion(&graph, Direction::Outgoing);
        let mut end = expansion(&graph, Direction::Incoming);
        let (_, direct) = step(&mut start, a, 2);
        let (end_root, _) = step(&mut end, c, 0);
        let mut detector = BranchCollisionDetector::new(BranchCollisionPolicy::ShortestPath);
        let evaluator = CombinedEvaluator::default();

        detector.evaluate(&end_root, Side::End, |_| true, &evaluator);
        assert_eq!(
            detector
                .evaluate(&direct[0], Side::Start, |_| true, &evaluator)
                .len(),
            1
        );
        let via_b = direct[1].next_child(&mut start).unwrap();
        assert_eq!(via_b.node(), c);
        assert!(detector
            .evaluate(&via_b, Side::Start, |_| true, &evaluator)
            .is_empty());
    }
}
