use std::collections::VecDeque;

use crate::traversal::branch::{Branch, Expansion};

/// Order in which one traversal side visits its branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BranchOrdering {
    /// Depth first, each branch returned before its children.
    #[default]
    PreorderDepthFirst,
    /// Breadth first, each branch returned before its children.
    PreorderBreadthFirst,
    /// Depth first, each branch returned after all its children.
    PostorderDepthFirst,
}

impl BranchOrdering {
    pub(crate) fn create(self, root: Branch) -> BranchSelector {
        match self {
            Self::PreorderDepthFirst => BranchSelector::PreorderDepthFirst {
                current: Some(root),
                started: false,
            },
            Self::PreorderBreadthFirst => BranchSelector::PreorderBreadthFirst {
                current: Some(root),
                queue: VecDeque::new(),
                started: false,
            },
            Self::PostorderDepthFirst => BranchSelector::PostorderDepthFirst { stack: vec![root] },
        }
    }
}

/// Pull-based enumeration of one side's branches.
#[derive(Debug)]
pub(crate) enum BranchSelector {
    PreorderDepthFirst {
        current: Option<Branch>,
        started: bool,
    },
    PreorderBreadthFirst {
        current: Option<Branch>,
        queue: VecDeque<Branch>,
        started: bool,
    },
    PostorderDepthFirst {
        stack: Vec<Branch>,
    },
}

impl BranchSelector {
    /// The next branch, or `None` once the side is exhausted.
    pub(crate) fn next(&mut self, expansion: &mut Expansion<'_>) -> Option<Branch> {
        match self {
            Self::PreorderDepthFirst { current, started } => {
                if !*started {
                    *started = true;
                    return current.clone();
                }
                loop {
                    let branch = current.clone()?;
                    match branch.next_child(expansion) {
                        Some(child) => {
                            *current = Some(child.clone());
                            return Some(child);
                        }
                        None => *current = branch.parent().cloned(),
                    }
                }
            }
            Self::PreorderBreadthFirst {
                current,
                queue,
                started,
            } => {
                if !*started {
                    *started = true;
                    return current.clone();
                }
                loop {
                    let branch = current.clone()?;
                    match branch.next_child(expansion) {
                        Some(child) => {
                            queue.push_back(child.clone());
                            return Some(child);
                        }
                        None => *current = queue.pop_front(),
                    }
                }
            }
            Self::PostorderDepthFirst { stack } => loop {
                let top = stack.last()?.clone();
                match top.next_child(expansion) {
                    Some(child) => stack.push(child),
                    None => return stack.pop(),
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GraphStore, GraphWrite};
    use crate::traversal::evaluator::CombinedEvaluator;
    use crate::traversal::expander::Expander;
    use crate::traversal::uniqueness::Uniqueness;
    use crate::types::{Direction, NodeId};

    /// ```text
    ///      0
    ///    /   \
    ///   1     2
    ///  / \
    /// 3   4
    /// ```
    fn tree() -> GraphStore {
        let graph = GraphStore::new();
        let nodes: Vec<NodeId> = (0..5).map(|_| graph.create_node().unwrap()).collect();
        for (start, end) in [(0, 1), (0, 2), (1, 3), (1, 4)] {
            graph
                .create_relationship(nodes[start], nodes[end], "CHILD".into())
                .unwrap();
        }
        graph
    }

    fn visit(graph: &GraphStore, ordering: BranchOrdering) -> Vec<u64> {
        let mut ex = Expansion::new(
            graph,
            Expander::new(Direction::Outgoing),
            Uniqueness::NodeGlobal.create(),
            CombinedEvaluator::default(),
        );
        let root = Branch::root(graph.node_ids()[0], &mut ex);
        let mut selector = ordering.create(root);
        let first = graph.node_ids()[0].as_u64();
        std::iter::from_fn(|| selector.next(&mut ex))
            .map(|branch| branch.node().as_u64() - first)
            .collect()
    }

    #[test]
    fn preorder_depth_first() {
        let graph = tree();
        assert_eq!(
            visit(&graph, BranchOrdering::PreorderDepthFirst),
            vec![0, 1, 3, 4, 2]
        );
    }

    #[test]
    fn preorder_breadth_first() {
        let graph = tree();
        assert_eq!(
            visit(&graph, BranchOrdering::PreorderBreadthFirst),
            vec![0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn postorder_depth_first() {
        let graph = tree();
        assert_eq!(
            visit(&graph, BranchOrdering::PostorderDepthFirst),
            vec![3, 4, 1, 2, 0]
        );
    }

    #[test]
    fn exhausted_selector_stays_exhausted() {
        let graph = tree();
        let mut ex = Expansion::new(
            &graph,
            Expander::new(Direction::Outgoing),
            Uniqueness::NodeGlobal.create(),
            CombinedEvaluator::default(),
        );
        let root = Branch::root(graph.node_ids()[2], &mut ex);
        let mut selector = BranchOrdering::PreorderBreadthFirst.create(root);
        assert!(selector.next(&mut ex).is_some());
        assert!(selector.next(&mut ex).is_none());
        assert!(selector.next(&mut ex).is_none());
    }
}
