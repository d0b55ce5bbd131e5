use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::store::GraphRead;
use crate::traversal::evaluator::{CombinedEvaluator, Evaluation};
use crate::traversal::expander::Expander;
use crate::traversal::path::{GraphPath, Path};
use crate::traversal::uniqueness::UniquenessFilter;
use crate::types::{NodeId, Relationship};

/// Everything one side of a traversal needs to grow its branches.
pub(crate) struct Expansion<'g> {
    pub(crate) graph: &'g dyn GraphRead,
    pub(crate) expander: Expander,
    pub(crate) uniqueness: UniquenessFilter,
    pub(crate) evaluator: CombinedEvaluator,
    pub(crate) relationships_traversed: u64,
}

impl<'g> Expansion<'g> {
    pub(crate) fn new(
        graph: &'g dyn GraphRead,
        expander: Expander,
        uniqueness: UniquenessFilter,
        evaluator: CombinedEvaluator,
    ) -> Self {
        Self {
            graph,
            expander,
            uniqueness,
            evaluator,
            relationships_traversed: 0,
        }
    }
}

/// One step of a lazily expanded search tree.
///
/// Position fields never change after creation. The evaluation may only
/// be narrowed (a collision can prune a branch), and the relationships
/// still to expand are pulled from the graph on first expansion.
#[derive(Clone)]
pub(crate) struct Branch(Rc<BranchInner>);

struct BranchInner {
    node: NodeId,
    relationship: Option<Relationship>,
    parent: Option<Branch>,
    length: usize,
    evaluation: Cell<Evaluation>,
    pending: RefCell<Option<std::vec::IntoIter<Relationship>>>,
}

impl Branch {
    /// The root branch of one side, evaluated and registered with the
    /// side's uniqueness filter.
    pub(crate) fn root(node: NodeId, expansion: &mut Expansion<'_>) -> Self {
        let root = Self::new(node, None, None);
        if expansion.uniqueness.check_first(&root) {
            root.evaluate(&expansion.evaluator);
        } else {
            root.restrict(Evaluation::ExcludeAndPrune);
        }
        root
    }

    fn new(node: NodeId, relationship: Option<Relationship>, parent: Option<Branch>) -> Self {
        let length = parent.as_ref().map_or(0, |p| p.length() + 1);
        Self(Rc::new(BranchInner {
            node,
            relationship,
            parent,
            length,
            evaluation: Cell::new(Evaluation::IncludeAndContinue),
            pending: RefCell::new(None),
        }))
    }

    pub(crate) fn node(&self) -> NodeId {
        self.0.node
    }

    pub(crate) fn relationship(&self) -> Option<&Relationship> {
        self.0.relationship.as_ref()
    }

    pub(crate) fn parent(&self) -> Option<&Branch> {
        self.0.parent.as_ref()
    }

    pub(crate) fn length(&self) -> usize {
        self.0.length
    }

    pub(crate) fn evaluation(&self) -> Evaluation {
        self.0.evaluation.get()
    }

    /// Narrows the evaluation: the branch stays included only if both
    /// agree, and keeps expanding only if both agree.
    pub(crate) fn restrict(&self, evaluation: Evaluation) {
        let current = self.evaluation();
        self.0.evaluation.set(Evaluation::of(
            current.includes() && evaluation.includes(),
            current.continues() && evaluation.continues(),
        ));
    }

    /// This branch followed by its ancestors up to the root.
    pub(crate) fn ancestors(&self) -> impl Iterator<Item = &Branch> {
        std::iter::successors(Some(self), |branch| branch.parent())
    }

    fn evaluate(&self, evaluator: &CombinedEvaluator) {
        self.restrict(evaluator.evaluate(self));
    }

    /// Expands the next child that passes the side's uniqueness filter, or
    /// `None` once this branch is pruned or has no relationships left.
    pub(crate) fn next_child(&self, expansion: &mut Expansion<'_>) -> Option<Branch> {
        if !self.evaluation().continues() {
            return None;
        }
        let mut pending = self.0.pending.borrow_mut();
        let relationships = pending.get_or_insert_with(|| {
            expansion
                .expander
                .expand(expansion.graph, self.node())
                .into_iter()
        });

        for relationship in relationships.by_ref() {
            if self.relationship().is_some_and(|via| via.id == relationship.id) {
                continue;
            }
            expansion.relationships_traversed += 1;
            let node = relationship.other_node(self.node());
            let child = Branch::new(node, Some(relationship), Some(self.clone()));
            if expansion.uniqueness.check(&child) {
                child.evaluate(&expansion.evaluator);
                return Some(child);
            }
        }
        None
    }
}

impl GraphPath for Branch {
    fn start_node(&self) -> NodeId {
        self.ancestors().last().map_or(self.node(), Branch::node)
    }

    fn end_node(&self) -> NodeId {
        self.node()
    }

    fn length(&self) -> usize {
        self.0.length
    }

    fn last_relationship(&self) -> Option<&Relationship> {
        self.relationship()
    }

    fn to_path(&self) -> Path {
        let mut nodes = Vec::with_capacity(self.length() + 1);
        let mut relationships = Vec::with_capacity(self.length());
        for branch in self.ancestors() {
            nodes.push(branch.node());
            if let Some(rel) = branch.relationship() {
                relationships.push(rel.clone());
            }
        }
        nodes.reverse();
        relationships.reverse();
        Path::from_parts(nodes, relationships)
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("node", &self.node())
            .field("length", &self.length())
            .field("evaluation", &self.evaluation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GraphStore, GraphWrite};
    use crate::traversal::evaluator::Evaluators;
    use crate::traversal::uniqueness::Uniqueness;
    use crate::types::Direction;

    fn expansion(graph: &GraphStore, uniqueness: Uniqueness) -> Expansion<'_> {
        Expansion::new(
            graph,
            Expander::new(Direction::Both),
            uniqueness.create(),
            CombinedEvaluator::default(),
        )
    }

    #[test]
    fn children_follow_creation_order_and_skip_the_way_back() {
        let graph = GraphStore::new();
        let a = graph.create_node().unwrap();
        let b = graph.create_node().unwrap();
        let c = graph.create_node().unwrap();
        graph.create_relationship(a, b, "R".into()).unwrap();
        graph.create_relationship(b, c, "R".into()).unwrap();

        let mut ex = expansion(&graph, Uniqueness::None);
        let root = Branch::root(b, &mut ex);
        let first = root.next_child(&mut ex).unwrap();
        let second = root.next_child(&mut ex).unwrap();
        assert!(root.next_child(&mut ex).is_none());
        assert_eq!((first.node(), second.node()), (a, c));

        // From c, the only relationship is the one it was reached by.
        assert!(second.next_child(&mut ex).is_none());
        assert_eq!(second.to_path().nodes(), &[b, c]);
        assert_eq!(second.start_node(), b);
        assert_eq!(ex.relationships_traversed, 2);
    }

    #[test]
    fn pruned_branch_does_not_expand() {
        let graph = GraphStore::new();
        let a = graph.create_node().unwrap();
        let b = graph.create_node().unwrap();
        graph.create_relationship(a, b, "R".into()).unwrap();

        let mut ex = expansion(&graph, Uniqueness::None);
        ex.evaluator.push(Evaluators::to_depth(0));
        let root = Branch::root(a, &mut ex);
        assert_eq!(root.evaluation(), Evaluation::IncludeAndPrune);
        assert!(root.next_child(&mut ex).is_none());
    }

    #[test]
    fn restrict_only_narrows() {
        let graph = GraphStore::new();
        let a = graph.create_node().unwrap();
        let mut ex = expansion(&graph, Uniqueness::None);
        let root = Branch::root(a, &mut ex);

        root.restrict(Evaluation::IncludeAndPrune);
        root.restrict(Evaluation::IncludeAndContinue);
        assert_eq!(root.evaluation(), Evaluation::IncludeAndPrune);
    }
}
