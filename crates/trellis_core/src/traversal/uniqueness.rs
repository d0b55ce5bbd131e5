use std::collections::HashSet;

use crate::traversal::branch::Branch;
use crate::traversal::path::Path;
use crate::types::{NodeId, RelationshipId};

/// Which repeated visits a traversal side rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Uniqueness {
    /// No restriction. Terminates only on acyclic graphs or with a depth
    /// bound.
    None,
    /// Each node is visited at most once per side.
    #[default]
    NodeGlobal,
    /// A node appears at most once on any single path.
    NodePath,
    /// Each node is visited at most once per depth.
    NodeLevel,
    /// Each relationship is followed at most once per side.
    RelationshipGlobal,
    /// A relationship appears at most once on any single path.
    RelationshipPath,
    /// Each relationship is followed at most once per depth.
    RelationshipLevel,
}

impl Uniqueness {
    /// Creates a fresh filter for one traversal side.
    #[must_use]
    pub fn create(self) -> UniquenessFilter {
        UniquenessFilter {
            kind: self,
            nodes: HashSet::new(),
            relationships: HashSet::new(),
        }
    }

    fn checks_nodes(self) -> bool {
        matches!(self, Self::NodeGlobal | Self::NodePath | Self::NodeLevel)
    }
}

/// Visit state of one traversal side under a [`Uniqueness`] policy.
#[derive(Debug, Clone)]
pub struct UniquenessFilter {
    kind: Uniqueness,
    nodes: HashSet<(usize, NodeId)>,
    relationships: HashSet<(usize, RelationshipId)>,
}

impl UniquenessFilter {
    /// The policy this filter enforces.
    #[must_use]
    pub fn kind(&self) -> Uniqueness {
        self.kind
    }

    /// Registers a root branch.
    pub(crate) fn check_first(&mut self, root: &Branch) -> bool {
        match self.kind {
            Uniqueness::NodeGlobal | Uniqueness::NodeLevel => {
                self.nodes.insert((self.level(root), root.node()))
            }
            _ => true,
        }
    }

    /// Returns `true` if `branch` may be visited, recording the visit.
    pub(crate) fn check(&mut self, branch: &Branch) -> bool {
        let level = self.level(branch);
        match self.kind {
            Uniqueness::None => true,
            Uniqueness::NodeGlobal | Uniqueness::NodeLevel => {
                self.nodes.insert((level, branch.node()))
            }
            Uniqueness::NodePath => branch
                .ancestors()
                .skip(1)
                .all(|ancestor| ancestor.node() != branch.node()),
            Uniqueness::RelationshipGlobal | Uniqueness::RelationshipLevel => {
                match branch.relationship() {
                    Some(rel) => self.relationships.insert((level, rel.id)),
                    None => true,
                }
            }
            Uniqueness::RelationshipPath => match branch.relationship() {
                Some(rel) => branch
                    .ancestors()
                    .skip(1)
                    .filter_map(Branch::relationship)
                    .all(|other| other.id != rel.id),
                None => true,
            },
        }
    }

    /// Checks a complete path, such as one joined from both sides of a
    /// bidirectional traversal. Stateless.
    #[must_use]
    pub fn check_full(&self, path: &Path) -> bool {
        if self.kind == Uniqueness::None {
            return true;
        }
        if self.kind.checks_nodes() {
            let mut seen = HashSet::with_capacity(path.nodes().len());
            path.nodes().iter().all(|node| seen.insert(*node))
        } else {
            let mut seen = HashSet::with_capacity(path.relationships().len());
            path.relationships().iter().all(|rel| seen.insert(rel.id))
        }
    }

    // Global policies share one level so that any repeat collides.
    fn level(&self, branch: &Branch) -> usize {
        match self.kind {
            Uniqueness::NodeLevel | Uniqueness::RelationshipLevel => branch.length(),
            _ => 0,
        }
    }
}
