use crate::store::GraphRead;
use crate::types::{Direction, NodeId, Relationship, RelationshipType};

/// Chooses the relationships a traversal follows from a node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Expander {
    direction: Direction,
    types: Vec<RelationshipType>,
}

impl Expander {
    /// Follows relationships of any type in `direction`.
    #[must_use]
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            types: Vec::new(),
        }
    }

    /// Restricts expansion to `rel_type`, in addition to any types
    /// already added.
    #[must_use]
    pub fn with_type(mut self, rel_type: impl Into<RelationshipType>) -> Self {
        self.types.push(rel_type.into());
        self
    }

    /// The expander that walks the same relationships the other way.
    #[must_use]
    pub fn reverse(&self) -> Self {
        Self {
            direction: self.direction.reverse(),
            types: self.types.clone(),
        }
    }

    /// The followed direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The followed types; empty means any.
    #[must_use]
    pub fn types(&self) -> &[RelationshipType] {
        &self.types
    }

    pub(crate) fn expand(&self, graph: &dyn GraphRead, node: NodeId) -> Vec<Relationship> {
        graph.relationships(node, self.direction, &self.types)
    }
}
