use std::fmt;
use std::hash::{Hash, Hasher};

use crate::types::{NodeId, Relationship};

/// Read access to a path, materialized or not.
///
/// Evaluators receive this so they can inspect a branch without it being
/// copied into a [`Path`] first.
pub trait GraphPath {
    /// First node.
    fn start_node(&self) -> NodeId;

    /// Last node.
    fn end_node(&self) -> NodeId;

    /// Number of relationships.
    fn length(&self) -> usize;

    /// Relationship leading to the end node; `None` for a single node.
    fn last_relationship(&self) -> Option<&Relationship>;

    /// Copies the path out.
    fn to_path(&self) -> Path;
}

/// A materialized path: alternating nodes and relationships.
///
/// Two paths are equal when they start at the same node and follow the
/// same relationships.
#[derive(Debug, Clone)]
pub struct Path {
    nodes: Vec<NodeId>,
    relationships: Vec<Relationship>,
}

impl Path {
    /// A path consisting of a single node.
    #[must_use]
    pub fn single(node: NodeId) -> Self {
        Self {
            nodes: vec![node],
            relationships: Vec::new(),
        }
    }

    /// Builds a path from its nodes and relationships.
    ///
    /// `nodes` must hold exactly one more element than `relationships`.
    pub(crate) fn from_parts(nodes: Vec<NodeId>, relationships: Vec<Relationship>) -> Self {
        debug_assert_eq!(nodes.len(), relationships.len() + 1);
        Self {
            nodes,
            relationships,
        }
    }

    /// Joins a start-side path and an end-side path that end at the same
    /// node. The end side is reversed, so the result runs from the start
    /// side's first node to the end side's first node.
    pub(crate) fn join(start_side: &Path, end_side: &Path) -> Self {
        debug_assert_eq!(start_side.end_node(), end_side.end_node());
        let mut nodes = start_side.nodes.clone();
        nodes.extend(end_side.nodes.iter().rev().skip(1));
        let mut relationships = start_side.relationships.clone();
        relationships.extend(end_side.relationships.iter().rev().cloned());
        Self::from_parts(nodes, relationships)
    }

    /// Nodes from start to end.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Relationships from start to end.
    #[must_use]
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }
}

impl GraphPath for Path {
    fn start_node(&self) -> NodeId {
        self.nodes[0]
    }

    fn end_node(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    fn length(&self) -> usize {
        self.relationships.len()
    }

    fn last_relationship(&self) -> Option<&Relationship> {
        self.relationships.last()
    }

    fn to_path(&self) -> Path {
        self.clone()
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.start_node() == other.start_node()
            && self.relationships.len() == other.relationships.len()
            && self
                .relationships
                .iter()
                .zip(&other.relationships)
                .all(|(a, b)| a.id == b.id)
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.start_node().hash(state);
        for rel in &self.relationships {
            rel.id.hash(state);
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.nodes[0])?;
        for (rel, node) in self.relationships.iter().zip(&self.nodes[1..]) {
            if rel.end == *node {
                write!(f, "-{}->{}", rel.id, node)?;
            } else {
                write!(f, "<-{}-{}", rel.id, node)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RelationshipId;

    fn rel(id: u64, start: u64, end: u64) -> Relationship {
        Relationship {
            id: RelationshipId::new(id),
            start: NodeId::new(start),
            end: NodeId::new(end),
            rel_type: "NEXT".into(),
        }
    }

    #[test]
    fn join_reverses_end_side() {
        // (1)-[10]->(2)-[11]->(3) seen from 1, and (3) reached from 4
        let start = Path::from_parts(
            vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)],
            vec![rel(10, 1, 2), rel(11, 2, 3)],
        );
        let end = Path::from_parts(vec![NodeId::new(4), NodeId::new(3)], vec![rel(12, 3, 4)]);

        let joined = Path::join(&start, &end);
        assert_eq!(joined.length(), 3);
        assert_eq!(joined.start_node(), NodeId::new(1));
        assert_eq!(joined.end_node(), NodeId::new(4));
        assert_eq!(
            joined.nodes(),
            &[NodeId::new(1), NodeId::new(2), NodeId::new(3), NodeId::new(4)]
        );
        assert_eq!(joined.to_string(), "(1)-[10]->(2)-[11]->(3)-[12]->(4)");
    }

    #[test]
    fn equality_is_start_node_and_relationship_ids() {
        let a = Path::from_parts(vec![NodeId::new(1), NodeId::new(2)], vec![rel(5, 1, 2)]);
        let mut renamed = rel(5, 1, 2);
        renamed.rel_type = "OTHER".into();
        let b = Path::from_parts(vec![NodeId::new(1), NodeId::new(2)], vec![renamed]);
        let reversed = Path::from_parts(vec![NodeId::new(2), NodeId::new(1)], vec![rel(5, 1, 2)]);

        assert_eq!(a, b);
        assert_ne!(a, reversed);
        assert_ne!(a, Path::single(NodeId::new(1)));
    }

    #[test]
    fn incoming_steps_display_reversed() {
        let path = Path::from_parts(vec![NodeId::new(2), NodeId::new(1)], vec![rel(7, 1, 2)]);
        assert_eq!(path.to_string(), "(2)<-[7]-(1)");
    }
}
