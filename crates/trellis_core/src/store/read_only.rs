use std::collections::BTreeMap;

use super::{GraphRead, GraphWrite};
use crate::error::{CoreError, CoreResult};
use crate::types::{
    Direction, NodeId, PropertyValue, Relationship, RelationshipId, RelationshipType,
};

/// A view over a graph that serves reads and rejects every write.
#[derive(Debug, Clone)]
pub struct ReadOnlyGraph<G> {
    inner: G,
}

impl<G: GraphRead> ReadOnlyGraph<G> {
    /// Wraps `inner`.
    pub fn new(inner: G) -> Self {
        Self { inner }
    }

    /// Returns the wrapped graph.
    pub fn into_inner(self) -> G {
        self.inner
    }
}

fn refuse<T>(operation: &'static str) -> CoreResult<T> {
    Err(CoreError::ReadOnly { operation })
}

impl<G: GraphRead> GraphRead for ReadOnlyGraph<G> {
    fn node_exists(&self, node: NodeId) -> bool {
        self.inner.node_exists(node)
    }

    fn node_property(&self, node: NodeId, key: &str) -> Option<PropertyValue> {
        self.inner.node_property(node, key)
    }

    fn node_properties(&self, node: NodeId) -> CoreResult<BTreeMap<String, PropertyValue>> {
        self.inner.node_properties(node)
    }

    fn relationship(&self, id: RelationshipId) -> Option<Relationship> {
        self.inner.relationship(id)
    }

    fn relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> Vec<Relationship> {
        self.inner.relationships(node, direction, types)
    }

    fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    fn relationship_count(&self) -> usize {
        self.inner.relationship_count()
    }
}

impl<G: GraphRead> GraphWrite for ReadOnlyGraph<G> {
    fn create_node(&self) -> CoreResult<NodeId> {
        refuse("create_node")
    }

    fn create_relationship(
        &self,
        _start: NodeId,
        _end: NodeId,
        _rel_type: RelationshipType,
    ) -> CoreResult<RelationshipId> {
        refuse("create_relationship")
    }

    fn delete_node(&self, _node: NodeId) -> CoreResult<()> {
        refuse("delete_node")
    }

    fn delete_relationship(&self, _id: RelationshipId) -> CoreResult<()> {
        refuse("delete_relationship")
    }

    fn set_node_property(
        &self,
        _node: NodeId,
        _key: &str,
        _value: PropertyValue,
    ) -> CoreResult<()> {
        refuse("set_node_property")
    }

    fn remove_node_property(&self, _node: NodeId, _key: &str) -> CoreResult<()> {
        refuse("remove_node_property")
    }
}
