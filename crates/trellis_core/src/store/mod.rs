//! Graph storage.
//!
//! The transactional core talks to storage through [`StorageLayer`]:
//! validate a transaction's commands, apply them once they are durable in the
//! log, replay them during recovery and force everything to stable storage.
//! Traversals only need [`GraphRead`]. [`GraphWrite`] is the direct,
//! non-transactional write path used for building fixtures and imports;
//! [`ReadOnlyGraph`] wraps any reader and refuses every write.

mod graph;
mod read_only;

pub use graph::{GraphStore, MemorySnapshot, SnapshotLocation};
pub use read_only::ReadOnlyGraph;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CoreResult;
use crate::types::{
    Direction, NodeId, PropertyValue, Relationship, RelationshipId, RelationshipType,
    TransactionId,
};
use crate::wal::{Command, CommittedTransaction};

/// The storage collaborator of the transaction manager and recovery.
pub trait StorageLayer: Send + Sync {
    /// Checks that `commands` can be applied in order to the current state.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `InvalidOperation` describing the first
    /// command that cannot be applied.
    fn validate(&self, commands: &[Command]) -> CoreResult<()>;

    /// Applies a committed transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a command cannot be applied; the store may then
    /// be partially updated.
    fn apply(&self, txid: TransactionId, commands: &[Command]) -> CoreResult<()>;

    /// Applies a transaction read back from the log during recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if a command cannot be applied.
    fn apply_recovered_entry(&self, tx: &CommittedTransaction) -> CoreResult<()>;

    /// Writes all applied state to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted.
    fn force_everything(&self) -> CoreResult<()>;

    /// The transaction most recently applied, in log order.
    fn last_committed_transaction(&self) -> TransactionId;

    /// The highest transaction id ever applied.
    fn highest_committed_transaction(&self) -> TransactionId;

    /// Reserves a fresh node id.
    fn next_node_id(&self) -> NodeId;

    /// Reserves a fresh relationship id.
    fn next_relationship_id(&self) -> RelationshipId;
}

/// Read access to a graph.
pub trait GraphRead {
    /// Returns `true` if the node exists.
    fn node_exists(&self, node: NodeId) -> bool;

    /// Returns a node property.
    fn node_property(&self, node: NodeId, key: &str) -> Option<PropertyValue>;

    /// Returns all properties of a node.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the node does not exist.
    fn node_properties(&self, node: NodeId) -> CoreResult<BTreeMap<String, PropertyValue>>;

    /// Returns a relationship by id.
    fn relationship(&self, id: RelationshipId) -> Option<Relationship>;

    /// Returns the relationships of `node` in `direction`, in creation order.
    ///
    /// An empty `types` slice means any type.
    fn relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> Vec<Relationship>;

    /// Number of nodes.
    fn node_count(&self) -> usize;

    /// Number of relationships.
    fn relationship_count(&self) -> usize;
}

impl<G: GraphRead + ?Sized> GraphRead for Arc<G> {
    fn node_exists(&self, node: NodeId) -> bool {
        (**self).node_exists(node)
    }

    fn node_property(&self, node: NodeId, key: &str) -> Option<PropertyValue> {
        (**self).node_property(node, key)
    }

    fn node_properties(&self, node: NodeId) -> CoreResult<BTreeMap<String, PropertyValue>> {
        (**self).node_properties(node)
    }

    fn relationship(&self, id: RelationshipId) -> Option<Relationship> {
        (**self).relationship(id)
    }

    fn relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> Vec<Relationship> {
        (**self).relationships(node, direction, types)
    }

    fn node_count(&self) -> usize {
        (**self).node_count()
    }

    fn relationship_count(&self) -> usize {
        (**self).relationship_count()
    }
}

/// Direct write access to a graph, bypassing transactions and the log.
pub trait GraphWrite {
    /// Creates a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph rejects writes.
    fn create_node(&self) -> CoreResult<NodeId>;

    /// Creates a relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if either node is missing or the graph rejects
    /// writes.
    fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: RelationshipType,
    ) -> CoreResult<RelationshipId>;

    /// Deletes a node without relationships.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing, still has relationships, or
    /// the graph rejects writes.
    fn delete_node(&self, node: NodeId) -> CoreResult<()>;

    /// Deletes a relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the relationship is missing or the graph rejects
    /// writes.
    fn delete_relationship(&self, id: RelationshipId) -> CoreResult<()>;

    /// Sets a node property.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing or the graph rejects writes.
    fn set_node_property(&self, node: NodeId, key: &str, value: PropertyValue) -> CoreResult<()>;

    /// Removes a node property.
    ///
    /// # Errors
    ///
    /// Returns an error if the node is missing or the graph rejects writes.
    fn remove_node_property(&self, node: NodeId, key: &str) -> CoreResult<()>;
}
