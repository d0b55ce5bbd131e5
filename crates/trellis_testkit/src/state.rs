//! Canonical dumps of committed graph state.
//!
//! Crash tests capture the graph before a crash and compare it with the
//! graph recovery rebuilds. The dump is ordered by id, so two stores with
//! the same content produce identical JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trellis_core::store::StorageLayer;
use trellis_core::{
    Direction, GraphRead, GraphStore, NodeId, PropertyValue, RelationshipId, TransactionId,
};

/// A node and its properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Node id.
    pub id: NodeId,
    /// Properties by key.
    pub properties: BTreeMap<String, PropertyValue>,
}

/// A relationship by its ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipState {
    /// Relationship id.
    pub id: RelationshipId,
    /// Start node.
    pub start: NodeId,
    /// End node.
    pub end: NodeId,
    /// Type name.
    pub rel_type: String,
}

/// Everything committed to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphState {
    /// Last transaction applied to the store.
    pub last_committed: TransactionId,
    /// Nodes ordered by id.
    pub nodes: Vec<NodeState>,
    /// Relationships ordered by id.
    pub relationships: Vec<RelationshipState>,
}

impl GraphState {
    /// Captures the committed content of `store`.
    pub fn capture(store: &GraphStore) -> Self {
        let mut ids = store.node_ids();
        ids.sort();

        let nodes = ids
            .iter()
            .map(|&id| NodeState {
                id,
                properties: store.node_properties(id).unwrap_or_default(),
            })
            .collect();

        let mut relationships: Vec<RelationshipState> = ids
            .iter()
            .flat_map(|&id| store.relationships(id, Direction::Outgoing, &[]))
            .map(|rel| RelationshipState {
                id: rel.id,
                start: rel.start,
                end: rel.end,
                rel_type: rel.rel_type.name().to_string(),
            })
            .collect();
        relationships.sort_by_key(|rel| rel.id);

        Self {
            last_committed: store.last_committed_transaction(),
            nodes,
            relationships,
        }
    }

    /// Pretty JSON, for assertion messages and fixtures on disk.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|err| format!("<unserializable: {err}>"))
    }

    /// Parses a dump written by [`to_json`](Self::to_json).
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Asserts that two captured states are equal, printing both as JSON if not.
///
/// # Panics
///
/// Panics if the states differ.
pub fn assert_same_state(expected: &GraphState, actual: &GraphState) {
    assert!(
        expected == actual,
        "graph state differs\nexpected:\n{}\nactual:\n{}",
        expected.to_json(),
        actual.to_json()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;

    #[test]
    fn capture_survives_json() {
        let test_db = TestDatabase::memory();
        test_db
            .transaction(|tx| {
                let a = tx.create_node()?;
                let b = tx.create_node()?;
                tx.set_node_property(a, "name", "Ada".into())?;
                tx.create_relationship(a, b, "KNOWS")?;
                Ok(())
            })
            .unwrap();

        let state = GraphState::capture(test_db.store());
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.relationships.len(), 1);
        assert_eq!(state.relationships[0].rel_type, "KNOWS");
        assert_eq!(GraphState::from_json(&state.to_json()).unwrap(), state);
    }

    #[test]
    fn restart_preserves_state() {
        let test_db = TestDatabase::memory();
        crate::graphs::grid(&test_db, 3, 3).unwrap();
        let before = GraphState::capture(test_db.store());

        let test_db = test_db.restart();
        assert_same_state(&before, &GraphState::capture(test_db.store()));
    }
}
