//! Property-based test generators using proptest.
//!
//! Provides strategies for graph shapes, property values and sequences of
//! write operations.

use proptest::prelude::*;
use trellis_core::{CoreResult, NodeId, PropertyValue, RelationshipType, Transaction};

use crate::graphs::GraphShape;

/// Strategy for property values of every kind.
pub fn property_value_strategy() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        any::<bool>().prop_map(PropertyValue::Bool),
        any::<i64>().prop_map(PropertyValue::Int),
        "[a-zA-Z0-9 ]{0,24}".prop_map(PropertyValue::Text),
    ]
}

/// Strategy for property keys.
pub fn property_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for relationship types, drawn from a small alphabet so that
/// type filters actually match something.
pub fn relationship_type_strategy() -> impl Strategy<Value = RelationshipType> {
    prop::sample::select(vec!["KNOWS", "LIKES", "LINK", "OWNS"])
        .prop_map(|name| RelationshipType::new(name))
}

/// Strategy for acyclic graphs: every edge points from a lower to a higher
/// index.
pub fn dag_strategy(max_nodes: usize) -> impl Strategy<Value = GraphShape> {
    (2..=max_nodes.max(2)).prop_flat_map(|node_count| {
        prop::collection::vec((0..node_count, 0..node_count), 0..node_count * 2).prop_map(
            move |pairs| {
                let mut edges: Vec<(usize, usize)> = pairs
                    .into_iter()
                    .filter(|(a, b)| a != b)
                    .map(|(a, b)| (a.min(b), a.max(b)))
                    .collect();
                edges.sort_unstable();
                edges.dedup();
                GraphShape { node_count, edges }
            },
        )
    })
}

/// Strategy for arbitrary directed graphs, including cycles, parallel
/// edges and self-loops.
pub fn graph_strategy(max_nodes: usize) -> impl Strategy<Value = GraphShape> {
    (1..=max_nodes.max(1)).prop_flat_map(|node_count| {
        prop::collection::vec((0..node_count, 0..node_count), 0..node_count * 3)
            .prop_map(move |edges| GraphShape { node_count, edges })
    })
}

/// A single write inside a transaction.
///
/// Nodes are addressed by index into the nodes created so far, modulo
/// their count, so every generated sequence is applicable.
#[derive(Debug, Clone)]
pub enum GraphOp {
    /// Create a node.
    CreateNode,
    /// Link two existing nodes.
    CreateRelationship {
        /// Start node index.
        start: usize,
        /// End node index.
        end: usize,
        /// Relationship type.
        rel_type: RelationshipType,
    },
    /// Set a property on an existing node.
    SetProperty {
        /// Node index.
        node: usize,
        /// Property key.
        key: String,
        /// Property value.
        value: PropertyValue,
    },
}

impl GraphOp {
    /// Records the op in `tx`. Ops referring to nodes are skipped while
    /// `nodes` is empty.
    ///
    /// # Errors
    ///
    /// Returns the transaction's error.
    pub fn apply(&self, tx: &Transaction<'_>, nodes: &mut Vec<NodeId>) -> CoreResult<()> {
        match self {
            Self::CreateNode => nodes.push(tx.create_node()?),
            Self::CreateRelationship {
                start,
                end,
                rel_type,
            } => {
                if !nodes.is_empty() {
                    let start = nodes[start % nodes.len()];
                    let end = nodes[end % nodes.len()];
                    tx.create_relationship(start, end, rel_type.clone())?;
                }
            }
            Self::SetProperty { node, key, value } => {
                if !nodes.is_empty() {
                    tx.set_node_property(nodes[node % nodes.len()], key, value.clone())?;
                }
            }
        }
        Ok(())
    }
}

/// Strategy for one write op, biased towards node creation.
pub fn graph_op_strategy() -> impl Strategy<Value = GraphOp> {
    prop_oneof![
        3 => Just(GraphOp::CreateNode),
        2 => (any::<usize>(), any::<usize>(), relationship_type_strategy()).prop_map(
            |(start, end, rel_type)| GraphOp::CreateRelationship {
                start,
                end,
                rel_type,
            }
        ),
        1 => (any::<usize>(), property_key_strategy(), property_value_strategy())
            .prop_map(|(node, key, value)| GraphOp::SetProperty { node, key, value }),
    ]
}

/// Strategy for a sequence of transactions, each a list of ops.
pub fn transaction_batches_strategy(
    max_transactions: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<Vec<GraphOp>>> {
    prop::collection::vec(
        prop::collection::vec(graph_op_strategy(), 1..=max_ops.max(1)),
        1..=max_transactions.max(1),
    )
}
