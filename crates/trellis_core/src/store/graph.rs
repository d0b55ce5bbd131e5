//! In-memory graph store with snapshot persistence.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::{GraphRead, GraphWrite, StorageLayer};
use crate::dir::write_atomically;
use crate::error::{CoreError, CoreResult};
use crate::types::{
    Direction, NodeId, PropertyValue, Relationship, RelationshipId, RelationshipType,
    TransactionId,
};
use crate::wal::{Command, CommittedTransaction};

const SNAPSHOT_FORMAT: u32 = 1;

/// An in-memory snapshot slot.
///
/// Clones share the slot, so a test can "restart" a database over the
/// snapshot the previous instance forced.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    bytes: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemorySnapshot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing has been forced yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.lock().is_none()
    }
}

/// Where [`GraphStore::force_everything`](StorageLayer::force_everything)
/// writes its snapshot.
#[derive(Debug, Clone)]
pub enum SnapshotLocation {
    /// A JSON file, replaced atomically.
    File(PathBuf),
    /// A shared in-memory slot.
    Memory(MemorySnapshot),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct NodeRecord {
    id: NodeId,
    properties: BTreeMap<String, PropertyValue>,
    relationships: Vec<RelationshipId>,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: BTreeMap<NodeId, NodeRecord>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    last_applied: TransactionId,
    highest_applied: TransactionId,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: u32,
    last_applied: TransactionId,
    highest_applied: TransactionId,
    next_node_id: u64,
    next_relationship_id: u64,
    nodes: Vec<NodeRecord>,
    relationships: Vec<Relationship>,
}

impl GraphState {
    fn node_mut(&mut self, node: NodeId) -> CoreResult<&mut NodeRecord> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| CoreError::not_found(format!("node {node}")))
    }

    fn apply_command(&mut self, command: &Command) -> CoreResult<()> {
        match command {
            Command::CreateNode { node } => {
                if self.nodes.contains_key(node) {
                    return Err(CoreError::invalid_operation(format!(
                        "node {node} already exists"
                    )));
                }
                self.nodes.insert(
                    *node,
                    NodeRecord {
                        id: *node,
                        ..NodeRecord::default()
                    },
                );
            }
            Command::DeleteNode { node } => {
                let record = self.node_mut(*node)?;
                if !record.relationships.is_empty() {
                    return Err(CoreError::invalid_operation(format!(
                        "node {node} still has {} relationships",
                        record.relationships.len()
                    )));
                }
                self.nodes.remove(node);
            }
            Command::CreateRelationship {
                id,
                start,
                end,
                rel_type,
            } => {
                if self.relationships.contains_key(id) {
                    return Err(CoreError::invalid_operation(format!(
                        "relationship {id} already exists"
                    )));
                }
                if !self.nodes.contains_key(end) {
                    return Err(CoreError::not_found(format!("node {end}")));
                }
                self.node_mut(*start)?.relationships.push(*id);
                if start != end {
                    self.node_mut(*end)?.relationships.push(*id);
                }
                self.relationships.insert(
                    *id,
                    Relationship {
                        id: *id,
                        start: *start,
                        end: *end,
                        rel_type: rel_type.clone(),
                    },
                );
            }
            Command::DeleteRelationship { id } => {
                let rel = self
                    .relationships
                    .remove(id)
                    .ok_or_else(|| CoreError::not_found(format!("relationship {id}")))?;
                for node in [rel.start, rel.end] {
                    if let Some(record) = self.nodes.get_mut(&node) {
                        record.relationships.retain(|r| r != id);
                    }
                }
            }
            Command::SetNodeProperty { node, key, value } => {
                self.node_mut(*node)?
                    .properties
                    .insert(key.clone(), value.clone());
            }
            Command::RemoveNodeProperty { node, key } => {
                self.node_mut(*node)?.properties.remove(key);
            }
        }
        Ok(())
    }
}

/// Effects of the commands validated so far, layered over the state.
#[derive(Default)]
struct Overlay {
    created_nodes: HashSet<NodeId>,
    deleted_nodes: HashSet<NodeId>,
    created_rels: HashMap<RelationshipId, (NodeId, NodeId)>,
    deleted_rels: HashSet<RelationshipId>,
}

impl Overlay {
    fn node_live(&self, state: &GraphState, node: NodeId) -> bool {
        self.created_nodes.contains(&node)
            || (state.nodes.contains_key(&node) && !self.deleted_nodes.contains(&node))
    }

    fn rel_live(&self, state: &GraphState, id: RelationshipId) -> bool {
        self.created_rels.contains_key(&id)
            || (state.relationships.contains_key(&id) && !self.deleted_rels.contains(&id))
    }

    fn degree(&self, state: &GraphState, node: NodeId) -> usize {
        let stored = state.nodes.get(&node).map_or(0, |record| {
            record
                .relationships
                .iter()
                .filter(|id| !self.deleted_rels.contains(id))
                .count()
        });
        let created = self
            .created_rels
            .values()
            .filter(|(start, end)| *start == node || *end == node)
            .count();
        stored + created
    }

    fn check(&mut self, state: &GraphState, command: &Command) -> CoreResult<()> {
        match command {
            Command::CreateNode { node } => {
                if self.node_live(state, *node) {
                    return Err(CoreError::invalid_operation(format!(
                        "node {node} already exists"
                    )));
                }
                self.deleted_nodes.remove(node);
                self.created_nodes.insert(*node);
            }
            Command::DeleteNode { node } => {
                if !self.node_live(state, *node) {
                    return Err(CoreError::not_found(format!("node {node}")));
                }
                let degree = self.degree(state, *node);
                if degree > 0 {
                    return Err(CoreError::invalid_operation(format!(
                        "node {node} still has {degree} relationships"
                    )));
                }
                if !self.created_nodes.remove(node) {
                    self.deleted_nodes.insert(*node);
                }
            }
            Command::CreateRelationship { id, start, end, .. } => {
                if self.rel_live(state, *id) {
                    return Err(CoreError::invalid_operation(format!(
                        "relationship {id} already exists"
                    )));
                }
                for node in [start, end] {
                    if !self.node_live(state, *node) {
                        return Err(CoreError::not_found(format!("node {node}")));
                    }
                }
                self.created_rels.insert(*id, (*start, *end));
            }
            Command::DeleteRelationship { id } => {
                if !self.rel_live(state, *id) {
                    return Err(CoreError::not_found(format!("relationship {id}")));
                }
                if self.created_rels.remove(id).is_none() {
                    self.deleted_rels.insert(*id);
                }
            }
            Command::SetNodeProperty { node, .. } | Command::RemoveNodeProperty { node, .. } => {
                if !self.node_live(state, *node) {
                    return Err(CoreError::not_found(format!("node {node}")));
                }
            }
        }
        Ok(())
    }
}

/// Nodes with properties and typed relationships, held in memory.
///
/// Every node keeps its relationship ids in creation order, which is the
/// order [`GraphRead::relationships`] returns them in. With a
/// [`SnapshotLocation`], `force_everything` persists the whole graph plus
/// the last applied transaction, and [`GraphStore::open`] loads it back.
#[derive(Debug)]
pub struct GraphStore {
    state: RwLock<GraphState>,
    next_node: AtomicU64,
    next_relationship: AtomicU64,
    location: Option<SnapshotLocation>,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Creates an empty store that is never persisted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            next_node: AtomicU64::new(0),
            next_relationship: AtomicU64::new(0),
            location: None,
        }
    }

    /// Opens a store persisted at `location`, loading its snapshot if one
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot exists but cannot be read or parsed.
    pub fn open(location: SnapshotLocation) -> CoreResult<Self> {
        let bytes = match &location {
            SnapshotLocation::File(path) if path.exists() => Some(fs::read(path)?),
            SnapshotLocation::File(_) => None,
            SnapshotLocation::Memory(slot) => slot.bytes.lock().clone(),
        };

        let mut store = Self::new();
        if let Some(bytes) = bytes {
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            if snapshot.format > SNAPSHOT_FORMAT {
                return Err(CoreError::invalid_operation(format!(
                    "unsupported store snapshot format {}",
                    snapshot.format
                )));
            }
            store = Self::from_snapshot(snapshot);
        }
        store.location = Some(location);
        Ok(store)
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let state = GraphState {
            nodes: snapshot.nodes.into_iter().map(|n| (n.id, n)).collect(),
            relationships: snapshot
                .relationships
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            last_applied: snapshot.last_applied,
            highest_applied: snapshot.highest_applied,
        };
        debug!(
            nodes = state.nodes.len(),
            relationships = state.relationships.len(),
            last_applied = %state.last_applied,
            "loaded store snapshot"
        );
        Self {
            state: RwLock::new(state),
            next_node: AtomicU64::new(snapshot.next_node_id),
            next_relationship: AtomicU64::new(snapshot.next_relationship_id),
            location: None,
        }
    }

    /// Returns where the store is persisted, if anywhere.
    #[must_use]
    pub fn location(&self) -> Option<&SnapshotLocation> {
        self.location.as_ref()
    }

    /// Returns all node ids in ascending order.
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.state.read().nodes.keys().copied().collect()
    }

    fn bump_ids(&self, command: &Command) {
        match command {
            Command::CreateNode { node } => {
                self.next_node.fetch_max(node.as_u64() + 1, Ordering::SeqCst);
            }
            Command::CreateRelationship { id, .. } => {
                self.next_relationship
                    .fetch_max(id.as_u64() + 1, Ordering::SeqCst);
            }
            _ => {}
        }
    }

    fn apply_logged(&self, txid: TransactionId, commands: &[Command]) -> CoreResult<()> {
        let mut state = self.state.write();
        for command in commands {
            self.bump_ids(command);
            state.apply_command(command)?;
        }
        state.last_applied = txid;
        state.highest_applied = state.highest_applied.max(txid);
        Ok(())
    }

    fn write_direct(&self, command: &Command) -> CoreResult<()> {
        let mut state = self.state.write();
        Overlay::default().check(&state, command)?;
        state.apply_command(command)
    }

    fn snapshot_bytes(&self) -> CoreResult<Vec<u8>> {
        let state = self.state.read();
        let snapshot = Snapshot {
            format: SNAPSHOT_FORMAT,
            last_applied: state.last_applied,
            highest_applied: state.highest_applied,
            next_node_id: self.next_node.load(Ordering::SeqCst),
            next_relationship_id: self.next_relationship.load(Ordering::SeqCst),
            nodes: state.nodes.values().cloned().collect(),
            relationships: state.relationships.values().cloned().collect(),
        };
        Ok(serde_json::to_vec(&snapshot)?)
    }
}

impl StorageLayer for GraphStore {
    fn validate(&self, commands: &[Command]) -> CoreResult<()> {
        let state = self.state.read();
        let mut overlay = Overlay::default();
        for command in commands {
            overlay.check(&state, command)?;
        }
        Ok(())
    }

    fn apply(&self, txid: TransactionId, commands: &[Command]) -> CoreResult<()> {
        self.apply_logged(txid, commands)
    }

    fn apply_recovered_entry(&self, tx: &CommittedTransaction) -> CoreResult<()> {
        self.apply_logged(tx.txid, &tx.commands)
    }

    fn force_everything(&self) -> CoreResult<()> {
        let Some(location) = &self.location else {
            return Ok(());
        };
        let bytes = self.snapshot_bytes()?;
        match location {
            SnapshotLocation::File(path) => write_atomically(path, &bytes)?,
            SnapshotLocation::Memory(slot) => *slot.bytes.lock() = Some(bytes),
        }
        debug!(last_applied = %self.last_committed_transaction(), "forced store");
        Ok(())
    }

    fn last_committed_transaction(&self) -> TransactionId {
        self.state.read().last_applied
    }

    fn highest_committed_transaction(&self) -> TransactionId {
        self.state.read().highest_applied
    }

    fn next_node_id(&self) -> NodeId {
        NodeId::new(self.next_node.fetch_add(1, Ordering::SeqCst))
    }

    fn next_relationship_id(&self) -> RelationshipId {
        RelationshipId::new(self.next_relationship.fetch_add(1, Ordering::SeqCst))
    }
}

impl GraphRead for GraphStore {
    fn node_exists(&self, node: NodeId) -> bool {
        self.state.read().nodes.contains_key(&node)
    }

    fn node_property(&self, node: NodeId, key: &str) -> Option<PropertyValue> {
        self.state
            .read()
            .nodes
            .get(&node)
            .and_then(|record| record.properties.get(key).cloned())
    }

    fn node_properties(&self, node: NodeId) -> CoreResult<BTreeMap<String, PropertyValue>> {
        self.state
            .read()
            .nodes
            .get(&node)
            .map(|record| record.properties.clone())
            .ok_or_else(|| CoreError::not_found(format!("node {node}")))
    }

    fn relationship(&self, id: RelationshipId) -> Option<Relationship> {
        self.state.read().relationships.get(&id).cloned()
    }

    fn relationships(
        &self,
        node: NodeId,
        direction: Direction,
        types: &[RelationshipType],
    ) -> Vec<Relationship> {
        let state = self.state.read();
        let Some(record) = state.nodes.get(&node) else {
            return Vec::new();
        };
        record
            .relationships
            .iter()
            .filter_map(|id| state.relationships.get(id))
            .filter(|rel| direction.matches(rel, node))
            .filter(|rel| types.is_empty() || types.contains(&rel.rel_type))
            .cloned()
            .collect()
    }

    fn node_count(&self) -> usize {
        self.state.read().nodes.len()
    }

    fn relationship_count(&self) -> usize {
        self.state.read().relationships.len()
    }
}

impl GraphWrite for GraphStore {
    fn create_node(&self) -> CoreResult<NodeId> {
        let node = self.next_node_id();
        self.write_direct(&Command::CreateNode { node })?;
        Ok(node)
    }

    fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: RelationshipType,
    ) -> CoreResult<RelationshipId> {
        let id = self.next_relationship_id();
        self.write_direct(&Command::CreateRelationship {
            id,
            start,
            end,
            rel_type,
        })?;
        Ok(id)
    }

    fn delete_node(&self, node: NodeId) -> CoreResult<()> {
        self.write_direct(&Command::DeleteNode { node })
    }

    fn delete_relationship(&self, id: RelationshipId) -> CoreResult<()> {
        self.write_direct(&Command::DeleteRelationship { id })
    }

    fn set_node_property(&self, node: NodeId, key: &str, value: PropertyValue) -> CoreResult<()> {
        self.write_direct(&Command::SetNodeProperty {
            node,
            key: key.to_string(),
            value,
        })
    }

    fn remove_node_property(&self, node: NodeId, key: &str) -> CoreResult<()> {
        self.write_direct(&Command::RemoveNodeProperty {
            node,
            key: key.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn knows() -> RelationshipType {
        RelationshipType::new("KNOWS")
    }

    #[test]
    fn relationships_follow_direction_and_type() {
        let store = GraphStore::new();
        let a = store.create_node().unwrap();
        let b = store.create_node().unwrap();
        let out = store.create_relationship(a, b, knows()).unwrap();
        let back = store
            .create_relationship(b, a, RelationshipType::new("LIKES"))
            .unwrap();

        let ids = |rels: Vec<Relationship>| rels.into_iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(store.relationships(a, Direction::Outgoing, &[])), vec![out]);
        assert_eq!(ids(store.relationships(a, Direction::Incoming, &[])), vec![back]);
        assert_eq!(ids(store.relationships(a, Direction::Both, &[])), vec![out, back]);
        assert_eq!(ids(store.relationships(a, Direction::Both, &[knows()])), vec![out]);
    }

    #[test]
    fn self_loop_listed_once() {
        let store = GraphStore::new();
        let a = store.create_node().unwrap();
        store.create_relationship(a, a, knows()).unwrap();
        assert_eq!(store.relationships(a, Direction::Both, &[]).len(), 1);
    }

    #[test]
    fn node_with_relationships_cannot_be_deleted() {
        let store = GraphStore::new();
        let a = store.create_node().unwrap();
        let b = store.create_node().unwrap();
        let rel = store.create_relationship(a, b, knows()).unwrap();

        assert!(store.delete_node(a).is_err());
        store.delete_relationship(rel).unwrap();
        store.delete_node(a).unwrap();
        assert!(!store.node_exists(a));
        assert!(store.relationships(b, Direction::Both, &[]).is_empty());
    }

    #[test]
    fn validation_sees_earlier_commands_of_same_transaction() {
        let store = GraphStore::new();
        let a = store.next_node_id();
        let b = store.next_node_id();
        let rel = store.next_relationship_id();

        let commands = vec![
            Command::CreateNode { node: a },
            Command::CreateNode { node: b },
            Command::CreateRelationship {
                id: rel,
                start: a,
                end: b,
                rel_type: knows(),
            },
            Command::DeleteRelationship { id: rel },
            Command::DeleteNode { node: b },
        ];
        store.validate(&commands).unwrap();

        let dangling = vec![Command::CreateRelationship {
            id: rel,
            start: a,
            end: b,
            rel_type: knows(),
        }];
        assert!(matches!(
            store.validate(&dangling),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn apply_tracks_last_and_highest_transaction() {
        let store = GraphStore::new();
        store
            .apply(TransactionId::new(7), &[Command::CreateNode { node: NodeId::new(0) }])
            .unwrap();
        store
            .apply(TransactionId::new(5), &[Command::CreateNode { node: NodeId::new(1) }])
            .unwrap();
        assert_eq!(store.last_committed_transaction(), TransactionId::new(5));
        assert_eq!(store.highest_committed_transaction(), TransactionId::new(7));
    }

    #[test]
    fn recovered_ids_are_not_reused() {
        let store = GraphStore::new();
        store
            .apply_recovered_entry(&CommittedTransaction {
                txid: TransactionId::new(1),
                timestamp: 0,
                commands: vec![Command::CreateNode { node: NodeId::new(41) }],
            })
            .unwrap();
        assert_eq!(store.next_node_id(), NodeId::new(42));
    }

    #[test]
    fn file_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let (a, b) = {
            let store = GraphStore::open(SnapshotLocation::File(path.clone())).unwrap();
            let a = store.create_node().unwrap();
            let b = store.create_node().unwrap();
            store.create_relationship(a, b, knows()).unwrap();
            store.set_node_property(a, "name", "Ada".into()).unwrap();
            store.force_everything().unwrap();
            (a, b)
        };

        let store = GraphStore::open(SnapshotLocation::File(path)).unwrap();
        assert_eq!(store.node_count(), 2);
        assert_eq!(
            store.node_property(a, "name"),
            Some(PropertyValue::Text("Ada".into()))
        );
        assert_eq!(store.relationships(b, Direction::Incoming, &[]).len(), 1);
        assert_eq!(store.next_node_id(), NodeId::new(2));
    }

    #[test]
    fn memory_snapshot_is_shared() {
        let slot = MemorySnapshot::new();
        let store = GraphStore::open(SnapshotLocation::Memory(slot.clone())).unwrap();
        store.create_node().unwrap();
        assert!(slot.is_empty());
        store.force_everything().unwrap();
        assert!(!slot.is_empty());

        let reopened = GraphStore::open(SnapshotLocation::Memory(slot)).unwrap();
        assert_eq!(reopened.node_count(), 1);
    }
}
