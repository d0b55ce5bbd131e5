//! Entity locking.
//!
//! Transactions lock the nodes and relationships they touch through a
//! [`LockManager`]. Locks are re-entrant per transaction, and a shared lock
//! can be upgraded to exclusive when its holder is the only sharer. A lock
//! request that would close a cycle of waiting transactions fails with
//! [`CoreError::Deadlock`](crate::CoreError::Deadlock) instead of blocking.

mod manager;

pub use manager::LocalLockManager;

use std::fmt;

use crate::error::CoreResult;
use crate::types::{NodeId, RelationshipId, TransactionId};

/// Something that can be locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// A node.
    Node(NodeId),
    /// A relationship.
    Relationship(RelationshipId),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Relationship(id) => write!(f, "relationship {id}"),
        }
    }
}

impl From<NodeId> for ResourceId {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

impl From<RelationshipId> for ResourceId {
    fn from(id: RelationshipId) -> Self {
        Self::Relationship(id)
    }
}

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Read lock; compatible with other shared locks.
    Shared,
    /// Write lock; compatible with nothing held by other transactions.
    Exclusive,
}

/// Acquires and releases entity locks on behalf of transactions.
pub trait LockManager: Send + Sync {
    /// Blocks until `tx` holds `resource` in `mode`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Deadlock` if waiting would deadlock.
    fn acquire(&self, tx: TransactionId, resource: ResourceId, mode: LockMode) -> CoreResult<()>;

    /// Releases one acquisition of `resource` in `mode`.
    fn release(&self, tx: TransactionId, resource: ResourceId, mode: LockMode);

    /// Releases every lock held by `tx`.
    fn release_all(&self, tx: TransactionId);
}
