//! Core type definitions for Trellis.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused; after
/// recovery they resume above the highest id found in the log or store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The id recorded before any transaction has committed.
    pub const NONE: Self = Self(0);

    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following transaction ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

/// Identifier of a graph node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Creates a new node ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.0)
    }
}

/// Identifier of a graph relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipId(pub u64);

impl RelationshipId {
    /// Creates a new relationship ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// Name of a relationship type, e.g. `KNOWS`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationshipType(String);

impl RelationshipType {
    /// Creates a relationship type from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RelationshipType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A relationship as seen by readers and traversals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    /// Relationship id.
    pub id: RelationshipId,
    /// Node the relationship points away from.
    pub start: NodeId,
    /// Node the relationship points to.
    pub end: NodeId,
    /// Relationship type.
    pub rel_type: RelationshipType,
}

impl Relationship {
    /// Returns the node at the other end from `node`.
    ///
    /// For a self-loop both ends are `node`.
    #[must_use]
    pub fn other_node(&self, node: NodeId) -> NodeId {
        if self.start == node {
            self.end
        } else {
            self.start
        }
    }
}

/// Which relationships of a node to follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Relationships starting at the node.
    Outgoing,
    /// Relationships ending at the node.
    Incoming,
    /// Both.
    #[default]
    Both,
}

impl Direction {
    /// Returns the opposite direction; `Both` stays `Both`.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Outgoing => Self::Incoming,
            Self::Incoming => Self::Outgoing,
            Self::Both => Self::Both,
        }
    }

    /// Returns `true` if `rel` is followed from `node` in this direction.
    #[must_use]
    pub fn matches(self, rel: &Relationship, node: NodeId) -> bool {
        match self {
            Self::Outgoing => rel.start == node,
            Self::Incoming => rel.end == node,
            Self::Both => rel.start == node || rel.end == node,
        }
    }
}

/// A property value stored on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyValue {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// UTF-8 string.
    Text(String),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Version number of a write-ahead log segment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct LogVersion(pub u64);

impl LogVersion {
    /// Creates a new log version.
    #[must_use]
    pub const fn new(version: u64) -> Self {
        Self(version)
    }

    /// Returns the raw version value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the version of the segment that follows this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LogVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A byte position inside a specific log segment.
///
/// Log readers report their position so a scan can be restarted exactly
/// where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogPosition {
    /// Segment version.
    pub version: LogVersion,
    /// Byte offset within the segment.
    pub offset: u64,
}

impl LogPosition {
    /// Creates a log position.
    #[must_use]
    pub const fn new(version: LogVersion, offset: u64) -> Self {
        Self { version, offset }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.version, self.offset)
    }
}
