//! Log entry types and serialization.

use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::types::{NodeId, PropertyValue, RelationshipId, RelationshipType, TransactionId};

/// Magic bytes identifying a log entry.
pub const ENTRY_MAGIC: [u8; 4] = *b"TENT";

/// Current entry format version.
pub const ENTRY_FORMAT: u16 = 1;

/// magic (4) + format (2) + type (1) + length (4)
pub(crate) const ENTRY_HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Type byte of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogEntryType {
    /// Transaction start.
    Start = 1,
    /// One command of a transaction.
    Command = 2,
    /// Transaction commit.
    Commit = 3,
    /// Everything up to here is reflected in the forced store.
    Checkpoint = 4,
}

impl LogEntryType {
    /// Converts a byte to an entry type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Start),
            2 => Some(Self::Command),
            3 => Some(Self::Commit),
            4 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the entry type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Command {
    /// Create a node.
    CreateNode {
        /// New node id.
        node: NodeId,
    },
    /// Delete a node without relationships.
    DeleteNode {
        /// Node to delete.
        node: NodeId,
    },
    /// Create a relationship between two existing nodes.
    CreateRelationship {
        /// New relationship id.
        id: RelationshipId,
        /// Start node.
        start: NodeId,
        /// End node.
        end: NodeId,
        /// Relationship type.
        rel_type: RelationshipType,
    },
    /// Delete a relationship.
    DeleteRelationship {
        /// Relationship to delete.
        id: RelationshipId,
    },
    /// Set a node property.
    SetNodeProperty {
        /// Target node.
        node: NodeId,
        /// Property key.
        key: String,
        /// New value.
        value: PropertyValue,
    },
    /// Remove a node property.
    RemoveNodeProperty {
        /// Target node.
        node: NodeId,
        /// Property key.
        key: String,
    },
}

impl Command {
    fn tag(&self) -> u8 {
        match self {
            Self::CreateNode { .. } => 1,
            Self::DeleteNode { .. } => 2,
            Self::CreateRelationship { .. } => 3,
            Self::DeleteRelationship { .. } => 4,
            Self::SetNodeProperty { .. } => 5,
            Self::RemoveNodeProperty { .. } => 6,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) -> CoreResult<()> {
        buf.push(self.tag());
        match self {
            Self::CreateNode { node } | Self::DeleteNode { node } => {
                buf.extend_from_slice(&node.as_u64().to_le_bytes());
            }
            Self::CreateRelationship {
                id,
                start,
                end,
                rel_type,
            } => {
                buf.extend_from_slice(&id.as_u64().to_le_bytes());
                buf.extend_from_slice(&start.as_u64().to_le_bytes());
                buf.extend_from_slice(&end.as_u64().to_le_bytes());
                put_str(buf, rel_type.name())?;
            }
            Self::DeleteRelationship { id } => {
                buf.extend_from_slice(&id.as_u64().to_le_bytes());
            }
            Self::SetNodeProperty { node, key, value } => {
                buf.extend_from_slice(&node.as_u64().to_le_bytes());
                put_str(buf, key)?;
                match value {
                    PropertyValue::Bool(b) => {
                        buf.push(0);
                        buf.push(u8::from(*b));
                    }
                    PropertyValue::Int(i) => {
                        buf.push(1);
                        buf.extend_from_slice(&i.to_le_bytes());
                    }
                    PropertyValue::Text(s) => {
                        buf.push(2);
                        put_str(buf, s)?;
                    }
                }
            }
            Self::RemoveNodeProperty { node, key } => {
                buf.extend_from_slice(&node.as_u64().to_le_bytes());
                put_str(buf, key)?;
            }
        }
        Ok(())
    }

    fn decode_from(reader: &mut PayloadReader<'_>) -> CoreResult<Self> {
        let tag = reader.u8()?;
        let command = match tag {
            1 => Self::CreateNode {
                node: NodeId::new(reader.u64()?),
            },
            2 => Self::DeleteNode {
                node: NodeId::new(reader.u64()?),
            },
            3 => Self::CreateRelationship {
                id: RelationshipId::new(reader.u64()?),
                start: NodeId::new(reader.u64()?),
                end: NodeId::new(reader.u64()?),
                rel_type: RelationshipType::new(reader.string()?),
            },
            4 => Self::DeleteRelationship {
                id: RelationshipId::new(reader.u64()?),
            },
            5 => {
                let node = NodeId::new(reader.u64()?);
                let key = reader.string()?;
                let value = match reader.u8()? {
                    0 => PropertyValue::Bool(reader.u8()? != 0),
                    1 => PropertyValue::Int(reader.u64()? as i64),
                    2 => PropertyValue::Text(reader.string()?),
                    other => {
                        return Err(CoreError::log_corruption(format!(
                            "unknown property value tag {other}"
                        )))
                    }
                };
                Self::SetNodeProperty { node, key, value }
            }
            6 => Self::RemoveNodeProperty {
                node: NodeId::new(reader.u64()?),
                key: reader.string()?,
            },
            other => {
                return Err(CoreError::log_corruption(format!(
                    "unknown command tag {other}"
                )))
            }
        };
        Ok(command)
    }
}

/// A log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LogEntry {
    /// A transaction started committing.
    Start {
        /// Transaction ID.
        txid: TransactionId,
        /// Commit start time in milliseconds since the epoch.
        timestamp: u64,
    },
    /// One command of a transaction.
    Command {
        /// Transaction ID.
        txid: TransactionId,
        /// The mutation.
        command: Command,
    },
    /// The transaction is committed once this entry is durable.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Commit time in milliseconds since the epoch.
        timestamp: u64,
    },
    /// The store reflects every transaction up to `last_txid`.
    Checkpoint {
        /// Last transaction applied to the forced store.
        last_txid: TransactionId,
    },
}

impl LogEntry {
    /// Returns the entry type.
    #[must_use]
    pub fn entry_type(&self) -> LogEntryType {
        match self {
            Self::Start { .. } => LogEntryType::Start,
            Self::Command { .. } => LogEntryType::Command,
            Self::Commit { .. } => LogEntryType::Commit,
            Self::Checkpoint { .. } => LogEntryType::Checkpoint,
        }
    }

    /// Returns the transaction ID if this entry belongs to one.
    #[must_use]
    pub fn txid(&self) -> Option<TransactionId> {
        match self {
            Self::Start { txid, .. } | Self::Command { txid, .. } | Self::Commit { txid, .. } => {
                Some(*txid)
            }
            Self::Checkpoint { .. } => None,
        }
    }

    /// Serializes the entry payload (without envelope).
    ///
    /// # Errors
    ///
    /// Returns an error if a string in a command is longer than `u32::MAX`.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            Self::Start { txid, timestamp } | Self::Commit { txid, timestamp } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                buf.extend_from_slice(&timestamp.to_le_bytes());
            }
            Self::Command { txid, command } => {
                buf.extend_from_slice(&txid.as_u64().to_le_bytes());
                command.encode_into(&mut buf)?;
            }
            Self::Checkpoint { last_txid } => {
                buf.extend_from_slice(&last_txid.as_u64().to_le_bytes());
            }
        }
        Ok(buf)
    }

    /// Deserializes an entry from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` for short payloads, trailing bytes or unknown
    /// command tags.
    pub fn decode_payload(entry_type: LogEntryType, payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);
        let entry = match entry_type {
            LogEntryType::Start => Self::Start {
                txid: TransactionId::new(reader.u64()?),
                timestamp: reader.u64()?,
            },
            LogEntryType::Command => Self::Command {
                txid: TransactionId::new(reader.u64()?),
                command: Command::decode_from(&mut reader)?,
            },
            LogEntryType::Commit => Self::Commit {
                txid: TransactionId::new(reader.u64()?),
                timestamp: reader.u64()?,
            },
            LogEntryType::Checkpoint => Self::Checkpoint {
                last_txid: TransactionId::new(reader.u64()?),
            },
        };
        reader.finish(entry_type)?;
        Ok(entry)
    }

    /// Encodes the entry with its envelope:
    /// `| magic (4) | format (2) | type (1) | length (4) | payload (N) | crc32 (4) |`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or is too large.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("log entry payload too large"))?;

        let mut data = Vec::with_capacity(ENTRY_HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&ENTRY_MAGIC);
        data.extend_from_slice(&ENTRY_FORMAT.to_le_bytes());
        data.push(self.entry_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// A transaction whose `Commit` entry was found in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTransaction {
    /// Transaction ID.
    pub txid: TransactionId,
    /// Commit time in milliseconds since the epoch.
    pub timestamp: u64,
    /// Commands in log order.
    pub commands: Vec<Command>,
}

/// Computes the CRC32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> CoreResult<()> {
    let len = u32::try_from(s.len())
        .map_err(|_| CoreError::invalid_operation("string too long for log entry"))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

struct PayloadReader<'a> {
    payload: &'a [u8],
    cursor: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(payload: &'a [u8]) -> Self {
        Self { payload, cursor: 0 }
    }

    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let end = self
            .cursor
            .checked_add(n)
            .filter(|&end| end <= self.payload.len())
            .ok_or_else(|| CoreError::log_corruption("unexpected end of payload"))?;
        let bytes = &self.payload[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> CoreResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> CoreResult<u64> {
        let bytes: [u8; 8] = self
            .take(8)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid u64"))?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn string(&mut self) -> CoreResult<String> {
        let len_bytes: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| CoreError::log_corruption("invalid string length"))?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CoreError::log_corruption("string is not valid UTF-8"))
    }

    fn finish(&self, entry_type: LogEntryType) -> CoreResult<()> {
        if self.cursor != self.payload.len() {
            return Err(CoreError::log_corruption(format!(
                "trailing bytes in {entry_type:?} entry: expected {} bytes, got {}",
                self.cursor,
                self.payload.len()
            )));
        }
        Ok(())
    }
}
