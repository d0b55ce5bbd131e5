//! Write-ahead log for durability and crash recovery.
//!
//! Every committed transaction is appended to the log and forced before it
//! is applied to the store. The log is a sequence of segments numbered by
//! [`LogVersion`](crate::LogVersion); only the newest segment is written,
//! and rotation closes it and starts the next one.
//!
//! ## Segment Format
//!
//! ```text
//! | magic "TLOG" (4) | format (2) | version (8) | last txid (8) | crc32 (4) |
//! | entry | entry | ...
//! ```
//!
//! ## Entry Format
//!
//! ```text
//! | magic (4) | format (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! A transaction is written as `Start`, one `Command` per mutation, then
//! `Commit`, all in one append. `Checkpoint` entries mark the point up to
//! which the store has been forced.
//!
//! ## Recovery Policy
//!
//! Tolerated (clean end of log):
//!
//! - **Truncated header**: fewer than 11 bytes left at the tail
//! - **Truncated payload**: entry length exceeds the bytes left
//!
//! Fatal (the database must not open):
//!
//! - **CRC mismatch**
//! - **Invalid magic bytes**
//! - **Unknown entry type** or unsupported format

mod file;
mod iterator;
mod record;
mod segment;

pub use file::{open_reader, LogFile, LogSection};
pub use iterator::LogEntryIterator;
pub use record::{compute_crc32, Command, CommittedTransaction, LogEntry, LogEntryType};
pub use segment::{
    DirectorySegments, MemorySegments, SegmentHeader, SegmentStore, SEGMENT_FILE_PREFIX,
    SEGMENT_HEADER_SIZE,
};
