//! Streaming log entry iterator.
//!
//! Reads one segment entry by entry through a read buffer, so memory stays
//! bounded regardless of segment size. Every entry is reported with the
//! [`LogPosition`] it starts at; a scan can be restarted from any reported
//! position (or from [`LogEntryIterator::position`], the end of the last
//! entry returned).

use trellis_storage::StorageBackend;

use crate::error::{CoreError, CoreResult};
use crate::types::{LogPosition, LogVersion};
use crate::wal::record::{
    compute_crc32, LogEntry, LogEntryType, CRC_SIZE, ENTRY_FORMAT, ENTRY_HEADER_SIZE, ENTRY_MAGIC,
};
use crate::wal::segment::{SegmentHeader, SEGMENT_HEADER_SIZE};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A lazy iterator over the entries of one log segment.
///
/// # Error Handling
///
/// - A truncated entry header or payload at the tail ends the iteration
///   cleanly; [`torn_bytes`](Self::torn_bytes) reports how much was left.
/// - CRC mismatches, bad magic and unknown entry types yield an error and
///   end the iteration.
pub struct LogEntryIterator {
    backend: Box<dyn StorageBackend>,
    header: SegmentHeader,
    total_size: u64,
    offset: u64,
    buffer: Vec<u8>,
    buffer_start: u64,
    finished: bool,
}

impl std::fmt::Debug for LogEntryIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEntryIterator")
            .field("version", &self.header.version)
            .field("offset", &self.offset)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

impl LogEntryIterator {
    /// Opens an iterator over `backend`, starting at `offset`.
    ///
    /// Offsets inside the segment header are moved to the first entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment header is missing or invalid, or
    /// belongs to a different version.
    pub fn open(backend: Box<dyn StorageBackend>, version: LogVersion, offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        if total_size < SEGMENT_HEADER_SIZE {
            return Err(CoreError::log_corruption(format!(
                "segment {version} is shorter than its header"
            )));
        }
        let header = SegmentHeader::read_from(backend.as_ref())?;
        if header.version != version {
            return Err(CoreError::log_corruption(format!(
                "segment {version} carries header for {}",
                header.version
            )));
        }

        let offset = offset.max(SEGMENT_HEADER_SIZE);
        Ok(Self {
            backend,
            header,
            total_size,
            offset,
            buffer: Vec::new(),
            buffer_start: offset,
            finished: false,
        })
    }

    /// Returns the segment header.
    #[must_use]
    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Returns the position just past the last entry returned.
    #[must_use]
    pub fn position(&self) -> LogPosition {
        LogPosition::new(self.header.version, self.offset)
    }

    /// Bytes after the last complete entry that did not form an entry.
    ///
    /// Only meaningful once the iterator is exhausted.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    /// Returns `len` bytes starting at the current offset, or `None` if the
    /// segment ends first.
    fn peek(&mut self, len: usize) -> CoreResult<Option<&[u8]>> {
        if self.offset + len as u64 > self.total_size {
            return Ok(None);
        }

        // offset never moves backwards, so it is always at or past buffer_start
        let buffered_from = (self.offset - self.buffer_start) as usize;
        if buffered_from + len > self.buffer.len() {
            let remaining = (self.total_size - self.offset) as usize;
            let want = remaining.min(len.max(READ_BUFFER_SIZE));
            self.buffer = self.backend.read_at(self.offset, want)?;
            self.buffer_start = self.offset;
        }

        let from = (self.offset - self.buffer_start) as usize;
        Ok(Some(&self.buffer[from..from + len]))
    }

    fn read_next(&mut self) -> CoreResult<Option<(LogPosition, LogEntry)>> {
        let start = self.offset;

        let Some(header) = self.peek(ENTRY_HEADER_SIZE)? else {
            return Ok(None);
        };
        if header[0..4] != ENTRY_MAGIC {
            return Err(CoreError::log_corruption(format!(
                "invalid entry magic at offset {start}"
            )));
        }
        let format = u16::from_le_bytes([header[4], header[5]]);
        if format > ENTRY_FORMAT {
            return Err(CoreError::log_corruption(format!(
                "unsupported entry format {format} at offset {start}"
            )));
        }
        let type_byte = header[6];
        let entry_type = LogEntryType::from_byte(type_byte).ok_or_else(|| {
            CoreError::log_corruption(format!("unknown entry type {type_byte} at offset {start}"))
        })?;
        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;

        let total_len = ENTRY_HEADER_SIZE + payload_len + CRC_SIZE;
        let Some(bytes) = self.peek(total_len)? else {
            return Ok(None);
        };

        let crc_at = ENTRY_HEADER_SIZE + payload_len;
        let stored = u32::from_le_bytes([
            bytes[crc_at],
            bytes[crc_at + 1],
            bytes[crc_at + 2],
            bytes[crc_at + 3],
        ]);
        let computed = compute_crc32(&bytes[..crc_at]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let entry = LogEntry::decode_payload(entry_type, &bytes[ENTRY_HEADER_SIZE..crc_at])?;
        self.offset += total_len as u64;
        Ok(Some((LogPosition::new(self.header.version, start), entry)))
    }
}

impl Iterator for LogEntryIterator {
    type Item = CoreResult<(LogPosition, LogEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;
    use trellis_storage::InMemoryBackend;

    fn segment_with(entries: &[LogEntry]) -> InMemoryBackend {
        let mut backend = InMemoryBackend::new();
        let header = SegmentHeader {
            version: LogVersion::new(0),
            last_committed: TransactionId::NONE,
        };
        backend.append(&header.encode()).unwrap();
        for entry in entries {
            backend.append(&entry.encode().unwrap()).unwrap();
        }
        backend
    }

    fn start(txid: u64) -> LogEntry {
        LogEntry::Start {
            txid: TransactionId::new(txid),
            timestamp: 100 + txid,
        }
    }

    fn iter(backend: &InMemoryBackend, offset: u64) -> LogEntryIterator {
        LogEntryIterator::open(Box::new(backend.clone()), LogVersion::new(0), offset).unwrap()
    }

    #[test]
    fn reads_entries_with_positions() {
        let backend = segment_with(&[start(1), start(2)]);
        let items: Vec<_> = iter(&backend, 0).map(Result::unwrap).collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0.offset, SEGMENT_HEADER_SIZE);
        assert_eq!(items[1].1, start(2));
    }

    #[test]
    fn restarts_from_reported_position() {
        let backend = segment_with(&[start(1), start(2), start(3)]);
        let second = iter(&backend, 0).nth(1).unwrap().unwrap().0;

        let rest: Vec<_> = iter(&backend, second.offset).map(Result::unwrap).collect();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].1, start(2));
    }

    #[test]
    fn truncated_tail_is_clean_end() {
        let backend = segment_with(&[start(1), start(2)]);
        let full = backend.size().unwrap();
        let mut shortened = backend.clone();
        shortened.truncate(full - 3).unwrap();

        let mut it = iter(&backend, 0);
        assert_eq!(it.next().unwrap().unwrap().1, start(1));
        assert!(it.next().is_none());
        assert_eq!(it.torn_bytes(), full - 3 - it.position().offset);
        assert!(it.torn_bytes() > 0);
    }

    #[test]
    fn crc_mismatch_is_fatal() {
        let backend = segment_with(&[start(1)]);
        backend.corrupt_byte(SEGMENT_HEADER_SIZE as usize + 12, 0xEE);

        let mut it = iter(&backend, 0);
        assert!(matches!(
            it.next(),
            Some(Err(CoreError::ChecksumMismatch { .. }))
        ));
        assert!(it.next().is_none());
    }

    #[test]
    fn bad_magic_is_fatal() {
        let backend = segment_with(&[start(1)]);
        backend.corrupt_byte(SEGMENT_HEADER_SIZE as usize, b'X');
        assert!(matches!(
            iter(&backend, 0).next(),
            Some(Err(CoreError::LogCorruption { .. }))
        ));
    }

    #[test]
    fn wrong_version_header_is_rejected() {
        let backend = segment_with(&[]);
        assert!(LogEntryIterator::open(Box::new(backend), LogVersion::new(5), 0).is_err());
    }

    #[test]
    fn large_entries_span_buffer_refills() {
        let entries: Vec<LogEntry> = (0..3)
            .map(|i| LogEntry::Command {
                txid: TransactionId::new(1),
                command: crate::wal::Command::SetNodeProperty {
                    node: crate::types::NodeId::new(i),
                    key: "blob".into(),
                    value: crate::types::PropertyValue::Text("x".repeat(READ_BUFFER_SIZE)),
                },
            })
            .collect();
        let backend = segment_with(&entries);
        let read: Vec<_> = iter(&backend, 0).map(|r| r.unwrap().1).collect();
        assert_eq!(read, entries);
    }
}
