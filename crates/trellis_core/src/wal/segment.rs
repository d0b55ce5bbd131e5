//! Log segments and where they live.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trellis_storage::{FileBackend, InMemoryBackend, StorageBackend};

use crate::error::{CoreError, CoreResult};
use crate::types::{LogVersion, TransactionId};
use crate::wal::record::compute_crc32;

/// Magic bytes at the start of every segment.
pub const SEGMENT_MAGIC: [u8; 4] = *b"TLOG";

/// Current segment header format.
pub const SEGMENT_FORMAT: u16 = 1;

/// magic (4) + format (2) + version (8) + last txid (8) + crc32 (4)
pub const SEGMENT_HEADER_SIZE: u64 = 26;

/// Prefix of segment file names; the version is appended.
pub const SEGMENT_FILE_PREFIX: &str = "trellis.log.";

/// Header written when a segment is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Version of this segment.
    pub version: LogVersion,
    /// Last transaction committed before the segment was created.
    pub last_committed: TransactionId,
}

impl SegmentHeader {
    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SEGMENT_HEADER_SIZE as usize);
        buf.extend_from_slice(&SEGMENT_MAGIC);
        buf.extend_from_slice(&SEGMENT_FORMAT.to_le_bytes());
        buf.extend_from_slice(&self.version.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.last_committed.as_u64().to_le_bytes());
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and validates a header.
    ///
    /// # Errors
    ///
    /// Returns an error on a short buffer, bad magic, unsupported format or
    /// checksum mismatch.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() < SEGMENT_HEADER_SIZE as usize {
            return Err(CoreError::log_corruption("segment header truncated"));
        }
        if bytes[0..4] != SEGMENT_MAGIC {
            return Err(CoreError::log_corruption("invalid segment magic"));
        }
        let format = u16::from_le_bytes([bytes[4], bytes[5]]);
        if format > SEGMENT_FORMAT {
            return Err(CoreError::log_corruption(format!(
                "unsupported segment format {format}"
            )));
        }
        let stored = u32::from_le_bytes([bytes[22], bytes[23], bytes[24], bytes[25]]);
        let computed = compute_crc32(&bytes[..22]);
        if stored != computed {
            return Err(CoreError::ChecksumMismatch {
                expected: stored,
                actual: computed,
            });
        }

        let mut version = [0u8; 8];
        version.copy_from_slice(&bytes[6..14]);
        let mut last = [0u8; 8];
        last.copy_from_slice(&bytes[14..22]);
        Ok(Self {
            version: LogVersion::new(u64::from_le_bytes(version)),
            last_committed: TransactionId::new(u64::from_le_bytes(last)),
        })
    }

    /// Reads the header of a segment backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment is shorter than a header or the
    /// header is invalid.
    pub fn read_from(backend: &dyn StorageBackend) -> CoreResult<Self> {
        let bytes = backend.read_at(0, SEGMENT_HEADER_SIZE as usize)?;
        Self::decode(&bytes)
    }
}

/// Opens log segments by version.
pub trait SegmentStore: Send + Sync {
    /// Lists existing segment versions in ascending order.
    fn versions(&self) -> CoreResult<Vec<LogVersion>>;

    /// Opens a segment for appending, creating it if missing.
    fn open_writer(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>>;

    /// Opens an existing segment for reading.
    ///
    /// The reader must observe data appended through a writer after it was
    /// opened.
    fn open_reader(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>>;

    /// Human-readable location of a segment, for diagnostics.
    fn describe(&self, version: LogVersion) -> String;

    /// Returns the latest version, if any segment exists.
    fn latest_version(&self) -> CoreResult<Option<LogVersion>> {
        Ok(self.versions()?.last().copied())
    }
}

/// Segments stored as `trellis.log.<version>` files in a directory.
#[derive(Debug, Clone)]
pub struct DirectorySegments {
    dir: PathBuf,
}

impl DirectorySegments {
    /// Uses `dir` for segment files. The directory must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the directory holding the segments.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path of a segment file.
    #[must_use]
    pub fn segment_path(&self, version: LogVersion) -> PathBuf {
        self.dir
            .join(format!("{SEGMENT_FILE_PREFIX}{}", version.as_u64()))
    }
}

impl SegmentStore for DirectorySegments {
    fn versions(&self) -> CoreResult<Vec<LogVersion>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(version) = name
                .strip_prefix(SEGMENT_FILE_PREFIX)
                .and_then(|v| v.parse::<u64>().ok())
            {
                versions.push(LogVersion::new(version));
            }
        }
        versions.sort();
        Ok(versions)
    }

    fn open_writer(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>> {
        Ok(Box::new(FileBackend::open(&self.segment_path(version))?))
    }

    fn open_reader(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>> {
        let path = self.segment_path(version);
        if !path.exists() {
            return Err(CoreError::not_found(format!("log segment {}", path.display())));
        }
        Ok(Box::new(FileBackend::open_read_only(&path)?))
    }

    fn describe(&self, version: LogVersion) -> String {
        self.segment_path(version).display().to_string()
    }
}

/// Segments held in memory.
///
/// Clones share the same segments, so a test can drop a database and open a
/// new one over the same log.
#[derive(Debug, Clone, Default)]
pub struct MemorySegments {
    segments: Arc<Mutex<BTreeMap<LogVersion, InMemoryBackend>>>,
}

impl MemorySegments {
    /// Creates an empty segment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle onto the bytes of a segment.
    #[must_use]
    pub fn segment(&self, version: LogVersion) -> Option<InMemoryBackend> {
        self.segments.lock().get(&version).cloned()
    }
}

impl SegmentStore for MemorySegments {
    fn versions(&self) -> CoreResult<Vec<LogVersion>> {
        Ok(self.segments.lock().keys().copied().collect())
    }

    fn open_writer(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>> {
        let backend = self.segments.lock().entry(version).or_default().clone();
        Ok(Box::new(backend))
    }

    fn open_reader(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>> {
        match self.segment(version) {
            Some(backend) => Ok(Box::new(backend)),
            None => Err(CoreError::not_found(format!("log segment {version}"))),
        }
    }

    fn describe(&self, version: LogVersion) -> String {
        format!("memory:{version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn header_roundtrip_and_checksum() {
        let header = SegmentHeader {
            version: LogVersion::new(3),
            last_committed: TransactionId::new(41),
        };
        let mut bytes = header.encode();
        assert_eq!(bytes.len() as u64, SEGMENT_HEADER_SIZE);
        assert_eq!(SegmentHeader::decode(&bytes).unwrap(), header);

        bytes[10] ^= 0xFF;
        assert!(matches!(
            SegmentHeader::decode(&bytes),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = SegmentHeader {
            version: LogVersion::new(0),
            last_committed: TransactionId::NONE,
        }
        .encode();
        bytes[0] = b'X';
        assert!(matches!(
            SegmentHeader::decode(&bytes),
            Err(CoreError::LogCorruption { .. })
        ));
    }

    #[test]
    fn directory_lists_versions_in_order() {
        let dir = tempdir().unwrap();
        let segments = DirectorySegments::new(dir.path());
        for v in [2, 0, 10] {
            segments.open_writer(LogVersion::new(v)).unwrap();
        }
        fs::write(dir.path().join("store.json"), b"{}").unwrap();
        fs::write(dir.path().join("trellis.log.bogus"), b"").unwrap();

        assert_eq!(
            segments.versions().unwrap(),
            vec![LogVersion::new(0), LogVersion::new(2), LogVersion::new(10)]
        );
        assert_eq!(segments.latest_version().unwrap(), Some(LogVersion::new(10)));
    }

    #[test]
    fn directory_reader_requires_existing_segment() {
        let dir = tempdir().unwrap();
        let segments = DirectorySegments::new(dir.path());
        assert!(matches!(
            segments.open_reader(LogVersion::new(7)),
            Err(CoreError::NotFound { .. })
        ));
    }

    #[test]
    fn memory_readers_follow_writer() {
        let segments = MemorySegments::new();
        let mut writer = segments.open_writer(LogVersion::new(0)).unwrap();
        let reader = segments.open_reader(LogVersion::new(0)).unwrap();
        writer.append(b"abc").unwrap();
        assert_eq!(reader.size().unwrap(), 3);

        let restarted = segments.clone();
        assert_eq!(restarted.versions().unwrap(), vec![LogVersion::new(0)]);
    }
}
