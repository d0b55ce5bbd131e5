//! In-memory storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// An in-memory storage backend.
///
/// The bytes live behind an `Arc`, so cloning a backend yields a second
/// handle onto the *same* data. Tests use this to simulate a restart: keep a
/// clone of every log segment, drop the database, and open a new one over
/// the clones.
///
/// # Example
///
/// ```rust
/// use trellis_storage::{InMemoryBackend, StorageBackend};
///
/// let mut writer = InMemoryBackend::new();
/// let reader = writer.clone();
/// writer.append(b"abc").unwrap();
/// assert_eq!(reader.size().unwrap(), 3);
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of all bytes currently stored.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Overwrites a single byte in place.
    ///
    /// Only useful for corrupting a segment on purpose in tests.
    pub fn corrupt_byte(&self, offset: usize, value: u8) {
        if let Some(byte) = self.data.write().get_mut(offset) {
            *byte = value;
        }
    }

    /// Returns `true` if both handles share the same bytes.
    #[must_use]
    pub fn shares_data_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn append_returns_previous_size() {
        let mut backend = InMemoryBackend::new();
        assert_eq!(backend.append(b"hello").unwrap(), 0);
        assert_eq!(backend.append(b" world").unwrap(), 5);
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn clones_share_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.clone();
        writer.append(b"shared").unwrap();

        assert!(reader.shares_data_with(&writer));
        assert_eq!(reader.read_at(0, 6).unwrap(), b"shared");
    }

    #[test]
    fn read_past_end_fails() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"hello").unwrap();

        assert!(matches!(
            backend.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            backend.read_at(10, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn read_from_returns_tail() {
        let backend = InMemoryBackend::with_data(b"header|body".to_vec());
        assert_eq!(backend.read_from(7).unwrap(), b"body");
        assert!(backend.read_from(11).unwrap().is_empty());
    }

    #[test]
    fn truncate_shrinks_but_never_grows() {
        let mut backend = InMemoryBackend::with_data(b"hello world".to_vec());
        backend.truncate(5).unwrap();
        assert_eq!(backend.data(), b"hello");

        assert!(matches!(
            backend.truncate(100),
            Err(StorageError::TruncateBeyondEnd { requested: 100, size: 5 })
        ));
    }

    #[test]
    fn corrupt_byte_flips_in_place() {
        let backend = InMemoryBackend::with_data(vec![0, 0, 0]);
        backend.corrupt_byte(1, 0xFF);
        backend.corrupt_byte(99, 0xFF);
        assert_eq!(backend.data(), vec![0, 0xFF, 0]);
    }

    proptest! {
        #[test]
        fn appended_chunks_read_back(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..16)) {
            let mut backend = InMemoryBackend::new();
            let mut offsets = Vec::new();
            for chunk in &chunks {
                offsets.push(backend.append(chunk).unwrap());
            }
            for (chunk, offset) in chunks.iter().zip(offsets) {
                prop_assert_eq!(&backend.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
