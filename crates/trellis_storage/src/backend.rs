//! Storage backend trait definition.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Log segments and store snapshots are written through this trait. The
/// backend hands out stable offsets: bytes appended at an offset read back
/// unchanged until a `truncate` cuts below it.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at, which equals the
///   `size()` observed just before the call
/// - `flush` pushes buffered bytes to the OS; `sync` additionally makes them
///   (and the length) survive power loss
/// - `truncate` may only shrink the store
pub trait StorageBackend: Send + Sync {
    /// Reads exactly `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] when the range is not
    /// fully inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails or the backend is read-only.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Makes all appended bytes and the current length durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Shrinks the store to `new_size` bytes.
    ///
    /// Used to cut torn records off the tail of a log segment during
    /// recovery.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::TruncateBeyondEnd`] if `new_size` is
    /// larger than the current size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads everything from `offset` to the current end.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is past the end or the read fails.
    fn read_from(&self, offset: u64) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = size.saturating_sub(offset) as usize;
        self.read_at(offset, len)
    }

    /// Returns `true` if nothing has been appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.size()? == 0)
    }
}
