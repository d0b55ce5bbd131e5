//! Storage backend errors.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by storage backends.
///
/// Backends only know bytes; the log layer above turns short reads at the
/// tail of a segment into a clean end of log.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] io::Error),

    /// A read asked for bytes the store does not hold.
    #[error("read of {len} bytes at offset {offset} runs past the end of storage ({size} bytes)")]
    ReadPastEnd {
        /// First byte requested.
        offset: u64,
        /// Number of bytes requested.
        len: usize,
        /// Bytes held when the read was attempted.
        size: u64,
    },

    /// `truncate` can only shrink.
    #[error("cannot truncate to {requested} bytes, storage holds only {size}")]
    TruncateBeyondEnd {
        /// Size asked for.
        requested: u64,
        /// Bytes currently held.
        size: u64,
    },

    /// A write reached a backend opened read-only.
    #[error("storage is read-only")]
    ReadOnly,
}
