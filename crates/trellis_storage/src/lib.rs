//! # Trellis Storage
//!
//! Byte-level storage for Trellis.
//!
//! Everything durable in Trellis (write-ahead log segments, store snapshots)
//! sits on top of a [`StorageBackend`]: an opaque, append-only byte store
//! that can be read at arbitrary offsets, flushed, synced and truncated.
//! Backends never interpret what they hold; the log format is owned by
//! `trellis_core`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - shared in-memory bytes; clones see the same data,
//!   which lets tests "reopen" a log after a simulated crash
//! - [`FileBackend`] - a single OS file
//!
//! ## Example
//!
//! ```rust
//! use trellis_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"segment header").unwrap();
//! let reopened = backend.clone();
//! assert_eq!(reopened.read_at(offset, 7).unwrap(), b"segment");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
