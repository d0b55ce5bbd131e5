//! Crash injection for recovery tests.
//!
//! A [`CrashSwitch`] is shared between a test and the storage it arms.
//! Once armed, the switch lets a fixed number of further bytes through and
//! then fails every append, writing the bytes that fit before the limit.
//! That leaves a torn tail in the log, exactly what a power cut during a
//! write would leave behind.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trellis_testkit::crash::CrashingSegments;
//!
//! let segments = MemorySegments::new();
//! let crashing = CrashingSegments::new(segments.clone());
//! let switch = crashing.switch();
//! let db = GraphDatabase::open_with(Arc::new(crashing), snapshot, config)?;
//! switch.crash_after(10);
//! // the next commit tears after 10 bytes and panics the database
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use trellis_core::wal::{MemorySegments, SegmentStore};
use trellis_core::{CoreResult, LogVersion};
use trellis_storage::{StorageBackend, StorageError, StorageResult};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Part of the transaction reaches the log.
    DuringLogWrite,
    /// The whole transaction is written but the sync fails.
    DuringSync,
}

#[derive(Debug)]
struct SwitchState {
    crash_after_bytes: AtomicU64,
    bytes_written: AtomicU64,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

/// Shared trigger for [`CrashableBackend`]s.
#[derive(Debug, Clone)]
pub struct CrashSwitch {
    state: Arc<SwitchState>,
}

impl Default for CrashSwitch {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashSwitch {
    /// Creates a disarmed switch.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SwitchState {
                crash_after_bytes: AtomicU64::new(u64::MAX),
                bytes_written: AtomicU64::new(0),
                crashed: AtomicBool::new(false),
                fail_on_sync: AtomicBool::new(false),
            }),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: u64) {
        let written = self.state.bytes_written.load(Ordering::SeqCst);
        self.state
            .crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Sets whether flush and sync fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.state.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Arms the switch for `point`.
    ///
    /// `DuringLogWrite` lets `bytes` through; `DuringSync` ignores it.
    pub fn arm(&self, point: CrashPoint, bytes: u64) {
        match point {
            CrashPoint::DuringLogWrite => self.crash_after(bytes),
            CrashPoint::DuringSync => self.set_fail_on_sync(true),
        }
    }

    /// Disarms the switch and clears the crashed flag.
    pub fn reset(&self) {
        self.state.crash_after_bytes.store(u64::MAX, Ordering::SeqCst);
        self.state.crashed.store(false, Ordering::SeqCst);
        self.state.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Returns whether a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Total bytes appended through backends sharing this switch.
    pub fn bytes_written(&self) -> u64 {
        self.state.bytes_written.load(Ordering::SeqCst)
    }

    fn crash(&self, message: &str) -> StorageError {
        self.state.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(io::ErrorKind::Other, message.to_string()))
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: CrashSwitch,
}

impl std::fmt::Debug for CrashableBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashableBackend")
            .field("crashed", &self.switch.has_crashed())
            .finish_non_exhaustive()
    }
}

impl CrashableBackend {
    /// Wraps `inner`, crashing when `switch` says so.
    pub fn new(inner: Box<dyn StorageBackend>, switch: CrashSwitch) -> Self {
        Self { inner, switch }
    }

    /// The switch controlling this backend.
    pub fn switch(&self) -> &CrashSwitch {
        &self.switch
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let state = &self.switch.state;
        let len = data.len() as u64;
        let current = state.bytes_written.fetch_add(len, Ordering::SeqCst);
        let threshold = state.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.switch.crash("simulated crash during write"));
        }
        if current + len > threshold {
            let partial = usize::try_from(threshold - current).unwrap_or(data.len());
            if partial > 0 {
                // The torn prefix is the point; its own outcome does not matter.
                let _ = self.inner.append(&data[..partial]);
            }
            return Err(self.switch.crash("simulated crash during partial write"));
        }

        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.switch.crash("simulated crash during flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.state.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.switch.crash("simulated crash during sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// In-memory log segments whose writers share one [`CrashSwitch`].
///
/// After the crash, reopen the database over the wrapped
/// [`MemorySegments`] to simulate the restart.
#[derive(Debug, Clone)]
pub struct CrashingSegments {
    inner: MemorySegments,
    switch: CrashSwitch,
}

impl CrashingSegments {
    /// Wraps `inner` with a disarmed switch.
    pub fn new(inner: MemorySegments) -> Self {
        Self {
            inner,
            switch: CrashSwitch::new(),
        }
    }

    /// The switch shared by every writer opened from here.
    pub fn switch(&self) -> CrashSwitch {
        self.switch.clone()
    }

    /// The underlying segments, unaffected by the switch.
    pub fn segments(&self) -> &MemorySegments {
        &self.inner
    }
}

impl SegmentStore for CrashingSegments {
    fn versions(&self) -> CoreResult<Vec<LogVersion>> {
        self.inner.versions()
    }

    fn open_writer(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>> {
        let writer = self.inner.open_writer(version)?;
        Ok(Box::new(CrashableBackend::new(writer, self.switch.clone())))
    }

    fn open_reader(&self, version: LogVersion) -> CoreResult<Box<dyn StorageBackend>> {
        self.inner.open_reader(version)
    }

    fn describe(&self, version: LogVersion) -> String {
        format!("crashing-{}", self.inner.describe(version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_storage::InMemoryBackend;

    fn backend() -> (InMemoryBackend, CrashableBackend) {
        let bytes = InMemoryBackend::new();
        let crashable = CrashableBackend::new(Box::new(bytes.clone()), CrashSwitch::new());
        (bytes, crashable)
    }

    #[test]
    fn disarmed_backend_passes_through() {
        let (bytes, mut backend) = backend();
        backend.append(b"hello").unwrap();
        backend.sync().unwrap();
        assert_eq!(bytes.read_at(0, 5).unwrap(), b"hello");
        assert!(!backend.switch().has_crashed());
    }

    #[test]
    fn crash_writes_partial_prefix() {
        let (bytes, mut backend) = backend();
        backend.append(b"header").unwrap();
        backend.switch().crash_after(3);

        assert!(backend.append(b"payload").is_err());
        assert!(backend.switch().has_crashed());
        assert_eq!(bytes.size().unwrap(), 9);
        assert_eq!(bytes.read_from(6).unwrap(), b"pay");

        assert!(backend.append(b"more").is_err());
        assert_eq!(bytes.size().unwrap(), 9);
    }

    #[test]
    fn failing_sync_keeps_bytes() {
        let (bytes, mut backend) = backend();
        backend.switch().arm(CrashPoint::DuringSync, 0);
        backend.append(b"data").unwrap();
        assert!(backend.sync().is_err());
        assert!(backend.switch().has_crashed());
        assert_eq!(bytes.size().unwrap(), 4);

        backend.switch().reset();
        backend.sync().unwrap();
        assert!(!backend.switch().has_crashed());
    }

    #[test]
    fn segments_share_the_switch() {
        let segments = CrashingSegments::new(MemorySegments::new());
        let switch = segments.switch();
        let mut first = segments.open_writer(LogVersion::new(0)).unwrap();
        let mut second = segments.open_writer(LogVersion::new(1)).unwrap();

        first.append(b"abc").unwrap();
        switch.crash_after(2);
        assert!(second.append(b"xyz").is_err());
        assert_eq!(switch.bytes_written(), 6);
        assert_eq!(
            segments.segments().segment(LogVersion::new(1)).unwrap().size().unwrap(),
            2
        );
    }
}
