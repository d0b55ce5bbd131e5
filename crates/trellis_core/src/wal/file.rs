//! The active write-ahead log.

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trellis_storage::StorageBackend;

use crate::error::{CoreError, CoreResult};
use crate::types::{LogPosition, LogVersion, TransactionId};
use crate::wal::iterator::LogEntryIterator;
use crate::wal::record::{Command, LogEntry};
use crate::wal::segment::{SegmentHeader, SegmentStore, SEGMENT_HEADER_SIZE};

struct ActiveSegment {
    version: LogVersion,
    writer: Box<dyn StorageBackend>,
    last_appended: TransactionId,
}

/// Last transaction committed to `version`, or its header's value if the
/// segment holds no commit.
fn last_commit_in(
    segments: &dyn SegmentStore,
    version: LogVersion,
) -> CoreResult<TransactionId> {
    let entries = open_reader(segments, version, 0)?;
    let mut last = entries.header().last_committed;
    for item in entries {
        if let (_, LogEntry::Commit { txid, .. }) = item? {
            last = txid;
        }
    }
    Ok(last)
}

/// The write-ahead log: a sequence of versioned segments, the newest of
/// which is open for appending.
///
/// All writes go through a [`LogSection`], obtained from
/// [`lock_section`](Self::lock_section). Appends, forces and rotation all
/// take that same lock, so a rotation can never interleave with a force.
pub struct LogFile {
    segments: Arc<dyn SegmentStore>,
    section: Mutex<ActiveSegment>,
    section_acquisitions: AtomicU64,
    active_version: AtomicU64,
    active_size: AtomicU64,
    rotation_threshold: u64,
    read_only: bool,
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile")
            .field("version", &self.current_version())
            .field("size", &self.active_size())
            .field("rotation_threshold", &self.rotation_threshold)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl LogFile {
    /// Opens the newest segment in `segments`, creating version 0 for an
    /// empty store.
    ///
    /// A newest segment too short to hold its header (a crash during
    /// rotation) is reinitialized.
    ///
    /// # Errors
    ///
    /// Returns an error if a segment cannot be opened or has an invalid
    /// header.
    pub fn open(segments: Arc<dyn SegmentStore>, rotation_threshold: u64) -> CoreResult<Self> {
        let version = segments.latest_version()?.unwrap_or_default();
        let mut writer = segments.open_writer(version)?;

        let size = writer.size()?;
        if size < SEGMENT_HEADER_SIZE {
            if size > 0 {
                warn!(%version, size, "reinitializing segment with torn header");
                writer.truncate(0)?;
            }
            let previous = segments.versions()?.into_iter().filter(|v| *v < version).last();
            let last_committed = match previous {
                Some(previous) => last_commit_in(segments.as_ref(), previous)?,
                None => TransactionId::NONE,
            };
            let header = SegmentHeader {
                version,
                last_committed,
            };
            writer.append(&header.encode())?;
            writer.sync()?;
        } else {
            let header = SegmentHeader::read_from(writer.as_ref())?;
            if header.version != version {
                return Err(CoreError::log_corruption(format!(
                    "segment {} carries header for {}",
                    segments.describe(version),
                    header.version
                )));
            }
        }

        let size = writer.size()?;
        let last_appended = last_commit_in(segments.as_ref(), version)?;
        debug!(%version, size, %last_appended, "opened log");
        Ok(Self::assemble(
            segments,
            ActiveSegment {
                version,
                writer,
                last_appended,
            },
            size,
            rotation_threshold,
            false,
        ))
    }

    /// Opens the newest segment without ever writing to the segment store.
    ///
    /// Every write through a [`LogSection`] fails with `ReadOnly` and
    /// forcing is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` if the store holds no segment or the newest one
    /// has a torn header, since either would need a write to repair.
    pub fn open_read_only(
        segments: Arc<dyn SegmentStore>,
        rotation_threshold: u64,
    ) -> CoreResult<Self> {
        let Some(version) = segments.latest_version()? else {
            return Err(CoreError::ReadOnly {
                operation: "log creation",
            });
        };
        let reader = segments.open_reader(version)?;
        let size = reader.size()?;
        if size < SEGMENT_HEADER_SIZE {
            return Err(CoreError::ReadOnly {
                operation: "recovery",
            });
        }
        let last_appended = last_commit_in(segments.as_ref(), version)?;
        debug!(%version, size, %last_appended, "opened log read-only");
        Ok(Self::assemble(
            segments,
            ActiveSegment {
                version,
                writer: reader,
                last_appended,
            },
            size,
            rotation_threshold,
            true,
        ))
    }

    fn assemble(
        segments: Arc<dyn SegmentStore>,
        active: ActiveSegment,
        size: u64,
        rotation_threshold: u64,
        read_only: bool,
    ) -> Self {
        Self {
            segments,
            active_version: AtomicU64::new(active.version.as_u64()),
            section: Mutex::new(active),
            section_acquisitions: AtomicU64::new(0),
            active_size: AtomicU64::new(size),
            rotation_threshold,
            read_only,
        }
    }

    /// Returns `true` if the log was opened with
    /// [`open_read_only`](Self::open_read_only).
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Takes the section lock.
    pub fn lock_section(&self) -> LogSection<'_> {
        let active = self.section.lock();
        self.section_acquisitions.fetch_add(1, Ordering::SeqCst);
        LogSection { file: self, active }
    }

    /// Number of times the section lock has been taken.
    #[must_use]
    pub fn section_acquisitions(&self) -> u64 {
        self.section_acquisitions.load(Ordering::SeqCst)
    }

    /// Returns `true` once the active segment has reached the rotation
    /// threshold. Does not take the section lock.
    #[must_use]
    pub fn rotation_needed(&self) -> bool {
        self.active_size() >= self.rotation_threshold
    }

    /// Returns the version of the active segment.
    #[must_use]
    pub fn current_version(&self) -> LogVersion {
        LogVersion::new(self.active_version.load(Ordering::SeqCst))
    }

    /// Returns the size of the active segment in bytes.
    #[must_use]
    pub fn active_size(&self) -> u64 {
        self.active_size.load(Ordering::SeqCst)
    }

    /// Forces the active segment to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn force(&self) -> CoreResult<()> {
        self.lock_section().force()
    }

    /// Lists all segment versions.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment store cannot be listed.
    pub fn versions(&self) -> CoreResult<Vec<LogVersion>> {
        self.segments.versions()
    }

    /// Opens a lazy reader over segment `version` starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment does not exist or its header is
    /// invalid.
    pub fn reader(&self, version: LogVersion, offset: u64) -> CoreResult<LogEntryIterator> {
        open_reader(self.segments.as_ref(), version, offset)
    }

    /// Returns the segment store.
    #[must_use]
    pub fn segments(&self) -> &Arc<dyn SegmentStore> {
        &self.segments
    }
}

/// Opens a reader over a segment without a [`LogFile`].
///
/// Used for inspecting a log that is not open for writing.
///
/// # Errors
///
/// Returns an error if the segment does not exist or its header is invalid.
pub fn open_reader(
    segments: &dyn SegmentStore,
    version: LogVersion,
    offset: u64,
) -> CoreResult<LogEntryIterator> {
    let backend = segments.open_reader(version)?;
    LogEntryIterator::open(backend, version, offset)
}

/// Exclusive access to the active segment.
///
/// Released on drop.
pub struct LogSection<'a> {
    file: &'a LogFile,
    active: MutexGuard<'a, ActiveSegment>,
}

impl LogSection<'_> {
    /// Returns the active segment version.
    #[must_use]
    pub fn version(&self) -> LogVersion {
        self.active.version
    }

    /// Last transaction appended to the log, in log order, across
    /// segments.
    #[must_use]
    pub fn last_appended(&self) -> TransactionId {
        self.active.last_appended
    }

    fn ensure_writable(&self) -> CoreResult<()> {
        if self.file.read_only {
            return Err(CoreError::ReadOnly {
                operation: "log write",
            });
        }
        Ok(())
    }

    fn append_bytes(&mut self, bytes: &[u8]) -> CoreResult<LogPosition> {
        self.ensure_writable()?;
        let offset = self.active.writer.append(bytes)?;
        self.file
            .active_size
            .store(offset + bytes.len() as u64, Ordering::SeqCst);
        Ok(LogPosition::new(self.active.version, offset))
    }

    /// Appends `Start`, one `Command` per command, and `Commit` as a
    /// single write.
    ///
    /// Returns the position of the `Start` entry. The transaction is not
    /// durable until [`force`](Self::force) returns.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append_transaction(
        &mut self,
        txid: TransactionId,
        timestamp: u64,
        commands: &[Command],
    ) -> CoreResult<LogPosition> {
        let mut bytes = LogEntry::Start { txid, timestamp }.encode()?;
        for command in commands {
            bytes.extend(
                LogEntry::Command {
                    txid,
                    command: command.clone(),
                }
                .encode()?,
            );
        }
        bytes.extend(LogEntry::Commit { txid, timestamp }.encode()?);
        let position = self.append_bytes(&bytes)?;
        self.active.last_appended = txid;
        Ok(position)
    }

    /// Appends a checkpoint entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn append_checkpoint(&mut self, last_txid: TransactionId) -> CoreResult<LogPosition> {
        let bytes = LogEntry::Checkpoint { last_txid }.encode()?;
        self.append_bytes(&bytes)
    }

    /// Flushes and syncs the active segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    pub fn force(&mut self) -> CoreResult<()> {
        if self.file.read_only {
            return Ok(());
        }
        self.active.writer.flush()?;
        self.active.writer.sync()?;
        Ok(())
    }

    /// Finalizes the active segment and opens the next version, whose
    /// header records `last_committed`.
    ///
    /// # Errors
    ///
    /// Returns an error if the old segment cannot be forced or the new one
    /// cannot be created.
    pub fn rotate(&mut self, last_committed: TransactionId) -> CoreResult<LogVersion> {
        self.ensure_writable()?;
        self.force()?;

        let old = self.active.version;
        let version = old.next();
        let mut writer = self.file.segments.open_writer(version)?;
        if writer.size()? > 0 {
            warn!(%version, "discarding stale segment contents");
            writer.truncate(0)?;
        }
        writer.append(
            &SegmentHeader {
                version,
                last_committed,
            }
            .encode(),
        )?;
        writer.sync()?;

        *self.active = ActiveSegment {
            version,
            writer,
            last_appended: last_committed,
        };
        self.file
            .active_version
            .store(version.as_u64(), Ordering::SeqCst);
        self.file
            .active_size
            .store(SEGMENT_HEADER_SIZE, Ordering::SeqCst);
        info!(from = %old, to = %version, %last_committed, "rotated log");
        Ok(version)
    }

    /// Cuts the active segment back to `offset`.
    ///
    /// Used by recovery to drop torn or uncommitted bytes at the tail.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` lies inside the segment header or the
    /// truncation fails.
    pub fn truncate_active(&mut self, offset: u64) -> CoreResult<()> {
        self.ensure_writable()?;
        if offset < SEGMENT_HEADER_SIZE {
            return Err(CoreError::invalid_operation(
                "cannot truncate into the segment header",
            ));
        }
        self.active.writer.truncate(offset)?;
        self.file.active_size.store(offset, Ordering::SeqCst);
        Ok(())
    }
}
