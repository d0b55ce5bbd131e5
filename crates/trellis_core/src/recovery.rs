//! Crash recovery.
//!
//! On open, the newest log segment is checked for entries past its last
//! checkpoint or for torn bytes at the tail, and the store's last applied
//! transaction is located in the log. If anything is missing, every
//! committed transaction after it is replayed, the torn tail is cut off,
//! the store is forced, and a checkpoint is appended, all before the
//! database is declared available.
//!
//! Each segment header names the last transaction committed before it.
//! Recovery walks back from the newest segment until it reaches the
//! segment holding the store's last applied transaction (or the one whose
//! header names it) and replays forward from there. Usually that is the
//! newest segment; it is an older one only when a rotation gave up waiting
//! for in-flight appliers.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{CoreError, CoreResult};
use crate::store::StorageLayer;
use crate::types::{LogVersion, TransactionId};
use crate::wal::{open_reader, CommittedTransaction, LogEntry, LogFile, SegmentStore};

/// Observes recovery progress.
pub trait RecoveryMonitor: Send + Sync {
    /// The segment needs replay.
    fn recovery_required(&self, _version: LogVersion) {}

    /// A transaction was replayed into the store.
    fn transaction_recovered(&self, _txid: TransactionId) {}

    /// Replay of the segment finished and the store was forced.
    fn log_recovered(&self, _version: LogVersion, _replayed: usize) {}

    /// Recovery is complete and dependent services have started.
    fn recovery_completed(&self) {}
}

/// Everything one pass over a segment learns.
#[derive(Debug)]
struct SegmentScan {
    last_committed_before: TransactionId,
    committed: Vec<CommittedTransaction>,
    entries_after_checkpoint: bool,
    clean_end: u64,
    torn_bytes: u64,
    highest_txid: TransactionId,
}

impl SegmentScan {
    fn recovery_required(&self) -> bool {
        self.entries_after_checkpoint || self.torn_bytes > 0
    }

    fn position_of(&self, txid: TransactionId) -> Option<usize> {
        self.committed.iter().position(|tx| tx.txid == txid)
    }
}

/// Committed transactions logged after `last_applied`, in log order.
struct Backlog {
    missing: Vec<CommittedTransaction>,
    already_applied: usize,
    highest_txid: TransactionId,
    segments_read: usize,
}

/// Walks back from `newest` to the segment holding `last_applied` and
/// gathers every commit after it.
fn backlog(
    segments: &dyn SegmentStore,
    newest: SegmentScan,
    newest_version: LogVersion,
    last_applied: TransactionId,
) -> CoreResult<Backlog> {
    let mut older = segments
        .versions()?
        .into_iter()
        .filter(|v| *v < newest_version)
        .rev();
    let mut highest_txid = newest.highest_txid;
    let mut chain = Vec::new();
    let mut scan = newest;
    let skip = loop {
        if let Some(index) = scan.position_of(last_applied) {
            chain.push(scan);
            break index + 1;
        }
        if scan.last_committed_before == last_applied {
            chain.push(scan);
            break 0;
        }
        let Some(previous) = older.next() else {
            chain.push(scan);
            break 0;
        };
        chain.push(scan);
        debug!(version = %previous, %last_applied, "store predates segment; reading previous one");
        scan = scan_segment(segments, previous)?;
        highest_txid = highest_txid.max(scan.highest_txid);
    };

    let segments_read = chain.len();
    let mut missing = Vec::new();
    for (i, scan) in chain.into_iter().rev().enumerate() {
        let from = if i == 0 { skip } else { 0 };
        missing.extend(scan.committed.into_iter().skip(from));
    }
    Ok(Backlog {
        missing,
        already_applied: skip,
        highest_txid,
        segments_read,
    })
}

fn scan_segment(segments: &dyn SegmentStore, version: LogVersion) -> CoreResult<SegmentScan> {
    let mut entries = open_reader(segments, version, 0)?;
    let header = entries.header();
    let mut pending: HashMap<TransactionId, CommittedTransaction> = HashMap::new();
    let mut scan = SegmentScan {
        last_committed_before: header.last_committed,
        committed: Vec::new(),
        entries_after_checkpoint: false,
        clean_end: entries.position().offset,
        torn_bytes: 0,
        highest_txid: header.last_committed,
    };

    while let Some(item) = entries.next() {
        let (position, entry) = item?;
        if let Some(txid) = entry.txid() {
            scan.highest_txid = scan.highest_txid.max(txid);
        }
        match entry {
            LogEntry::Start { txid, timestamp } => {
                pending.insert(
                    txid,
                    CommittedTransaction {
                        txid,
                        timestamp,
                        commands: Vec::new(),
                    },
                );
                scan.entries_after_checkpoint = true;
            }
            LogEntry::Command { txid, command } => {
                pending
                    .get_mut(&txid)
                    .ok_or_else(|| {
                        CoreError::log_corruption(format!(
                            "command for {txid} without start at {position}"
                        ))
                    })?
                    .commands
                    .push(command);
                scan.entries_after_checkpoint = true;
            }
            LogEntry::Commit { txid, timestamp } => {
                let mut tx = pending.remove(&txid).ok_or_else(|| {
                    CoreError::log_corruption(format!(
                        "commit for {txid} without start at {position}"
                    ))
                })?;
                tx.timestamp = timestamp;
                scan.committed.push(tx);
                scan.entries_after_checkpoint = true;
                scan.clean_end = entries.position().offset;
            }
            LogEntry::Checkpoint { .. } => {
                scan.entries_after_checkpoint = false;
                scan.clean_end = entries.position().offset;
            }
        }
    }

    scan.torn_bytes = entries.torn_bytes();
    if !pending.is_empty() {
        debug!(%version, uncommitted = pending.len(), "segment ends with uncommitted transactions");
    }
    Ok(scan)
}

/// Decides whether a segment needs replay.
pub struct RecoveryRequiredChecker {
    segments: Arc<dyn SegmentStore>,
}

impl RecoveryRequiredChecker {
    /// Creates a checker over `segments`.
    pub fn new(segments: Arc<dyn SegmentStore>) -> Self {
        Self { segments }
    }

    /// Returns `true` if `version` has entries after its last checkpoint
    /// or torn bytes after its last complete entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the segment cannot be read or is corrupt.
    pub fn is_recovery_required(&self, version: LogVersion) -> CoreResult<bool> {
        Ok(scan_segment(self.segments.as_ref(), version)?.recovery_required())
    }

    /// Diagnostic variant: read failures are logged and reported as
    /// `false`.
    #[must_use]
    pub fn is_recovery_required_lenient(&self, version: LogVersion) -> bool {
        self.is_recovery_required(version).unwrap_or_else(|err| {
            warn!(%version, error = %err, "could not determine whether recovery is required");
            false
        })
    }
}

/// Timestamp of the first transaction started in segment `version`.
///
/// Best effort: failures are logged and yield `None`.
#[must_use]
pub fn oldest_transaction_timestamp(
    segments: &dyn SegmentStore,
    version: LogVersion,
) -> Option<u64> {
    let entries = match open_reader(segments, version, 0) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%version, error = %err, "could not open segment for oldest transaction");
            return None;
        }
    };
    for item in entries {
        match item {
            Ok((_, LogEntry::Start { timestamp, .. })) => return Some(timestamp),
            Ok(_) => {}
            Err(err) => {
                warn!(%version, error = %err, "could not read oldest transaction");
                return None;
            }
        }
    }
    None
}

/// Recovery progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// `init` has not run.
    Init,
    /// The log was clean.
    NoAction,
    /// Transactions were replayed; `start` will report completion.
    Replayed,
    /// Completion has been reported.
    Complete,
}

/// What recovery found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Segment that was checked.
    pub version: LogVersion,
    /// Whether replay ran.
    pub required: bool,
    /// Transactions replayed into the store, in log order.
    pub replayed: Vec<TransactionId>,
    /// Committed transactions in the first segment read that the store
    /// already had.
    pub already_applied: usize,
    /// Torn or uncommitted bytes cut from the tail.
    pub truncated_bytes: u64,
    /// Highest transaction id in the segments read or their headers.
    pub highest_logged: TransactionId,
    /// Number of segments read, newest included.
    pub segments_read: usize,
}

/// Replays the log tail the store is missing.
pub struct Recovery {
    log: Arc<LogFile>,
    store: Arc<dyn StorageLayer>,
    monitor: Option<Arc<dyn RecoveryMonitor>>,
    state: RecoveryState,
    report: RecoveryReport,
}

impl std::fmt::Debug for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recovery")
            .field("state", &self.state)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl Recovery {
    /// Creates a recovery over `log` and `store`.
    pub fn new(log: Arc<LogFile>, store: Arc<dyn StorageLayer>) -> Self {
        Self {
            log,
            store,
            monitor: None,
            state: RecoveryState::Init,
            report: RecoveryReport::default(),
        }
    }

    /// Attaches a progress monitor.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn RecoveryMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// What the last `init` found.
    #[must_use]
    pub fn report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Checks the log against the store and replays what it lacks.
    ///
    /// # Errors
    ///
    /// Any read, apply or force failure is returned; the database must not
    /// open after one. A log opened read-only that needs recovery fails
    /// with `ReadOnly`.
    pub fn init(&mut self) -> CoreResult<&RecoveryReport> {
        if self.state != RecoveryState::Init {
            return Err(CoreError::invalid_operation("recovery already initialized"));
        }

        let version = self.log.current_version();
        let segments = Arc::clone(self.log.segments());
        let newest = scan_segment(segments.as_ref(), version)?;
        let needs_cleanup = newest.recovery_required();
        let (clean_end, torn_bytes) = (newest.clean_end, newest.torn_bytes);
        let backlog = backlog(
            segments.as_ref(),
            newest,
            version,
            self.store.last_committed_transaction(),
        )?;
        self.report = RecoveryReport {
            version,
            already_applied: backlog.already_applied,
            highest_logged: backlog.highest_txid,
            segments_read: backlog.segments_read,
            ..RecoveryReport::default()
        };

        if !needs_cleanup && backlog.missing.is_empty() {
            debug!(%version, "log is clean; no recovery needed");
            self.state = RecoveryState::NoAction;
            return Ok(&self.report);
        }
        if self.log.is_read_only() {
            return Err(CoreError::ReadOnly {
                operation: "recovery",
            });
        }

        info!(
            %version,
            missing = backlog.missing.len(),
            segments = backlog.segments_read,
            torn_bytes,
            "recovery required"
        );
        if let Some(monitor) = &self.monitor {
            monitor.recovery_required(version);
        }

        for tx in &backlog.missing {
            self.store.apply_recovered_entry(tx)?;
            self.report.replayed.push(tx.txid);
            if let Some(monitor) = &self.monitor {
                monitor.transaction_recovered(tx.txid);
            }
        }

        let mut section = self.log.lock_section();
        let size = self.log.active_size();
        if clean_end < size {
            section.truncate_active(clean_end)?;
            self.report.truncated_bytes = size - clean_end;
            warn!(%version, bytes = self.report.truncated_bytes, "truncated torn log tail");
        }
        self.store.force_everything()?;
        section.append_checkpoint(self.store.last_committed_transaction())?;
        section.force()?;
        drop(section);

        info!(
            %version,
            replayed = self.report.replayed.len(),
            already_applied = self.report.already_applied,
            "log recovered"
        );
        if let Some(monitor) = &self.monitor {
            monitor.log_recovered(version, self.report.replayed.len());
        }
        self.report.required = true;
        self.state = RecoveryState::Replayed;
        Ok(&self.report)
    }

    /// Reports completion if `init` replayed anything.
    pub fn start(&mut self) {
        if self.state == RecoveryState::Replayed {
            info!(version = %self.report.version, "recovery completed");
            if let Some(monitor) = &self.monitor {
                monitor.recovery_completed();
            }
            self.state = RecoveryState::Complete;
        }
    }
}
