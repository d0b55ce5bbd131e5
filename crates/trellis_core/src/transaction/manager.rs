//! Transaction manager.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::availability::AvailabilityGuard;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::health::DatabaseHealth;
use crate::lock::LockManager;
use crate::rotation::LogRotation;
use crate::store::StorageLayer;
use crate::transaction::kernel::KernelTransaction;
use crate::transaction::tracker::TransactionTracker;
use crate::types::TransactionId;
use crate::wal::{Command, LogFile};

/// Collaborators of a [`TransactionManager`].
pub struct TransactionManagerParts {
    /// Store that committed transactions are applied to.
    pub store: Arc<dyn StorageLayer>,
    /// Log that commits are appended to.
    pub log: Arc<LogFile>,
    /// Entity locks.
    pub locks: Arc<dyn LockManager>,
    /// Gate checked by `begin`.
    pub guard: Arc<AvailabilityGuard>,
    /// Panic latch.
    pub health: Arc<DatabaseHealth>,
    /// Rotation run before each commit.
    pub rotation: Arc<LogRotation>,
    /// In-flight apply tracking shared with rotation.
    pub tracker: Arc<TransactionTracker>,
    /// Timestamps for `Start` and `Commit` entries.
    pub clock: Arc<dyn Clock>,
}

/// Begins, commits and rolls back transactions.
///
/// ## Commit
///
/// 1. Fail if the database has panicked
/// 2. Validate the buffered commands against the store
/// 3. Rotate the log if it has reached its threshold
/// 4. Under the section lock: append `Start`, commands and `Commit`,
///    force, and register the transaction as in flight
/// 5. Wait for earlier transactions to be applied, then apply
/// 6. Release locks
///
/// A failure in step 4 or 5 leaves log and store disagreeing, so it
/// panics the database; recovery repairs the store on the next open.
pub struct TransactionManager {
    store: Arc<dyn StorageLayer>,
    log: Arc<LogFile>,
    locks: Arc<dyn LockManager>,
    guard: Arc<AvailabilityGuard>,
    health: Arc<DatabaseHealth>,
    rotation: Arc<LogRotation>,
    tracker: Arc<TransactionTracker>,
    clock: Arc<dyn Clock>,
    next_txid: AtomicU64,
    active: AtomicUsize,
    sync_on_commit: bool,
    read_only: bool,
    availability_timeout: Duration,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("next_txid", &self.next_txid.load(Ordering::SeqCst))
            .field("active", &self.active_count())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    /// Creates a manager that hands out ids starting at `next_txid`.
    pub fn new(
        parts: TransactionManagerParts,
        next_txid: TransactionId,
        config: &Config,
    ) -> Self {
        Self {
            store: parts.store,
            log: parts.log,
            locks: parts.locks,
            guard: parts.guard,
            health: parts.health,
            rotation: parts.rotation,
            tracker: parts.tracker,
            clock: parts.clock,
            next_txid: AtomicU64::new(next_txid.as_u64().max(1)),
            active: AtomicUsize::new(0),
            sync_on_commit: config.sync_on_commit,
            read_only: config.read_only,
            availability_timeout: config.availability_timeout,
        }
    }

    /// Number of transactions begun but not yet closed.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// The id the next transaction will receive.
    #[must_use]
    pub fn peek_next_txid(&self) -> TransactionId {
        TransactionId::new(self.next_txid.load(Ordering::SeqCst))
    }

    /// Returns `true` if writes are rejected.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn store(&self) -> &Arc<dyn StorageLayer> {
        &self.store
    }

    /// Starts a kernel transaction.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `DatabaseShutdown` if the guard does not
    /// open within the availability timeout, and `Panicked` if the
    /// database is unhealthy.
    pub fn begin(&self) -> CoreResult<Arc<KernelTransaction>> {
        self.guard.await_available(self.availability_timeout)?;
        self.health.assert_healthy::<CoreError>()?;

        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        self.active.fetch_add(1, Ordering::SeqCst);
        debug!(txid = %id, "began transaction");
        Ok(Arc::new(KernelTransaction::new(id, Arc::clone(&self.locks))))
    }

    /// Commits `tx`. Locks are released and the transaction is closed on
    /// every path.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the commands no longer apply,
    /// `ReadOnly` for writes on a read-only database, or `Panicked` if the
    /// log or store failed.
    pub fn commit(&self, tx: &KernelTransaction) -> CoreResult<()> {
        let result = self.commit_inner(tx);
        self.finish(tx);
        result
    }

    /// Rolls back `tx`, discarding its buffered commands.
    ///
    /// # Errors
    ///
    /// Currently infallible since nothing reaches the log before commit.
    pub fn rollback(&self, tx: &KernelTransaction) -> CoreResult<()> {
        let discarded = tx.take_commands().len();
        debug!(txid = %tx.id(), discarded, "rolled back transaction");
        self.finish(tx);
        Ok(())
    }

    fn finish(&self, tx: &KernelTransaction) {
        if tx.is_closed() {
            return;
        }
        tx.close();
        tx.release_all_locks();
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn commit_inner(&self, tx: &KernelTransaction) -> CoreResult<()> {
        tx.ensure_open()?;
        let commands = tx.take_commands();
        if commands.is_empty() {
            debug!(txid = %tx.id(), "committed read-only transaction");
            return Ok(());
        }
        if self.read_only {
            return Err(CoreError::ReadOnly {
                operation: "commit",
            });
        }

        self.health.assert_healthy::<CoreError>()?;
        self.store.validate(&commands)?;
        self.rotation.rotate_log_if_needed()?;

        let txid = tx.id();
        let ticket = {
            let mut section = self.log.lock_section();
            let timestamp = self.clock.current_time_millis();
            let appended = section
                .append_transaction(txid, timestamp, &commands)
                .and_then(|_| {
                    if self.sync_on_commit {
                        section.force()
                    } else {
                        Ok(())
                    }
                });
            if let Err(err) = appended {
                return Err(self.health.panic_and_fail(err));
            }
            self.tracker.begin_apply()
        };

        self.tracker.await_turn(ticket);
        let applied = self.apply(txid, &commands);
        self.tracker.end_apply(ticket);
        applied?;

        debug!(%txid, commands = commands.len(), "committed transaction");
        Ok(())
    }

    fn apply(&self, txid: TransactionId, commands: &[Command]) -> CoreResult<()> {
        self.health.assert_healthy::<CoreError>()?;
        self.store.apply(txid, commands).map_err(|err| {
            warn!(%txid, error = %err, "logged transaction could not be applied");
            self.health.panic_and_fail(err)
        })
    }
}
