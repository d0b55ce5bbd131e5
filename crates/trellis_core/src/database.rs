//! Database facade.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::availability::AvailabilityGuard;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::health::DatabaseHealth;
use crate::lock::LocalLockManager;
use crate::recovery::{Recovery, RecoveryReport};
use crate::rotation::{DatabaseRotationControl, LogRotation};
use crate::store::{
    GraphRead, GraphStore, GraphWrite, MemorySnapshot, ReadOnlyGraph, SnapshotLocation,
    StorageLayer,
};
use crate::transaction::{
    Session, Transaction, TransactionManager, TransactionManagerParts, TransactionTracker,
};
use crate::types::TransactionId;
use crate::wal::{LogFile, MemorySegments, SegmentStore};

/// An embedded graph database.
///
/// Opening a database recovers its log, then makes it available.
/// Work happens in [`Session`]s; committed state can be read or traversed
/// through [`graph`](Self::graph).
///
/// # Example
///
/// ```rust,ignore
/// use trellis_core::{Config, GraphDatabase};
/// use std::path::Path;
///
/// let db = GraphDatabase::open(Path::new("my_graph"), Config::default())?;
/// let session = db.session();
/// let mut tx = session.begin()?;
/// let a = tx.create_node()?;
/// let b = tx.create_node()?;
/// tx.create_relationship(a, b, "KNOWS")?;
/// tx.success();
/// tx.close()?;
/// db.shutdown()?;
/// ```
///
/// # In-memory databases
///
/// [`open_in_memory`](Self::open_in_memory) keeps log and snapshot in
/// memory; nothing survives the handle.
pub struct GraphDatabase {
    config: Config,
    /// Holds the directory lock. `None` in memory.
    dir: Option<DatabaseDir>,
    store: Arc<GraphStore>,
    log: Arc<LogFile>,
    guard: Arc<AvailabilityGuard>,
    health: Arc<DatabaseHealth>,
    tracker: Arc<TransactionTracker>,
    rotation: Arc<LogRotation>,
    manager: Arc<TransactionManager>,
    recovery_report: RecoveryReport,
    open: Mutex<bool>,
}

impl GraphDatabase {
    /// Opens the database in directory `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process has the database locked (`DatabaseLocked`)
    /// - The directory is missing and `create_if_missing` is false, or
    ///   a read-only open finds no database
    /// - A read-only open finds a log that needs recovery
    /// - The log or snapshot cannot be read, or recovery fails
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        if config.read_only && dir.is_new_database()? {
            return Err(CoreError::not_found(format!(
                "database in {}",
                path.display()
            )));
        }
        let segments: Arc<dyn SegmentStore> = Arc::new(dir.segments());
        let snapshot = SnapshotLocation::File(dir.snapshot_path());
        Self::assemble(Some(dir), segments, snapshot, config)
    }

    /// Opens a fresh database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Only fails if the in-memory log cannot be initialized.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with(
            Arc::new(MemorySegments::new()),
            SnapshotLocation::Memory(MemorySnapshot::new()),
            Config::default(),
        )
    }

    /// Opens a database over explicit log segments and snapshot.
    ///
    /// Reopening with the same segments and snapshot simulates a restart,
    /// which is how crash tests drive recovery.
    ///
    /// # Errors
    ///
    /// Same as [`open`](Self::open), minus the directory checks.
    pub fn open_with(
        segments: Arc<dyn SegmentStore>,
        snapshot: SnapshotLocation,
        config: Config,
    ) -> CoreResult<Self> {
        Self::assemble(None, segments, snapshot, config)
    }

    fn assemble(
        dir: Option<DatabaseDir>,
        segments: Arc<dyn SegmentStore>,
        snapshot: SnapshotLocation,
        config: Config,
    ) -> CoreResult<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(GraphStore::open(snapshot)?);
        let log = Arc::new(if config.read_only {
            LogFile::open_read_only(segments, config.rotation_threshold)?
        } else {
            LogFile::open(segments, config.rotation_threshold)?
        });
        let health = Arc::new(DatabaseHealth::new());
        let guard = Arc::new(AvailabilityGuard::with_clock(1, Arc::clone(&clock)));

        let mut recovery = Recovery::new(Arc::clone(&log), store.clone());
        let recovery_report = recovery.init()?.clone();
        let next_txid = store
            .highest_committed_transaction()
            .max(recovery_report.highest_logged)
            .next();

        let tracker = Arc::new(TransactionTracker::new());
        let rotation = Arc::new(LogRotation::new(
            Arc::clone(&log),
            Arc::new(DatabaseRotationControl::new(
                Arc::clone(&tracker),
                store.clone(),
            )),
            Arc::clone(&health),
            config.await_closed_timeout,
        ));
        let manager = Arc::new(TransactionManager::new(
            TransactionManagerParts {
                store: store.clone(),
                log: Arc::clone(&log),
                locks: Arc::new(LocalLockManager::new(config.lock_wait_poll)),
                guard: Arc::clone(&guard),
                health: Arc::clone(&health),
                rotation: Arc::clone(&rotation),
                tracker: Arc::clone(&tracker),
                clock,
            },
            next_txid,
            &config,
        ));

        guard.grant();
        recovery.start();
        info!(
            path = ?dir.as_ref().map(DatabaseDir::path),
            version = %log.current_version(),
            %next_txid,
            nodes = store.node_count(),
            relationships = store.relationship_count(),
            "database opened"
        );

        Ok(Self {
            config,
            dir,
            store,
            log,
            guard,
            health,
            tracker,
            rotation,
            manager,
            recovery_report,
            open: Mutex::new(true),
        })
    }

    /// Creates a session. Sessions are cheap; use one per unit of work or
    /// per thread.
    #[must_use]
    pub fn session(&self) -> Session {
        Session::new(Arc::clone(&self.manager), self.store.clone())
    }

    /// Runs `f` in a transaction that commits if `f` returns `Ok` and
    /// rolls back otherwise.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, of `begin`, or of the commit.
    pub fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let session = self.session();
        let mut tx = session.begin()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.success();
                tx.close()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(failure) = tx.failure() {
                    warn!(error = %failure, "could not mark failed transaction rollback-only");
                }
                if let Err(close) = tx.close() {
                    warn!(error = %close, "rollback after failed transaction body also failed");
                }
                Err(err)
            }
        }
    }

    /// Writes directly to the store, bypassing transactions and the log,
    /// then forces the store. Meant for bulk loading into a database
    /// nobody else is using.
    ///
    /// # Errors
    ///
    /// Returns the error of `f` or of the force; on a read-only database
    /// every write fails with `ReadOnly`.
    pub fn import<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&dyn GraphWrite) -> CoreResult<T>,
    {
        self.ensure_open()?;
        if self.config.read_only {
            return f(&ReadOnlyGraph::new(self.store.clone()));
        }
        self.health.assert_healthy::<CoreError>()?;
        let value = f(self.store.as_ref())?;
        self.store.force_everything()?;
        debug!(nodes = self.store.node_count(), "import forced");
        Ok(value)
    }

    /// Committed graph state.
    #[must_use]
    pub fn graph(&self) -> &dyn GraphRead {
        self.store.as_ref()
    }

    /// The store behind [`graph`](Self::graph).
    #[must_use]
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// The panic latch.
    #[must_use]
    pub fn health(&self) -> &Arc<DatabaseHealth> {
        &self.health
    }

    /// The availability gate checked by `begin`.
    #[must_use]
    pub fn guard(&self) -> &Arc<AvailabilityGuard> {
        &self.guard
    }

    /// The write-ahead log.
    #[must_use]
    pub fn log(&self) -> &Arc<LogFile> {
        &self.log
    }

    /// Log rotation.
    #[must_use]
    pub fn rotation(&self) -> &Arc<LogRotation> {
        &self.rotation
    }

    /// The transaction manager.
    #[must_use]
    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// What recovery found when the database opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery_report
    }

    /// The configuration the database was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The database directory; `None` in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(DatabaseDir::path)
    }

    /// The last transaction applied to the store.
    #[must_use]
    pub fn last_committed_transaction(&self) -> TransactionId {
        self.store.last_committed_transaction()
    }

    /// Returns `true` until [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::DatabaseShutdown)
        }
    }

    /// Shuts the database down. Idempotent.
    ///
    /// New transactions are refused at once. Committing transactions get
    /// up to the await-closed timeout to finish; then the store is forced
    /// and a checkpoint is logged, so the next open needs no recovery.
    /// A panicked database skips both and leaves the repair to recovery.
    ///
    /// # Errors
    ///
    /// Returns an error if forcing the store or writing the checkpoint
    /// fails.
    pub fn shutdown(&self) -> CoreResult<()> {
        let mut open = self.open.lock();
        if !*open {
            return Ok(());
        }
        *open = false;
        self.guard.shutdown();

        if !self.tracker.await_all_closed(self.config.await_closed_timeout) {
            warn!(
                in_flight = self.tracker.in_flight(),
                "shutting down with transactions still applying"
            );
        }
        if !self.health.is_healthy() {
            warn!("database panicked; skipping checkpoint, recovery will run on next open");
            return Ok(());
        }
        if self.config.read_only {
            info!("read-only database shut down");
            return Ok(());
        }

        self.store.force_everything()?;
        let mut section = self.log.lock_section();
        section.append_checkpoint(self.store.last_committed_transaction())?;
        section.force()?;
        drop(section);
        info!(
            last_committed = %self.store.last_committed_transaction(),
            "database shut down"
        );
        Ok(())
    }
}

impl std::fmt::Debug for GraphDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphDatabase")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .field("healthy", &self.health.is_healthy())
            .field("last_committed", &self.last_committed_transaction())
            .finish_non_exhaustive()
    }
}

impl Drop for GraphDatabase {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(error = %err, "shutdown on drop failed");
        }
    }
}
