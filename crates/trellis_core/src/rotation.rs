//! Log rotation.
//!
//! Rotation closes the active log segment and opens the next version. It
//! is only safe once every transaction already in the log has reached the
//! store and the store has been forced, so that the segment boundary
//! matches a consistent store snapshot.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{CoreError, CoreResult};
use crate::health::DatabaseHealth;
use crate::store::StorageLayer;
use crate::transaction::TransactionTracker;
use crate::types::LogVersion;
use crate::wal::{LogFile, LogSection};

/// What rotation needs from the rest of the database.
pub trait LogRotationControl: Send + Sync {
    /// Waits up to `timeout` until no logged transaction is still being
    /// applied. Returns `false` on timeout.
    fn await_all_transactions_closed(&self, timeout: Duration) -> bool;

    /// Forces the store to stable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be persisted.
    fn force_everything(&self) -> CoreResult<()>;
}

/// Observes completed rotations.
pub trait LogRotationMonitor: Send + Sync {
    /// Called before the rotation waits for in-flight transactions.
    fn started(&self, _from: LogVersion) {}

    /// Called once the new segment is active.
    fn finished(&self, from: LogVersion, to: LogVersion);
}

/// [`LogRotationControl`] over a transaction tracker and a store.
pub struct DatabaseRotationControl {
    tracker: Arc<TransactionTracker>,
    store: Arc<dyn StorageLayer>,
}

impl DatabaseRotationControl {
    /// Creates the control.
    pub fn new(tracker: Arc<TransactionTracker>, store: Arc<dyn StorageLayer>) -> Self {
        Self { tracker, store }
    }
}

impl LogRotationControl for DatabaseRotationControl {
    fn await_all_transactions_closed(&self, timeout: Duration) -> bool {
        self.tracker.await_all_closed(timeout)
    }

    fn force_everything(&self) -> CoreResult<()> {
        self.store.force_everything()
    }
}

/// Rotates the log under its section lock.
pub struct LogRotation {
    log: Arc<LogFile>,
    control: Arc<dyn LogRotationControl>,
    health: Arc<DatabaseHealth>,
    await_closed_timeout: Duration,
    monitor: Option<Arc<dyn LogRotationMonitor>>,
}

impl std::fmt::Debug for LogRotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRotation")
            .field("log", &self.log)
            .field("await_closed_timeout", &self.await_closed_timeout)
            .finish_non_exhaustive()
    }
}

impl LogRotation {
    /// Creates a rotation coordinator.
    pub fn new(
        log: Arc<LogFile>,
        control: Arc<dyn LogRotationControl>,
        health: Arc<DatabaseHealth>,
        await_closed_timeout: Duration,
    ) -> Self {
        Self {
            log,
            control,
            health,
            await_closed_timeout,
            monitor: None,
        }
    }

    /// Attaches a monitor notified of every completed rotation.
    #[must_use]
    pub fn with_monitor(mut self, monitor: Arc<dyn LogRotationMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Rotates if the active segment has reached its threshold.
    ///
    /// Returns `false` if rotation was not needed, including when another
    /// thread rotated while this one waited for the section lock.
    ///
    /// # Errors
    ///
    /// Returns `Panicked` if the database is unhealthy, or the error of a
    /// failed force or segment switch.
    pub fn rotate_log_if_needed(&self) -> CoreResult<bool> {
        if !self.log.rotation_needed() {
            return Ok(false);
        }
        let mut section = self.log.lock_section();
        if !self.log.rotation_needed() {
            return Ok(false);
        }
        self.do_rotate(&mut section)?;
        Ok(true)
    }

    /// Rotates unconditionally.
    ///
    /// # Errors
    ///
    /// See [`rotate_log_if_needed`](Self::rotate_log_if_needed).
    pub fn rotate_log_file(&self) -> CoreResult<LogVersion> {
        let mut section = self.log.lock_section();
        self.do_rotate(&mut section)
    }

    fn do_rotate(&self, section: &mut LogSection<'_>) -> CoreResult<LogVersion> {
        self.health.assert_healthy::<CoreError>()?;

        let from = section.version();
        if let Some(monitor) = &self.monitor {
            monitor.started(from);
        }
        info!(version = %from, "starting log rotation");

        if !self
            .control
            .await_all_transactions_closed(self.await_closed_timeout)
        {
            // recovery finds the unapplied tail through the new header
            warn!(
                timeout = ?self.await_closed_timeout,
                "transactions still applying after timeout; rotating anyway"
            );
        }
        self.control.force_everything()?;

        // a panic may have been latched while waiting or forcing
        self.health.assert_healthy::<CoreError>()?;

        let last_appended = section.last_appended();
        let to = section.rotate(last_appended)?;
        if let Some(monitor) = &self.monitor {
            monitor.finished(from, to);
        }
        Ok(to)
    }
}
