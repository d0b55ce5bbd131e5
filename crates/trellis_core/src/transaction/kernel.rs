use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult, TransactionFailureKind};
use crate::lock::{LockManager, LockMode, ResourceId};
use crate::types::TransactionId;
use crate::wal::Command;

/// The resource-manager side of a transaction.
///
/// Shared between the top-level handle and any placebos, so outcome flags
/// set through either are seen by the real commit.
pub struct KernelTransaction {
    id: TransactionId,
    locks: Arc<dyn LockManager>,
    success: AtomicBool,
    failure: AtomicBool,
    rollback_only: AtomicBool,
    closed: AtomicBool,
    commands: Mutex<Vec<Command>>,
}

impl std::fmt::Debug for KernelTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelTransaction")
            .field("id", &self.id)
            .field("success", &self.success.load(Ordering::SeqCst))
            .field("failure", &self.failure.load(Ordering::SeqCst))
            .field("rollback_only", &self.is_rollback_only())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl KernelTransaction {
    pub(crate) fn new(id: TransactionId, locks: Arc<dyn LockManager>) -> Self {
        Self {
            id,
            locks,
            success: AtomicBool::new(false),
            failure: AtomicBool::new(false),
            rollback_only: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Returns the transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn mark_success(&self) {
        self.success.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_failure(&self) {
        self.failure.store(true, Ordering::SeqCst);
    }

    pub(crate) fn was_success_marked(&self) -> bool {
        self.success.load(Ordering::SeqCst)
    }

    /// Marks the transaction so that it can only roll back.
    ///
    /// # Errors
    ///
    /// Fails with a `MarkRollbackOnly` transaction failure if the
    /// transaction has already closed.
    pub fn mark_rollback_only(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::transaction_failure(
                TransactionFailureKind::MarkRollbackOnly,
                Some(CoreError::invalid_operation(format!(
                    "transaction {} is already closed",
                    self.id
                ))),
            ));
        }
        self.rollback_only.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Returns `true` once the transaction can no longer commit.
    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    /// Returns `true` once commit or rollback has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Commit iff success was marked and neither failure nor rollback-only.
    pub(crate) fn should_commit(&self) -> bool {
        self.success.load(Ordering::SeqCst)
            && !self.failure.load(Ordering::SeqCst)
            && !self.is_rollback_only()
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            return Err(CoreError::invalid_operation(format!(
                "transaction {} is closed",
                self.id
            )));
        }
        Ok(())
    }

    pub(crate) fn acquire(&self, resource: ResourceId, mode: LockMode) -> CoreResult<()> {
        self.ensure_open()?;
        self.locks.acquire(self.id, resource, mode)
    }

    pub(crate) fn release(&self, resource: ResourceId, mode: LockMode) {
        self.locks.release(self.id, resource, mode);
    }

    pub(crate) fn release_all_locks(&self) {
        self.locks.release_all(self.id);
    }

    pub(crate) fn record(&self, command: Command) {
        self.commands.lock().push(command);
    }

    pub(crate) fn take_commands(&self) -> Vec<Command> {
        std::mem::take(&mut *self.commands.lock())
    }

    /// Number of buffered commands.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.commands.lock().len()
    }
}
