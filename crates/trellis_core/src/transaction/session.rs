use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::CoreResult;
use crate::store::GraphRead;
use crate::transaction::kernel::KernelTransaction;
use crate::transaction::manager::TransactionManager;
use crate::transaction::top_level::{PlaceboTransaction, TopLevelTransaction, Transaction};

/// The caller-owned transaction context.
///
/// A session has at most one active top-level transaction. Beginning
/// again while it is open yields a placebo onto the same transaction, so
/// nested code paths can each "begin" without committing early.
pub struct Session {
    manager: Arc<TransactionManager>,
    graph: Arc<dyn GraphRead + Send + Sync>,
    active: Mutex<Option<Arc<KernelTransaction>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.active.lock().as_ref().map(|tx| tx.id()))
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session over `manager`, reading committed state from
    /// `graph`.
    pub fn new(manager: Arc<TransactionManager>, graph: Arc<dyn GraphRead + Send + Sync>) -> Self {
        Self {
            manager,
            graph,
            active: Mutex::new(None),
        }
    }

    /// Begins a transaction, or a placebo if one is already active.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable`, `DatabaseShutdown` or `Panicked` if a new
    /// top-level transaction cannot start.
    pub fn begin(&self) -> CoreResult<Transaction<'_>> {
        let mut active = self.active.lock();
        if let Some(kernel) = active.as_ref().filter(|kernel| !kernel.is_closed()) {
            return Ok(Transaction::Placebo(PlaceboTransaction::new(
                Arc::clone(kernel),
                self,
            )));
        }

        let kernel = self.manager.begin()?;
        *active = Some(Arc::clone(&kernel));
        Ok(Transaction::TopLevel(TopLevelTransaction::new(kernel, self)))
    }

    /// Returns `true` while a top-level transaction is open.
    #[must_use]
    pub fn has_active_transaction(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|kernel| !kernel.is_closed())
    }

    /// Committed graph state.
    #[must_use]
    pub fn graph(&self) -> &dyn GraphRead {
        self.graph.as_ref()
    }

    pub(crate) fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    pub(crate) fn clear_active(&self, kernel: &Arc<KernelTransaction>) {
        let mut active = self.active.lock();
        if active
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, kernel))
        {
            *active = None;
        }
    }
}
