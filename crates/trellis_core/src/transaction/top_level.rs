use std::sync::Arc;
use tracing::error;

use crate::error::{CoreError, CoreResult, TransactionFailureKind};
use crate::lock::{LockMode, ResourceId};
use crate::store::{GraphRead, StorageLayer};
use crate::transaction::kernel::KernelTransaction;
use crate::transaction::session::Session;
use crate::types::{NodeId, PropertyValue, RelationshipId, RelationshipType, TransactionId};
use crate::wal::Command;

/// A lock held by a transaction.
///
/// Dropping the handle keeps the lock; it is released by
/// [`release`](Self::release) or when the transaction closes.
#[derive(Debug)]
pub struct Lock {
    tx: Arc<KernelTransaction>,
    resource: ResourceId,
    mode: LockMode,
}

impl Lock {
    /// The locked resource.
    #[must_use]
    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    /// The lock mode.
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock before the transaction closes.
    pub fn release(self) {
        self.tx.release(self.resource, self.mode);
    }
}

/// The outermost transaction of a session. Closing it commits or rolls
/// back.
#[derive(Debug)]
pub struct TopLevelTransaction<'s> {
    kernel: Arc<KernelTransaction>,
    session: &'s Session,
    closed: bool,
}

/// A nested transaction standing in for the session's active one.
///
/// Closing it never commits or rolls back; it only feeds the outer
/// transaction's decision.
#[derive(Debug)]
pub struct PlaceboTransaction<'s> {
    kernel: Arc<KernelTransaction>,
    session: &'s Session,
    success: bool,
    closed: bool,
}

/// A transaction handle returned by [`Session::begin`].
///
/// Outcome: the transaction commits on close iff [`success`](Self::success)
/// was called and [`failure`](Self::failure) was not. Dropping an open
/// transaction closes it.
///
/// # Example
///
/// ```rust,ignore
/// let session = db.session();
/// let mut tx = session.begin()?;
/// let alice = tx.create_node()?;
/// tx.set_node_property(alice, "name", "Alice".into())?;
/// tx.success();
/// tx.close()?;
/// ```
#[derive(Debug)]
pub enum Transaction<'s> {
    /// The real transaction.
    TopLevel(TopLevelTransaction<'s>),
    /// A nested handle onto the real transaction.
    Placebo(PlaceboTransaction<'s>),
}

impl<'s> TopLevelTransaction<'s> {
    pub(crate) fn new(kernel: Arc<KernelTransaction>, session: &'s Session) -> Self {
        Self {
            kernel,
            session,
            closed: false,
        }
    }

    fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let committing = self.kernel.should_commit();
        let manager = self.session.manager();
        let result = if committing {
            manager.commit(&self.kernel)
        } else {
            manager.rollback(&self.kernel)
        };
        self.session.clear_active(&self.kernel);

        result.map_err(|err| {
            let kind = if self.kernel.was_success_marked() {
                TransactionFailureKind::Commit
            } else {
                TransactionFailureKind::Rollback
            };
            match err {
                err @ CoreError::TransactionFailure { .. } => err,
                err => CoreError::transaction_failure(kind, Some(err)),
            }
        })
    }
}

impl<'s> PlaceboTransaction<'s> {
    pub(crate) fn new(kernel: Arc<KernelTransaction>, session: &'s Session) -> Self {
        Self {
            kernel,
            session,
            success: false,
            closed: false,
        }
    }

    fn close(&mut self) -> CoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.success {
            Ok(())
        } else {
            self.kernel.mark_failure();
            self.kernel.mark_rollback_only()
        }
    }
}

impl<'s> Transaction<'s> {
    fn kernel(&self) -> &Arc<KernelTransaction> {
        match self {
            Self::TopLevel(tx) => &tx.kernel,
            Self::Placebo(tx) => &tx.kernel,
        }
    }

    fn session(&self) -> &'s Session {
        match self {
            Self::TopLevel(tx) => tx.session,
            Self::Placebo(tx) => tx.session,
        }
    }

    /// The id of the underlying transaction, shared by placebos.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.kernel().id()
    }

    /// Returns `true` for a nested placebo handle.
    #[must_use]
    pub fn is_placebo(&self) -> bool {
        matches!(self, Self::Placebo(_))
    }

    /// Returns `true` once this handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match self {
            Self::TopLevel(tx) => tx.closed,
            Self::Placebo(tx) => tx.closed,
        }
    }

    /// Marks the transaction for commit. Does not commit.
    pub fn success(&mut self) {
        match self {
            Self::TopLevel(tx) => tx.kernel.mark_success(),
            Self::Placebo(tx) => tx.success = true,
        }
    }

    /// Marks the transaction for rollback, overriding any `success`.
    ///
    /// # Errors
    ///
    /// Fails with a `MarkRollbackOnly` transaction failure if the
    /// underlying transaction has already closed.
    pub fn failure(&mut self) -> CoreResult<()> {
        let kernel = self.kernel();
        kernel.mark_failure();
        kernel.mark_rollback_only()
    }

    /// Closes the handle. Idempotent.
    ///
    /// A top-level transaction commits or rolls back here; a placebo only
    /// marks the outer transaction for rollback if `success` was never
    /// called on it.
    ///
    /// # Errors
    ///
    /// Returns a transaction failure: "unable to commit" if `success` was
    /// called and the commit failed, "unable to rollback" otherwise.
    pub fn close(&mut self) -> CoreResult<()> {
        match self {
            Self::TopLevel(tx) => tx.close(),
            Self::Placebo(tx) => tx.close(),
        }
    }

    /// Takes a shared lock on `resource` for the rest of the transaction.
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` if waiting would deadlock.
    pub fn acquire_read_lock(&self, resource: impl Into<ResourceId>) -> CoreResult<Lock> {
        self.lock(resource.into(), LockMode::Shared)
    }

    /// Takes an exclusive lock on `resource` for the rest of the
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `Deadlock` if waiting would deadlock.
    pub fn acquire_write_lock(&self, resource: impl Into<ResourceId>) -> CoreResult<Lock> {
        self.lock(resource.into(), LockMode::Exclusive)
    }

    fn lock(&self, resource: ResourceId, mode: LockMode) -> CoreResult<Lock> {
        let kernel = self.kernel();
        kernel.acquire(resource, mode)?;
        Ok(Lock {
            tx: Arc::clone(kernel),
            resource,
            mode,
        })
    }

    fn write(&self, resources: &[ResourceId], command: Command) -> CoreResult<()> {
        let kernel = self.kernel();
        for resource in resources {
            kernel.acquire(*resource, LockMode::Exclusive)?;
        }
        kernel.record(command);
        Ok(())
    }

    fn store(&self) -> &'s Arc<dyn StorageLayer> {
        self.session().manager().store()
    }

    /// Creates a node.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed.
    pub fn create_node(&self) -> CoreResult<NodeId> {
        self.kernel().ensure_open()?;
        let node = self.store().next_node_id();
        self.write(&[node.into()], Command::CreateNode { node })?;
        Ok(node)
    }

    /// Creates a relationship from `start` to `end`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or locking deadlocks.
    /// Missing nodes are reported at commit.
    pub fn create_relationship(
        &self,
        start: NodeId,
        end: NodeId,
        rel_type: impl Into<RelationshipType>,
    ) -> CoreResult<RelationshipId> {
        self.kernel().ensure_open()?;
        let id = self.store().next_relationship_id();
        self.write(
            &[start.into(), end.into(), id.into()],
            Command::CreateRelationship {
                id,
                start,
                end,
                rel_type: rel_type.into(),
            },
        )?;
        Ok(id)
    }

    /// Deletes a node, which must have no relationships by commit time.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or locking deadlocks.
    pub fn delete_node(&self, node: NodeId) -> CoreResult<()> {
        self.write(&[node.into()], Command::DeleteNode { node })
    }

    /// Deletes a relationship.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or locking deadlocks.
    pub fn delete_relationship(&self, id: RelationshipId) -> CoreResult<()> {
        self.write(&[id.into()], Command::DeleteRelationship { id })
    }

    /// Sets a node property.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or locking deadlocks.
    pub fn set_node_property(
        &self,
        node: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> CoreResult<()> {
        self.write(
            &[node.into()],
            Command::SetNodeProperty {
                node,
                key: key.to_string(),
                value,
            },
        )
    }

    /// Removes a node property.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is closed or locking deadlocks.
    pub fn remove_node_property(&self, node: NodeId, key: &str) -> CoreResult<()> {
        self.write(
            &[node.into()],
            Command::RemoveNodeProperty {
                node,
                key: key.to_string(),
            },
        )
    }

    /// Committed graph state, without this transaction's pending writes.
    #[must_use]
    pub fn graph(&self) -> &'s dyn GraphRead {
        self.session().graph()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        let id = self.id();
        if let Err(err) = self.close() {
            error!(txid = %id, error = %err, "implicit transaction close failed");
        }
    }
}
