//! Error types for Trellis core.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::lock::ResourceId;
use crate::types::TransactionId;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Trellis core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] trellis_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot (de)serialization error.
    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// The write-ahead log is corrupted or invalid.
    #[error("log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// A deadlock was detected while acquiring a lock.
    ///
    /// This is the only transient error: the whole transaction should be
    /// retried.
    #[error(transparent)]
    Deadlock(#[from] DeadlockDetected),

    /// Commit, rollback or rollback-only marking failed.
    #[error("{message}")]
    TransactionFailure {
        /// Which outcome failed.
        kind: TransactionFailureKind,
        /// Human-readable explanation.
        message: String,
        /// Underlying failure.
        #[source]
        source: Option<Box<CoreError>>,
    },

    /// The database has panicked and refuses further work.
    #[error(transparent)]
    Panicked(#[from] DatabasePanicked),

    /// The database did not become available in time.
    #[error("database not available after {waited:?}: {blockers}")]
    Unavailable {
        /// How long the caller waited.
        waited: Duration,
        /// Description of what is blocking availability.
        blockers: String,
    },

    /// A mutating operation was invoked on a read-only graph.
    #[error("read-only graph does not support {operation}")]
    ReadOnly {
        /// The rejected operation.
        operation: &'static str,
    },

    /// Node or relationship not found.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// Database directory is locked by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Database has been shut down.
    #[error("database has been shut down")]
    DatabaseShutdown,
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a transaction failure of the given kind.
    pub fn transaction_failure(kind: TransactionFailureKind, source: Option<CoreError>) -> Self {
        Self::TransactionFailure {
            kind,
            message: kind.message().to_string(),
            source: source.map(Box::new),
        }
    }

    /// Returns `true` if retrying the whole transaction may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Deadlock(_))
    }

    /// Returns `true` if this error means the database has panicked.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}

/// Which transaction outcome could not be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionFailureKind {
    /// `success()` was called but the commit failed.
    Commit,
    /// The transaction was rolled back and the rollback failed.
    Rollback,
    /// `failure()` could not mark the transaction rollback-only.
    MarkRollbackOnly,
}

impl TransactionFailureKind {
    fn message(self) -> &'static str {
        match self {
            Self::Commit => "unable to commit transaction",
            Self::Rollback => "unable to rollback transaction",
            Self::MarkRollbackOnly => "unable to mark transaction for rollback",
        }
    }
}

/// A deadlock between two or more transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockDetected {
    /// The transaction whose lock request was refused.
    pub transaction: TransactionId,
    /// The resource it tried to lock.
    pub resource: ResourceId,
    /// The transactions it would have waited for, in wait-for order.
    pub wait_chain: Vec<TransactionId>,
}

impl fmt::Display for DeadlockDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} can't acquire a lock on {} because it is held by another transaction that is \
             itself waiting for a lock held by {} (wait chain: ",
            self.transaction, self.resource, self.transaction
        )?;
        for (i, tx) in self.wait_chain.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{tx}")?;
        }
        write!(
            f,
            "). Two or more transactions are waiting for each other's locks, so none of them can \
             make progress. The transaction has been refused the lock; roll it back and retry. \
             See the \"Deadlocks\" section of the transaction documentation."
        )
    }
}

impl std::error::Error for DeadlockDetected {}

/// The latched failure of a panicked database.
///
/// Returned by [`DatabaseHealth::assert_healthy`](crate::DatabaseHealth::assert_healthy)
/// and carried inside [`CoreError::Panicked`]. The original cause is
/// available through [`std::error::Error::source`].
#[derive(Debug, Clone)]
pub struct DatabasePanicked {
    cause: Arc<CoreError>,
}

impl DatabasePanicked {
    pub(crate) fn new(cause: Arc<CoreError>) -> Self {
        Self { cause }
    }

    /// Returns the error that caused the panic.
    #[must_use]
    pub fn cause(&self) -> &CoreError {
        &self.cause
    }

    /// Returns a shared handle to the cause.
    #[must_use]
    pub fn cause_arc(&self) -> Arc<CoreError> {
        Arc::clone(&self.cause)
    }
}

impl fmt::Display for DatabasePanicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "the database has encountered a critical error and cannot continue: {}",
            self.cause
        )
    }
}

impl std::error::Error for DatabasePanicked {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl From<DatabasePanicked> for io::Error {
    fn from(err: DatabasePanicked) -> Self {
        io::Error::new(io::ErrorKind::Other, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use std::error::Error as _;

    #[test]
    fn only_deadlock_is_transient() {
        let deadlock = CoreError::from(DeadlockDetected {
            transaction: TransactionId::new(1),
            resource: ResourceId::Node(NodeId::new(5)),
            wait_chain: vec![TransactionId::new(2)],
        });
        assert!(deadlock.is_transient());
        assert!(!CoreError::invalid_operation("x").is_transient());
        assert!(!CoreError::transaction_failure(TransactionFailureKind::Commit, None).is_transient());
    }

    #[test]
    fn deadlock_message_explains_mutual_wait() {
        let err = DeadlockDetected {
            transaction: TransactionId::new(1),
            resource: ResourceId::Node(NodeId::new(5)),
            wait_chain: vec![TransactionId::new(2), TransactionId::new(1)],
        };
        let message = err.to_string();
        assert!(message.contains("waiting for each other's locks"));
        assert!(message.contains("Deadlocks"));
        assert!(message.contains("tx:2 -> tx:1"));
    }

    #[test]
    fn transaction_failure_messages() {
        let commit = CoreError::transaction_failure(TransactionFailureKind::Commit, None);
        let rollback = CoreError::transaction_failure(
            TransactionFailureKind::Rollback,
            Some(CoreError::invalid_operation("boom")),
        );
        assert_eq!(commit.to_string(), "unable to commit transaction");
        assert_eq!(rollback.to_string(), "unable to rollback transaction");
        assert!(rollback.source().is_some());
    }

    #[test]
    fn panicked_exposes_cause() {
        let panicked = DatabasePanicked::new(Arc::new(CoreError::log_corruption("torn")));
        let source = panicked.source().unwrap();
        assert!(source.to_string().contains("torn"));

        let io: io::Error = panicked.into();
        assert!(io.to_string().contains("critical error"));
    }
}
