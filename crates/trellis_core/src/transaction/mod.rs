//! Transactions.
//!
//! A [`Session`] is the explicit context a caller threads through its
//! work. [`Session::begin`] returns a top-level [`Transaction`] or, if
//! one is already open on the session, a placebo sharing it. Writes take
//! exclusive entity locks and are buffered; nothing reaches the log until
//! the top-level transaction commits.
//!
//! ## Deadlocks
//!
//! Lock acquisition fails with [`CoreError::Deadlock`](crate::CoreError)
//! when two or more transactions would wait for each other's locks
//! forever. The error is transient: roll back and retry the whole
//! transaction.

mod kernel;
mod manager;
mod session;
#[cfg(test)]
mod testing;
mod top_level;
mod tracker;

pub use kernel::KernelTransaction;
pub use manager::{TransactionManager, TransactionManagerParts};
pub use session::Session;
pub use top_level::{Lock, PlaceboTransaction, TopLevelTransaction, Transaction};
pub use tracker::{ApplyTicket, TransactionTracker};
