//! # Trellis Core
//!
//! Transactional core and traversal engine of the Trellis embedded graph
//! database.
//!
//! This crate provides:
//! - Transactions with placebo nesting, entity locks and deadlock detection
//! - A write-ahead log with rotation and crash recovery
//! - An availability guard and a database health latch
//! - An in-memory graph store persisted as snapshots
//! - Lazy mono- and bidirectional graph traversals
//!
//! ## Example
//!
//! ```rust,ignore
//! use trellis_core::{BidirectionalTraversalDescription, GraphDatabase};
//!
//! let db = GraphDatabase::open_in_memory()?;
//! let (a, c) = db.transaction(|tx| {
//!     let a = tx.create_node()?;
//!     let b = tx.create_node()?;
//!     let c = tx.create_node()?;
//!     tx.create_relationship(a, b, "NEXT")?;
//!     tx.create_relationship(b, c, "NEXT")?;
//!     Ok((a, c))
//! })?;
//!
//! for path in BidirectionalTraversalDescription::default().traverse(db.graph(), a, c) {
//!     println!("{}", path?);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod availability;
mod clock;
mod config;
mod database;
mod dir;
mod error;
mod health;
pub mod lock;
mod recovery;
mod rotation;
pub mod store;
pub mod transaction;
pub mod traversal;
mod types;
pub mod wal;

pub use availability::{AvailabilityGuard, AvailabilityListener, AvailabilityRequirement};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::Config;
pub use database::GraphDatabase;
pub use dir::DatabaseDir;
pub use error::{
    CoreError, CoreResult, DatabasePanicked, DeadlockDetected, TransactionFailureKind,
};
pub use health::{DatabaseHealth, PanicListener};
pub use recovery::{
    oldest_transaction_timestamp, Recovery, RecoveryMonitor, RecoveryReport,
    RecoveryRequiredChecker, RecoveryState,
};
pub use rotation::{DatabaseRotationControl, LogRotation, LogRotationControl, LogRotationMonitor};
pub use store::{GraphRead, GraphStore, GraphWrite};
pub use transaction::{Session, Transaction};
pub use traversal::{
    BidirectionalTraversalDescription, Evaluation, Evaluators, Expander, Path,
    TraversalDescription, Uniqueness,
};
pub use types::{
    Direction, LogPosition, LogVersion, NodeId, PropertyValue, Relationship, RelationshipId,
    RelationshipType, TransactionId,
};

/// Crate version, as reported by tooling.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
