//! # Trellis Testkit
//!
//! Test utilities for Trellis.
//!
//! This crate provides:
//! - Test fixtures that can restart or crash a database and reopen it
//! - Crash injection for log segments
//! - Graph builders for common shapes
//! - Property-based test generators using proptest
//! - Canonical graph dumps for comparing state across recovery
//! - Stress testing utilities
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trellis_testkit::prelude::*;
//!
//! #[test]
//! fn survives_crash() {
//!     let db = TestDatabase::memory();
//!     chain(&db, 5).unwrap();
//!     let before = GraphState::capture(db.store());
//!     let db = db.crash();
//!     assert_same_state(&before, &GraphState::capture(db.store()));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod graphs;
pub mod state;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::graphs::*;
    pub use crate::state::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use graphs::*;
pub use state::*;
pub use stress::*;
