//! Lazy graph traversals.
//!
//! A [`TraversalDescription`] walks outward from one node. A
//! [`BidirectionalTraversalDescription`] grows two frontiers, one from
//! each end, and reports the paths where they meet.
//!
//! ## Moving parts
//!
//! - Each side grows a tree of branches. A branch is expanded only when
//!   its selector asks for its next child, so unexplored parts of the
//!   graph are never read.
//! - The [`BranchOrdering`] of a side decides which branch is expanded
//!   next; its [`Uniqueness`] decides which revisits are rejected; its
//!   evaluators decide which branches are results and which are pruned.
//! - A [`SideSelectorPolicy`] interleaves the two sides of a
//!   bidirectional traversal.
//! - Every branch a side produces is checked for a collision with the
//!   other side. A collision is joined into a [`Path`], filtered, checked
//!   against the paths already returned, and evaluated. The
//!   [`BranchCollisionPolicy`] may restrict results further.
//!
//! Traversals are single threaded iterators. They read committed state
//! through [`GraphRead`](crate::store::GraphRead) and are stopped by
//! dropping them.

mod branch;
mod collision;
mod description;
mod evaluator;
mod expander;
mod orderer;
mod path;
mod selector;
mod uniqueness;

pub use collision::BranchCollisionPolicy;
pub use description::{
    BidirectionalTraversalDescription, BidirectionalTraverser, PathFilter, TraversalDescription,
    TraversalStats, Traverser,
};
pub use evaluator::{Evaluation, Evaluator, Evaluators};
pub use expander::Expander;
pub use orderer::{Side, SideSelectorPolicy};
pub use path::{GraphPath, Path};
pub use selector::BranchOrdering;
pub use uniqueness::{Uniqueness, UniquenessFilter};
