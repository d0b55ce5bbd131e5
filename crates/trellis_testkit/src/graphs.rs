//! Graph builders for common test shapes.
//!
//! Every builder commits its graph in a single transaction and returns the
//! created node ids in creation order.

use trellis_core::{CoreResult, GraphDatabase, NodeId, RelationshipType};

/// The relationship type used by the builders.
pub const LINK: &str = "LINK";

/// A graph described by node indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphShape {
    /// Number of nodes.
    pub node_count: usize,
    /// Relationships as `(start, end)` indices into the nodes.
    pub edges: Vec<(usize, usize)>,
}

impl GraphShape {
    /// A path `0 -> 1 -> ... -> len - 1`.
    pub fn chain(len: usize) -> Self {
        Self {
            node_count: len,
            edges: (1..len).map(|i| (i - 1, i)).collect(),
        }
    }

    /// A `width` x `height` grid with edges pointing right and down.
    ///
    /// Node `(x, y)` has index `y * width + x`.
    pub fn grid(width: usize, height: usize) -> Self {
        let mut edges = Vec::new();
        for y in 0..height {
            for x in 0..width {
                let index = y * width + x;
                if x + 1 < width {
                    edges.push((index, index + 1));
                }
                if y + 1 < height {
                    edges.push((index, index + width));
                }
            }
        }
        Self {
            node_count: width * height,
            edges,
        }
    }

    /// A root with `fanout` children per node, `depth` levels deep.
    pub fn tree(fanout: usize, depth: usize) -> Self {
        let mut node_count = 1;
        let mut edges = Vec::new();
        let mut level = vec![0];
        for _ in 0..depth {
            let mut next = Vec::with_capacity(level.len() * fanout);
            for parent in level {
                for _ in 0..fanout {
                    edges.push((parent, node_count));
                    next.push(node_count);
                    node_count += 1;
                }
            }
            level = next;
        }
        Self { node_count, edges }
    }

    /// Commits the shape to `db` with every relationship typed `rel_type`.
    ///
    /// # Errors
    ///
    /// Returns the transaction error if the commit fails.
    ///
    /// # Panics
    ///
    /// Panics if an edge refers to a node index outside the shape.
    pub fn build(&self, db: &GraphDatabase, rel_type: &str) -> CoreResult<Vec<NodeId>> {
        let rel_type = RelationshipType::new(rel_type);
        db.transaction(|tx| {
            let nodes = (0..self.node_count)
                .map(|_| tx.create_node())
                .collect::<CoreResult<Vec<_>>>()?;
            for &(start, end) in &self.edges {
                tx.create_relationship(nodes[start], nodes[end], rel_type.clone())?;
            }
            Ok(nodes)
        })
    }
}

/// Builds a chain of `len` nodes linked by [`LINK`] relationships.
///
/// # Errors
///
/// Returns the transaction error if the commit fails.
pub fn chain(db: &GraphDatabase, len: usize) -> CoreResult<Vec<NodeId>> {
    GraphShape::chain(len).build(db, LINK)
}

/// Builds a grid; see [`GraphShape::grid`].
///
/// # Errors
///
/// Returns the transaction error if the commit fails.
pub fn grid(db: &GraphDatabase, width: usize, height: usize) -> CoreResult<Vec<NodeId>> {
    GraphShape::grid(width, height).build(db, LINK)
}

/// Builds a tree; see [`GraphShape::tree`].
///
/// # Errors
///
/// Returns the transaction error if the commit fails.
pub fn tree(db: &GraphDatabase, fanout: usize, depth: usize) -> CoreResult<Vec<NodeId>> {
    GraphShape::tree(fanout, depth).build(db, LINK)
}
