//! Benchmark utilities.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use trellis_core::{CoreResult, GraphDatabase, NodeId, PropertyValue};

/// Seed shared by every generated graph, so runs are comparable.
pub const SEED: u64 = 0x5eed;

/// Generate a random text property of the specified length.
pub fn random_text(rng: &mut impl Rng, len: usize) -> PropertyValue {
    let text = (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    PropertyValue::Text(text)
}

/// Builds a layered graph: `layers` rows of `width` nodes, each node
/// linked to `fanout` random nodes of the next row.
///
/// Returns the single source and sink, which are linked to every node of
/// the first and last row.
pub fn layered_graph(
    db: &GraphDatabase,
    layers: usize,
    width: usize,
    fanout: usize,
) -> CoreResult<(NodeId, NodeId)> {
    let mut rng = StdRng::seed_from_u64(SEED);
    db.transaction(|tx| {
        let source = tx.create_node()?;
        let sink = tx.create_node()?;
        let mut rows = Vec::with_capacity(layers);
        for _ in 0..layers {
            let row = (0..width)
                .map(|_| tx.create_node())
                .collect::<CoreResult<Vec<_>>>()?;
            rows.push(row);
        }

        if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
            for &node in first {
                tx.create_relationship(source, node, "NEXT")?;
            }
            for &node in last {
                tx.create_relationship(node, sink, "NEXT")?;
            }
        }
        for pair in rows.windows(2) {
            for &from in &pair[0] {
                for _ in 0..fanout {
                    let to = pair[1][rng.gen_range(0..width)];
                    tx.create_relationship(from, to, "NEXT")?;
                }
            }
        }
        Ok((source, sink))
    })
}
