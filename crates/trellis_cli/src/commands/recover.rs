//! Recover command implementation.

use serde::Serialize;
use std::path::Path;
use tracing::info;
use trellis_core::{Config, GraphDatabase, GraphRead};

use super::{emit, existing_segments, OutputFormat};
use crate::error::CliResult;

/// What recovery did.
#[derive(Debug, Serialize)]
pub struct RecoverResult {
    /// Segment that was checked.
    pub version: u64,
    /// Whether replay ran.
    pub required: bool,
    /// Replayed transactions, in log order.
    pub replayed: Vec<u64>,
    /// Committed transactions the store already had.
    pub already_applied: usize,
    /// Torn or uncommitted bytes cut from the tail.
    pub truncated_bytes: u64,
    /// Last committed transaction after recovery.
    pub last_committed: u64,
    /// Nodes in the recovered graph.
    pub node_count: usize,
    /// Relationships in the recovered graph.
    pub relationship_count: usize,
}

/// Runs the recover command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let result = recover(path)?;
    emit(&result, format, print_text_output)
}

/// Opens the database at `path`, which replays the log if needed, then
/// shuts it down so the next open starts from a checkpoint.
pub fn recover(path: &Path) -> CliResult<RecoverResult> {
    existing_segments(path)?;
    let db = GraphDatabase::open(path, Config::default().create_if_missing(false))?;
    let report = db.recovery_report();

    let result = RecoverResult {
        version: report.version.as_u64(),
        required: report.required,
        replayed: report.replayed.iter().map(|txid| txid.as_u64()).collect(),
        already_applied: report.already_applied,
        truncated_bytes: report.truncated_bytes,
        last_committed: db.last_committed_transaction().as_u64(),
        node_count: db.graph().node_count(),
        relationship_count: db.graph().relationship_count(),
    };
    db.shutdown()?;
    info!(replayed = result.replayed.len(), "recovery finished");
    Ok(result)
}

fn print_text_output(result: &RecoverResult) {
    println!("Trellis Recovery");
    println!("================");
    println!();
    if result.required {
        println!(
            "Replayed {} transaction(s) from log v{}",
            result.replayed.len(),
            result.version
        );
        println!("  Already applied: {}", result.already_applied);
        println!("  Truncated:       {} bytes", result.truncated_bytes);
    } else {
        println!("Log v{} is clean; nothing to replay", result.version);
    }
    println!();
    println!("Last committed: {}", result.last_committed);
    println!("Nodes:          {}", result.node_count);
    println!("Relationships:  {}", result.relationship_count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::inspect::inspect;
    use crate::commands::test_support::populate;

    #[test]
    fn replays_a_crashed_log_once() {
        let dir = tempfile::tempdir().unwrap();
        populate(dir.path(), 3, true);

        let first = recover(dir.path()).unwrap();
        assert!(first.required);
        assert_eq!(first.replayed.len(), 3);
        assert_eq!(first.node_count, 6);
        assert_eq!(first.relationship_count, 3);
        assert!(!inspect(dir.path()).unwrap().recovery_required);

        let second = recover(dir.path()).unwrap();
        assert!(!second.required);
        assert!(second.replayed.is_empty());
        assert_eq!(second.node_count, 6);
    }

    #[test]
    fn refuses_an_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(recover(dir.path()).is_err());
    }
}
