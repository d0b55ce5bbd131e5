//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use trellis_core::wal::{open_reader, SegmentStore};
use trellis_core::{oldest_transaction_timestamp, RecoveryRequiredChecker};

use super::{emit, existing_segments, format_size, OutputFormat};
use crate::error::CliResult;

/// One log segment.
#[derive(Debug, Serialize)]
pub struct SegmentInfo {
    /// Segment version.
    pub version: u64,
    /// File location.
    pub location: String,
    /// Size in bytes, header included.
    pub size: u64,
    /// Last transaction committed before the segment was created.
    pub last_committed_before: u64,
    /// Start time of the first transaction in the segment, in milliseconds
    /// since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_transaction_timestamp: Option<u64>,
}

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Segments in ascending version order.
    pub segments: Vec<SegmentInfo>,
    /// Total log size in bytes.
    pub total_size: u64,
    /// Whether the next open will replay the newest segment.
    pub recovery_required: bool,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> CliResult<()> {
    let result = inspect(path)?;
    emit(&result, format, print_text_output)
}

/// Collects segment statistics for the database at `path`.
pub fn inspect(path: &Path) -> CliResult<InspectResult> {
    let segments = existing_segments(path)?;
    let versions = segments.versions()?;

    let mut infos = Vec::with_capacity(versions.len());
    for &version in &versions {
        let reader = open_reader(&segments, version, 0)?;
        let size = segments.open_reader(version)?.size()?;
        infos.push(SegmentInfo {
            version: version.as_u64(),
            location: segments.describe(version),
            size,
            last_committed_before: reader.header().last_committed.as_u64(),
            oldest_transaction_timestamp: oldest_transaction_timestamp(&segments, version),
        });
    }

    let recovery_required = match versions.last() {
        Some(&latest) => {
            let shared: Arc<dyn SegmentStore> = Arc::new(segments.clone());
            RecoveryRequiredChecker::new(shared).is_recovery_required_lenient(latest)
        }
        None => false,
    };

    Ok(InspectResult {
        path: path.display().to_string(),
        total_size: infos.iter().map(|info| info.size).sum(),
        segments: infos,
        recovery_required,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Trellis Database Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Log segments:");
    for segment in &result.segments {
        print!(
            "  v{:<6} {:>10}  after tx {}",
            segment.version,
            format_size(segment.size),
            segment.last_committed_before
        );
        if let Some(ts) = segment.oldest_transaction_timestamp {
            print!("  oldest tx at {ts} ms");
        }
        println!();
    }
    println!();
    println!("Total size: {}", format_size(result.total_size));
    println!(
        "Recovery:   {}",
        if result.recovery_required {
            "required on next open"
        } else {
            "not required"
        }
    );
}
