//! Dump log command implementation.

use serde::Serialize;
use std::path::Path;
use trellis_core::wal::{open_reader, Command, LogEntry, SegmentStore};
use trellis_core::LogVersion;

use super::{emit, existing_segments, OutputFormat};
use crate::error::{CliError, CliResult};

/// A decoded log entry and where it starts.
#[derive(Debug, Serialize)]
pub struct LogEntryInfo {
    /// Offset in the segment.
    pub offset: u64,
    /// Decoded entry.
    pub entry: LogEntry,
}

/// Result of dumping one segment.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    /// Segment version.
    pub version: u64,
    /// Entries in log order.
    pub entries: Vec<LogEntryInfo>,
    /// Offset just past the last entry dumped.
    pub next_offset: u64,
    /// Bytes after the last complete entry, once the segment was read to
    /// its end.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub torn_bytes: Option<u64>,
    /// Corruption that stopped the dump early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    version: Option<u64>,
    offset: u64,
    limit: Option<usize>,
    format: OutputFormat,
) -> CliResult<()> {
    let result = dump(path, version.map(LogVersion::new), offset, limit)?;
    emit(&result, format, print_text_output)
}

/// Reads up to `limit` entries of segment `version` (the newest when
/// `None`), starting at byte `offset`.
pub fn dump(
    path: &Path,
    version: Option<LogVersion>,
    offset: u64,
    limit: Option<usize>,
) -> CliResult<DumpResult> {
    let segments = existing_segments(path)?;
    let versions = segments.versions()?;
    let version = match version {
        Some(v) if versions.contains(&v) => v,
        Some(v) => return Err(CliError::NoSuchSegment(v)),
        None => match versions.last() {
            Some(&v) => v,
            None => return Err(CliError::NoDatabase(path.to_path_buf())),
        },
    };

    let mut reader = open_reader(&segments, version, offset)?;
    let max_entries = limit.unwrap_or(usize::MAX);
    let mut entries = Vec::new();
    let mut error = None;
    let mut exhausted = true;

    while entries.len() < max_entries {
        match reader.next() {
            Some(Ok((position, entry))) => entries.push(LogEntryInfo {
                offset: position.offset,
                entry,
            }),
            Some(Err(err)) => {
                error = Some(err.to_string());
                break;
            }
            None => break,
        }
    }
    if entries.len() == max_entries && error.is_none() {
        exhausted = false;
    }

    Ok(DumpResult {
        version: version.as_u64(),
        entries,
        next_offset: reader.position().offset,
        torn_bytes: (exhausted && error.is_none()).then(|| reader.torn_bytes()),
        error,
    })
}

fn describe(entry: &LogEntry) -> String {
    match entry {
        LogEntry::Start { txid, timestamp } => format!("START      {txid} at={timestamp}"),
        LogEntry::Commit { txid, timestamp } => format!("COMMIT     {txid} at={timestamp}"),
        LogEntry::Checkpoint { last_txid } => format!("CHECKPOINT through {last_txid}"),
        LogEntry::Command { txid, command } => {
            let detail = match command {
                Command::CreateNode { node } => format!("create node {node}"),
                Command::DeleteNode { node } => format!("delete node {node}"),
                Command::CreateRelationship {
                    id,
                    start,
                    end,
                    rel_type,
                } => format!("create rel {id} ({start})-[{rel_type}]->({end})"),
                Command::DeleteRelationship { id } => format!("delete rel {id}"),
                Command::SetNodeProperty { node, key, value } => {
                    format!("set {node}.{key} = {value:?}")
                }
                Command::RemoveNodeProperty { node, key } => format!("remove {node}.{key}"),
            };
            format!("COMMAND    {txid} {detail}")
        }
    }
}

fn print_text_output(result: &DumpResult) {
    println!(
        "Log segment v{} ({} entries)",
        result.version,
        result.entries.len()
    );
    println!("================");
    println!();

    for info in &result.entries {
        println!("[{:08}] {}", info.offset, describe(&info.entry));
    }

    println!();
    println!("Next offset: {}", result.next_offset);
    if let Some(torn) = result.torn_bytes.filter(|torn| *torn > 0) {
        println!("Torn tail:   {torn} bytes");
    }
    if let Some(error) = &result.error {
        println!("Stopped at corruption: {error}");
    }
}
