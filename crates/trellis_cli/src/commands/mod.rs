//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod recover;

use clap::ValueEnum;
use serde::Serialize;
use std::path::Path;
use trellis_core::wal::{DirectorySegments, SegmentStore};

use crate::error::{CliError, CliResult};

/// How a command prints its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Prints `value` as JSON, or with `text` otherwise.
fn emit<T: Serialize>(value: &T, format: OutputFormat, text: impl FnOnce(&T)) -> CliResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => text(value),
    }
    Ok(())
}

/// Opens the log segments of an existing database directory.
///
/// Segments are read without taking the directory lock, so a database that
/// is open elsewhere can still be inspected.
fn existing_segments(path: &Path) -> CliResult<DirectorySegments> {
    if !path.is_dir() {
        return Err(CliError::NoDatabase(path.to_path_buf()));
    }
    let segments = DirectorySegments::new(path);
    if segments.versions()?.is_empty() {
        return Err(CliError::NoDatabase(path.to_path_buf()));
    }
    Ok(segments)
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{}", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use trellis_core::{Config, CoreError, GraphDatabase};

    /// Commits `count` single-node transactions in `dir`.
    ///
    /// With `crash` the database is latched into a panic before it is
    /// dropped, so the log keeps entries after its last checkpoint.
    pub fn populate(dir: &Path, count: usize, crash: bool) {
        let db = GraphDatabase::open(dir, Config::default()).unwrap();
        for _ in 0..count {
            db.transaction(|tx| {
                let a = tx.create_node()?;
                let b = tx.create_node()?;
                tx.create_relationship(a, b, "LINK")?;
                Ok(())
            })
            .unwrap();
        }
        if crash {
            db.health()
                .panic(CoreError::invalid_operation("simulated crash"));
        } else {
            db.shutdown().unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_not_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            existing_segments(&missing),
            Err(CliError::NoDatabase(_))
        ));
        assert!(matches!(
            existing_segments(dir.path()),
            Err(CliError::NoDatabase(_))
        ));
    }

    #[test]
    fn sizes_scale_units() {
        assert_eq!(format_size(512), "512");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
