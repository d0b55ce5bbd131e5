//! Trellis CLI
//!
//! Command-line tools for Trellis database directories.
//!
//! # Commands
//!
//! - `inspect` - Display log segments and whether recovery is pending
//! - `dump-log` - Dump decoded log entries for debugging
//! - `recover` - Open the database, run recovery and shut down cleanly

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use commands::OutputFormat;

/// Trellis command-line database tools.
#[derive(Parser)]
#[command(name = "trellis")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log segments, sizes and recovery state
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Dump log entries for debugging
    DumpLog {
        /// Segment to dump (defaults to the newest)
        #[arg(long)]
        version: Option<u64>,

        /// Start from this byte offset
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Maximum number of entries to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Run recovery and shut the database down cleanly
    Recover {
        /// Output format (text, json)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::DumpLog {
            version,
            offset,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Database path required for dump-log")?;
            commands::dump_log::run(&path, version, offset, limit, format)?;
        }
        Commands::Recover { format } => {
            let path = cli.path.ok_or("Database path required for recover")?;
            commands::recover::run(&path, format)?;
        }
        Commands::Version => {
            println!("Trellis CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Trellis Core v{}", trellis_core::VERSION);
        }
    }

    Ok(())
}
