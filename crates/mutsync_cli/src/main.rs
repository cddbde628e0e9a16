//! mutsync CLI
//!
//! Command-line tools for outbox logs.
//!
//! # Commands
//!
//! - `inspect` - Display log statistics
//! - `dump` - List pending mutations (or every frame)
//! - `verify` - Check frame integrity
//! - `compact` - Rewrite the log with only pending mutations
//! - `purge` - Drop one pending mutation by ID

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// mutsync outbox maintenance tools.
#[derive(Parser)]
#[command(name = "mutsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the outbox log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display log statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List pending mutations
    Dump {
        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print every frame, removals included
        #[arg(short, long)]
        all: bool,

        /// Decode payloads as CBOR
        #[arg(long)]
        payloads: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify frame integrity
    Verify,

    /// Rewrite the log with only pending mutations
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Drop one pending mutation so it is never published
    Purge {
        /// Mutation ID to drop
        mutation_id: Uuid,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Outbox path required for inspect")?;
            commands::inspect::run(&path, format)?;
        }
        Commands::Dump {
            limit,
            all,
            payloads,
            format,
        } => {
            let path = cli.path.ok_or("Outbox path required for dump")?;
            commands::dump::run(&path, limit, all, payloads, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Outbox path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Outbox path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Purge { mutation_id } => {
            let path = cli.path.ok_or("Outbox path required for purge")?;
            commands::purge::run(&path, mutation_id)?;
        }
        Commands::Version => {
            println!("mutsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Outbox frame format v{}", mutsync_outbox::FRAME_VERSION);
        }
    }

    Ok(())
}
