//! # isg CLI Module
//!
//! Command-line host for the Interface Signature Graph engine.
//!
//! ## Available Commands
//!
//! - `ingest` - Ingest extractor batches from a JSON file
//! - `update` - Detect changed files and apply their batches
//! - `changes` - Show which files changed since the last ingest
//! - `remove` - Remove files from the graph
//! - `status` - Show graph counters
//! - `query` - Run an architectural query
//! - `export` - Write the snapshot to a file
//! - `import` - Replace the graph with a snapshot file
//! - `hash` - Print the BLAKE3 checksum of the canonical graph

mod commands;

use clap::{Parser, Subcommand};
use isg_core::IsgError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// isg - Interface Signature Graph
///
/// Keeps a graph of code entities and their relationships, fed by an external
/// extractor, and answers "who calls", "what implements" and "what breaks".
#[derive(Parser, Debug)]
#[command(name = "isg")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the redb snapshot store
    #[arg(short = 'D', long, global = true, default_value = "isg.redb")]
    pub database: PathBuf,

    /// Engine configuration (TOML); falls back to $ISG_CONFIG
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest extractor batches (JSON array of file batches)
    Ingest {
        /// Path to the batch file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Detect changed files and apply the supplied batches
    Update {
        /// Path to the batch file
        #[arg(short, long)]
        file: PathBuf,

        /// Complete `{ "path": checksum }` listing of the current files;
        /// without it only the files in the batch are considered
        #[arg(long)]
        checksums: Option<PathBuf>,
    },

    /// Show new, modified, deleted and unchanged files
    Changes {
        /// Complete `{ "path": checksum }` listing of the current files
        #[arg(long)]
        checksums: PathBuf,
    },

    /// Remove files and everything they contributed
    Remove {
        /// File paths as given to the extractor
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Show graph status
    Status,

    /// Run an architectural query
    Query {
        /// Follow edges at or below the low-confidence threshold
        #[arg(long, global = true)]
        include_low_confidence: bool,

        #[command(subcommand)]
        kind: QueryCommand,
    },

    /// Export the snapshot in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace the graph with a canonical snapshot file
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute BLAKE3 checksum of the canonical graph
    Hash,
}

/// Query kinds. Targets are qualified names, simple names or `id:<hex>`.
#[derive(Subcommand, Debug)]
pub enum QueryCommand {
    /// Entities calling the target
    Callers { target: String },

    /// Entities the target calls
    Callees { target: String },

    /// Entities using the target type
    Users { target: String },

    /// Implementors of the target trait
    Implements { target: String },

    /// Everything affected by changing the target
    Blast {
        target: String,

        /// Maximum hop count (0 = the target only)
        #[arg(short, long)]
        depth: Option<usize>,

        /// Stop the walk after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Walk dependencies instead of dependents
        #[arg(long)]
        downstream: bool,
    },

    /// Dependency cycles through the target, or all cycles without one
    Cycles { target: Option<String> },

    /// Fuzzy search over names
    Find {
        fragment: String,

        /// Maximum results (0 = configured default)
        #[arg(short, long, default_value = "0")]
        limit: usize,
    },

    /// Exact lookup with file context
    Lookup { name: String },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), IsgError> {
    let ctx = Context::new(&cli)?;

    match cli.command {
        Some(Commands::Ingest { file }) => cmd_ingest(&ctx, &file),
        Some(Commands::Update { file, checksums }) => {
            cmd_update(&ctx, &file, checksums.as_deref())
        }
        Some(Commands::Changes { checksums }) => cmd_changes(&ctx, &checksums),
        Some(Commands::Remove { paths }) => cmd_remove(&ctx, &paths),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::Query {
            include_low_confidence,
            kind,
        }) => cmd_query(&ctx, &kind, include_low_confidence),
        Some(Commands::Export { output }) => cmd_export(&ctx, &output),
        Some(Commands::Import { input }) => cmd_import(&ctx, &input),
        Some(Commands::Hash) => cmd_hash(&ctx),
    }
}
