use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use tidyguard_core::duplicates::KeepStrategy;
use tidyguard_core::storage::StatsPeriod;
use tidyguard_core::OperationKind;

#[derive(Debug, Parser)]
#[command(name = "tidyguard")]
#[command(about = "Safety-gated file organiser", long_about = None)]
pub struct Cli {
    /// Print results as JSON instead of colored text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags shared by every mutating command.
#[derive(Debug, Clone, Copy, Args)]
pub struct MutationFlags {
    /// The user has reviewed and approved this operation
    #[arg(long)]
    pub approve: bool,
    /// Report what would happen without touching anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Preview the guardian's verdict for an operation
    Evaluate {
        source: PathBuf,
        destination: PathBuf,
        #[arg(long, default_value = "move")]
        operation: OperationKind,
        /// Category proposed by the classifier
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 1.0)]
        confidence: f32,
        #[arg(long)]
        approve: bool,
    },
    /// Move or rename a file as a classifier would suggest
    Execute {
        source: PathBuf,
        #[arg(long, default_value = "Unsorted")]
        category: String,
        /// Directory under the base destination
        #[arg(long)]
        path: Option<String>,
        /// New file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 1.0)]
        confidence: f32,
        /// Refuse any relocation out of the source folder
        #[arg(long)]
        no_move: bool,
        #[command(flatten)]
        flags: MutationFlags,
    },
    /// Delete a file through the guardian
    Delete {
        path: PathBuf,
        #[command(flatten)]
        flags: MutationFlags,
    },
    /// Move a file into the archive directory
    Archive {
        path: PathBuf,
        /// Archive directory; relative paths land under the base destination
        #[arg(long)]
        dir: Option<PathBuf>,
        #[command(flatten)]
        flags: MutationFlags,
    },
    /// Find duplicate files under one or more directories
    Duplicates {
        #[arg(required = true)]
        roots: Vec<PathBuf>,
        /// Hash files on the worker pool
        #[arg(long)]
        parallel: bool,
        /// Which copy survives: shortest_path, newest or oldest
        #[arg(long, default_value = "shortest_path")]
        strategy: KeepStrategy,
        /// Delete every copy but the kept one
        #[arg(long)]
        cleanup: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Sample mounted volumes and scan the busiest directories for duplicates
    Discover {
        /// Volumes to sample; defaults to every mounted volume
        volumes: Vec<PathBuf>,
        /// Also write a structure report of the candidate directories here
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        cleanup: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Find temporary and leftover files such as partial downloads and backups
    Junk {
        directory: PathBuf,
        /// Delete what was found, one guarded delete per file
        #[arg(long)]
        delete: bool,
        #[command(flatten)]
        flags: MutationFlags,
    },
    /// Summarise file counts and sizes directly inside each directory
    Structure {
        #[arg(required = true)]
        directories: Vec<PathBuf>,
        /// Write the report as JSON to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show organising statistics and guardian counters
    Stats {
        #[arg(long, default_value = "all")]
        period: StatsPeriod,
    },
    /// List operations the guardian refused
    Blocked {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Reverse the most recent move or rename
    Undo {
        #[arg(long)]
        dry_run: bool,
    },
    /// Show or search the audit log
    Logs {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Queue files for deferred organising
    Schedule {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Hours before the file becomes eligible
        #[arg(long)]
        delay: Option<f64>,
        /// Treat the files as pre-existing: old files are due immediately
        #[arg(long)]
        existing: bool,
    },
    /// Process due items in the deferred queue
    Sweep {
        /// Keep sweeping every poll interval until interrupted
        #[arg(long = "loop")]
        run_loop: bool,
    },
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}
