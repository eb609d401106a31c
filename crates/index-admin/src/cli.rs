//! CLI argument parsing for the index admin tool.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand};

/// Index Admin
///
/// Inspect and repair the index of the indexing activity queue.
#[derive(Parser, Debug)]
#[command(name = "index-admin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/index-queue/config)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override activity store path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override index path
    #[arg(long, global = true)]
    pub index_path: Option<String>,

    /// Treat the index as shared by all processes
    #[arg(long, global = true)]
    pub centralized: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Admin commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print the index's completion state and the activity store counters
    State,

    /// Roll the completion state back to a backup point and replay
    Restore {
        /// Highest activity id the restored index reflects
        #[arg(long)]
        last_id: u64,

        /// Activity ids below last-id the restored index is missing
        #[arg(long = "gap")]
        gaps: Vec<u64>,
    },

    /// Start the queue, execute whatever the index is missing, stop
    Replay,

    /// Clear the index and re-execute every stored activity
    Rebuild,
}
