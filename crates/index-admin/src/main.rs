//! Index Admin
//!
//! Operator tooling for the indexing activity queue.
//!
//! # Usage
//!
//! ```bash
//! index-admin state
//! index-admin restore --last-id 120 --gap 117 --gap 119
//! index-admin replay [--centralized]
//! index-admin rebuild
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/index-queue/config)
//! 3. Environment variables (INDEXQ_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use index_admin::{load_settings, init_logging, run_command, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;

    run_command(&settings, cli.command).await
}
