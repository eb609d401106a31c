//! Index admin library.
//!
//! Command-line parsing and command handlers of the `index-admin` binary.

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{init_logging, load_settings, run_command};
