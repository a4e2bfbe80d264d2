//! Command-line interface definition.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sync Markdown issue files with a remote issue tracker.
#[derive(Parser, Debug)]
#[command(name = "td", version, about, long_about = None)]
pub struct Cli {
    /// Workspace root containing the issue store (defaults to the current
    /// directory).
    #[arg(long, global = true, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all log output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the issue store layout in the workspace
    Init(commands::init::InitArgs),

    /// Push local issue changes to the remote tracker
    Push(commands::push::PushArgs),
}
