//! CLI definitions for kv

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kv", about = "Inspect and edit a kvstore directory", version)]
pub struct Cli {
    /// Store directory (defaults to the glossaryd store)
    #[arg(short, long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a key's JSON value
    Get { key: String },

    /// Set a key; the value is parsed as JSON, or stored as a string if it isn't
    Set { key: String, value: String },

    /// Remove a key
    Rm { key: String },

    /// List keys
    Keys,

    /// Print changes as they happen (Ctrl+C to stop)
    Watch,
}

/// Default store directory shared with `gd`
pub fn default_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("glossaryd")
        .join("kv")
}
