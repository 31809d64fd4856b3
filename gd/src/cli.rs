//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{DEFAULT_SLIDER, TermStatus};

/// glossaryd - glossary article generation runner
#[derive(Parser)]
#[command(
    name = "gd",
    about = "Generate glossary articles with a Dify workflow and track their history",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Request a new glossary article
    Submit {
        /// Term to write about
        topic: String,

        /// Notification address (remembered as the default)
        #[arg(short, long)]
        mail: Option<String>,

        /// Target difficulty, 0 to 1
        #[arg(short, long, default_value_t = DEFAULT_SLIDER)]
        difficulty: f64,

        /// Target reader IT literacy, 0 to 1
        #[arg(long, default_value_t = DEFAULT_SLIDER)]
        literacy: f64,

        /// Extra context for the workflow
        #[arg(short = 'x', long, default_value = "")]
        context: String,

        /// Generate now and wait for the result
        #[arg(short, long)]
        wait: bool,
    },

    /// Generate pending terms until interrupted
    Run,

    /// List terms, newest first
    List {
        /// Only show terms with this status (pending, completed, error)
        #[arg(short, long)]
        status: Option<TermStatus>,

        /// Ignore the cached list and fetch again
        #[arg(short, long)]
        refresh: bool,
    },

    /// Show one term
    Show {
        /// Term id or unique id prefix
        id: String,

        /// Print the raw record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a term and its remote draft and documents
    Delete {
        /// Term id or unique id prefix
        id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show or set the default notification address
    Mail {
        /// New default address
        address: Option<String>,
    },
}
