//! Command-line interface for the fanin tracker.

pub mod commands;
pub mod context;
pub mod output;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::errors::DomainError;

pub use context::AppContext;

#[derive(Parser, Debug)]
#[command(
    name = "fanin",
    about = "Track HPC cohort jobs and merge their result branches",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .fanin/
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register every unit of the cohort manifest in the ledger
    Register(commands::register::RegisterArgs),
    /// Submit tasks that were never submitted
    Submit(commands::submit::SubmitArgs),
    /// Poll the scheduler and classify finished jobs
    Poll,
    /// Show per-state counts and ledger entries
    Status(commands::status::StatusArgs),
    /// Resubmit failed units
    Resubmit(commands::resubmit::ResubmitArgs),
    /// Show what a merge would do without merging
    Plan,
    /// Merge result branches into the default branch
    Merge,
}

/// Exit code for a run that stopped on a merge conflict.
pub const EXIT_CONFLICT: i32 = 3;
/// Exit code for a merge whose content is not all in the durable store.
pub const EXIT_INCOMPLETE: i32 = 4;

/// Print an error in the selected format and exit.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    let code = match err.downcast_ref::<DomainError>() {
        Some(DomainError::MergeConflict { .. }) => EXIT_CONFLICT,
        Some(DomainError::ContentIncomplete { .. }) => EXIT_INCOMPLETE,
        _ => 1,
    };

    if json_mode {
        let value = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).unwrap_or_default()
        );
    } else {
        eprintln!("{} {err:#}", console::style("Error:").red().bold());
    }
    std::process::exit(code)
}
