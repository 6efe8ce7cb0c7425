//! CLI interface for ARC
//!
//! Each subcommand runs one lane, or inspects stored state, and exits.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ARC research pipeline engine
///
/// Turns investment ideas into research documents, investment memos and a
/// weekly digest by orchestrating model calls over market data.
#[derive(Parser, Debug)]
#[command(name = "arc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate memos for pending artifacts in bounded batches
    Batch,

    /// Run the discovery lane and store new ideas
    Discover,

    /// Run the research lane for one idea
    Research {
        /// Idea ID
        idea_id: String,
    },

    /// Approve a research document, queueing a memo artifact for it
    Approve {
        /// Research document ID
        research_id: String,
    },

    /// Build the weekly bundle from memos completed in the last seven days
    Weekly,

    /// Show an artifact's status, progress and score
    Status {
        /// Artifact ID
        artifact_id: String,
    },

    /// Show recent lane runs
    Runs {
        /// Number of runs to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: i64,
    },

    /// Check model provider availability and today's spend
    Doctor,
}
