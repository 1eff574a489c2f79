//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tripwire")]
#[command(about = "Tripwire - event ingestion and trigger dispatch", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Load configuration from this file instead of .tripwire/
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the monitor until interrupted
    Run(RunArgs),

    /// Ingest a batch of raw events and wait for their executions
    Ingest(IngestArgs),

    /// Show canonical events and trigger matches for a batch without side effects
    Preview(PreviewArgs),

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Read raw events from stdin, one JSON value (object or array) per line
    #[arg(long)]
    pub stdin: bool,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// JSON file holding one raw event or an array of them ("-" for stdin)
    pub file: PathBuf,

    /// Seconds to wait for queued executions to finish
    #[arg(long, default_value_t = 30)]
    pub wait_secs: u64,
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// JSON file holding one raw event or an array of them ("-" for stdin)
    pub file: PathBuf,
}
