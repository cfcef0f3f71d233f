//! CLI type definitions
//!
//! Clap structures for the `simreg` command line.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::{classify::ClassifyArgs, expand::ExpandArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(name = "simreg")]
#[command(about = "Regression orchestrator for hardware simulation suites", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Load configuration from this file instead of .simreg/
    #[arg(short, long, global = true, env = "SIMREG_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a regression over a test list
    Run(RunArgs),

    /// Print the runs a test list expands to, without executing anything
    Expand(ExpandArgs),

    /// Classify a captured simulation log
    Classify(ClassifyArgs),
}
