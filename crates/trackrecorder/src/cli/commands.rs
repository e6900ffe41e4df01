//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Backup inspection commands.
#[derive(Debug, Subcommand)]
pub enum BackupCommand {
    /// Show the stored backup snapshot
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete the stored backup snapshot
    Dismiss {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Replay command arguments.
#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// JSON file holding an array of raw positions
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Override the minimum distance between points (meters)
    #[arg(short, long, value_name = "METERS")]
    pub min_distance: Option<f64>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}
