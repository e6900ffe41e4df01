//! Command-line interface for trackrecorder.
//!
//! This module provides the CLI structure and command handlers for the
//! `trackrec` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{BackupCommand, ConfigCommand, ReplayCommand, StatusCommand};

/// trackrec - Inspect and replay GPS track recordings
///
/// Shows crash-recovery backups left by the recording engine, replays raw
/// position logs through the same filter and statistics the engine uses, and
/// manages configuration.
#[derive(Debug, Parser)]
#[command(name = "trackrec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show storage paths and any recoverable session
    Status(StatusCommand),

    /// Inspect or dismiss the crash-recovery backup
    #[command(subcommand)]
    Backup(BackupCommand),

    /// Run a recorded position log through the filter and stats
    Replay(ReplayCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            match self.verbose {
                0 => crate::logging::Verbosity::Normal,
                1 => crate::logging::Verbosity::Verbose,
                _ => crate::logging::Verbosity::Trace,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn status_cli(verbose: u8, quiet: bool) -> Cli {
        Cli {
            config: None,
            verbose,
            quiet,
            command: Command::Status(StatusCommand { json: false }),
        }
    }

    #[test]
    fn test_cli_name() {
        let cli = Cli::command();
        assert_eq!(cli.get_name(), "trackrec");
    }

    #[test]
    fn test_verbosity_levels() {
        use crate::logging::Verbosity;

        assert_eq!(status_cli(0, true).verbosity(), Verbosity::Quiet);
        assert_eq!(status_cli(0, false).verbosity(), Verbosity::Normal);
        assert_eq!(status_cli(1, false).verbosity(), Verbosity::Verbose);
        assert_eq!(status_cli(2, false).verbosity(), Verbosity::Trace);
        // quiet wins over -v
        assert_eq!(status_cli(3, true).verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_cli_verify() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_status() {
        let cli = Cli::try_parse_from(["trackrec", "status", "--json"]).unwrap();
        assert!(matches!(cli.command, Command::Status(StatusCommand { json: true })));
    }

    #[test]
    fn test_parse_backup_show() {
        let cli = Cli::try_parse_from(["trackrec", "backup", "show"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Backup(BackupCommand::Show { json: false })
        ));
    }

    #[test]
    fn test_parse_backup_dismiss() {
        let cli = Cli::try_parse_from(["trackrec", "backup", "dismiss", "--yes"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Backup(BackupCommand::Dismiss { yes: true })
        ));
    }

    #[test]
    fn test_parse_replay() {
        let cli =
            Cli::try_parse_from(["trackrec", "replay", "walk.json", "--min-distance", "8"])
                .unwrap();
        let Command::Replay(replay) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(replay.file, PathBuf::from("walk.json"));
        assert_eq!(replay.min_distance, Some(8.0));
        assert!(!replay.json);
    }

    #[test]
    fn test_replay_requires_file() {
        assert!(Cli::try_parse_from(["trackrec", "replay"]).is_err());
    }

    #[test]
    fn test_parse_config_validate() {
        let cli =
            Cli::try_parse_from(["trackrec", "config", "validate", "--file", "x.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Config(ConfigCommand::Validate { file: Some(_) })
        ));
    }

    #[test]
    fn test_parse_with_config() {
        let cli = Cli::try_parse_from(["trackrec", "-c", "/custom/config.toml", "status"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/custom/config.toml")));
    }

    #[test]
    fn test_parse_with_verbose() {
        let cli = Cli::try_parse_from(["trackrec", "-vv", "status"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_with_quiet() {
        let cli = Cli::try_parse_from(["trackrec", "-q", "status"]).unwrap();
        assert!(cli.quiet);
    }
}
