//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stackforge - Declarative infrastructure orchestration.
#[derive(Parser, Debug)]
#[command(name = "stackforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "STACKFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new Stackforge project.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the project configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the plan.
    Plan {
        /// Show the diff and reason of every changed unit.
        #[arg(short, long)]
        detailed: bool,

        /// Ask every changed unit what its apply would do.
        #[arg(long)]
        unit_plan: bool,

        /// Plan every unit as new, ignoring the saved state.
        #[arg(long)]
        ignore_state: bool,

        /// Only plan these stacks or units (`stack` or `stack.unit`).
        #[arg(short, long)]
        target: Vec<String>,

        /// Leave these stacks or units out of the plan.
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Apply the plan.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        force: bool,

        /// Maximum number of units applied at once.
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Apply every unit, ignoring the saved state.
        #[arg(long)]
        ignore_state: bool,

        /// Only apply these stacks or units (`stack` or `stack.unit`).
        #[arg(short, long)]
        target: Vec<String>,

        /// Leave these stacks or units out of the run.
        #[arg(short, long)]
        exclude: Vec<String>,
    },

    /// Destroy every unit recorded in state.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        force: bool,

        /// Maximum number of units destroyed at once.
        #[arg(short, long)]
        parallelism: Option<usize>,

        /// Destroy the configured units even if the state is empty.
        #[arg(long)]
        ignore_state: bool,
    },

    /// Build every unit artifact without applying it.
    Build,

    /// Show outputs published by applied units.
    Output {
        /// Unit key (`stack.unit`); all units if not specified.
        unit: Option<String>,
    },

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Copy the state document to a local file.
    Pull {
        /// Destination file.
        #[arg(default_value = "stackforge.state.json")]
        path: PathBuf,
    },

    /// Write a timestamped copy of the state next to the configuration.
    Backup,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apply_flags() {
        let cli = Cli::try_parse_from([
            "stackforge", "apply", "--force", "-p", "5", "--target", "infra", "--exclude", "infra.db",
        ])
        .expect("parse");

        match cli.command {
            Commands::Apply { force, parallelism, ignore_state, target, exclude } => {
                assert!(force);
                assert_eq!(parallelism, Some(5));
                assert!(!ignore_state);
                assert_eq!(target, vec!["infra"]);
                assert_eq!(exclude, vec!["infra.db"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_output_format() {
        let cli = Cli::try_parse_from(["stackforge", "plan", "--output", "json"]).expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Plan { detailed: false, .. }));
    }

    #[test]
    fn test_state_pull_default_path() {
        let cli = Cli::try_parse_from(["stackforge", "state", "pull"]).expect("parse");
        match cli.command {
            Commands::State { command: StateCommands::Pull { path } } => {
                assert_eq!(path, PathBuf::from("stackforge.state.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
