//! CLI module for the Stackforge orchestration tool.
//!
//! This module provides the command-line interface for planning,
//! applying and destroying projects.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
