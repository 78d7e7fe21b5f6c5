//! CLI module for deckhand.
//!
//! This module provides the command-line interface for planning and
//! applying stack changes.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
