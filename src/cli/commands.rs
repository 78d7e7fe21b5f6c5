//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Deckhand - Declarative provisioning for containerized web stacks.
#[derive(Parser, Debug)]
#[command(name = "deckhand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "DECKHAND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new deckhand project.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the configuration and build the resource graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Compute and display the plan without changing anything.
    Plan {
        /// Save the plan as JSON for a later apply.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Skip reading resources back from the provider first.
        #[arg(long)]
        no_refresh: bool,
    },

    /// Apply a plan.
    Apply {
        /// Saved plan to apply (computes a fresh plan when omitted).
        plan_file: Option<PathBuf>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Keep applying operations that do not depend on a failure.
        #[arg(long)]
        continue_on_error: bool,

        /// Attempts per provider call, including the first.
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Delete every resource tracked in state.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Read every tracked resource and accept the observed state.
    Refresh,

    /// Report remote changes without modifying state.
    Drift,

    /// Print resources in dependency order.
    Graph,

    /// Inspect and maintain state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the snapshot summary.
    Show,

    /// List tracked resources.
    List,

    /// Forget a resource without deleting it remotely.
    Rm {
        /// Resource address (`kind.name`).
        address: String,
    },

    /// Lock the state.
    Lock,

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
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
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_arguments() {
        let cli = Cli::parse_from([
            "deckhand",
            "apply",
            "plan.json",
            "-y",
            "--continue-on-error",
            "--max-attempts",
            "6",
        ]);

        match cli.command {
            Commands::Apply {
                plan_file,
                yes,
                continue_on_error,
                max_attempts,
            } => {
                assert_eq!(plan_file, Some(PathBuf::from("plan.json")));
                assert!(yes && continue_on_error);
                assert_eq!(max_attempts, Some(6));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["deckhand", "state", "rm", "iam_role.runtime", "--output", "json"]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Rm { .. }
            }
        ));
    }
}
