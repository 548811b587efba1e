//! CLI command definitions for the `agentflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Validate, plan, and run agent workflows.
#[derive(Debug, Parser)]
#[command(name = "agentflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logs on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Engine config file (defaults to the platform config directory).
    #[arg(long, global = true, env = "AGENTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse a workflow file and check its graph.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Print the execution schedule of a workflow file.
    Plan {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Execute a workflow file against the configured agents.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Session to seed state from and write results back to.
        #[arg(long)]
        session: Option<String>,

        /// Initial state as a JSON object.
        #[arg(long)]
        state: Option<String>,

        /// Override the workflow timeout, in seconds.
        #[arg(long)]
        timeout: Option<u64>,

        /// Treat every step as optional.
        #[arg(long)]
        continue_on_error: bool,
    },

    /// List agents from the engine config.
    Agents,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::try_parse_from([
            "agentflow",
            "-vv",
            "run",
            "flow.yaml",
            "--session",
            "s1",
            "--state",
            r#"{"a":1}"#,
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
        match cli.command {
            Commands::Run { file, session, state, timeout, continue_on_error } => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(session.as_deref(), Some("s1"));
                assert_eq!(state.as_deref(), Some(r#"{"a":1}"#));
                assert_eq!(timeout, None);
                assert!(!continue_on_error);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn requires_a_subcommand() {
        assert!(Cli::try_parse_from(["agentflow"]).is_err());
    }

    #[test]
    fn command_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }
}
