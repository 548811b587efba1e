//! AgentFlow CLI entry point.
//!
//! Binary name: `agentflow`
//!
//! Parses CLI arguments, installs tracing, then dispatches to the matching
//! command handler.

mod cli;

use clap::Parser;
use clap_complete::generate;

use agentflow_observe::{TracingOptions, init_tracing, shutdown_tracing};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions must stay clean of log output.
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "agentflow", &mut std::io::stdout());
        return Ok(());
    }

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        json: false,
        otel: cli.otel,
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Validate { file } => cli::workflow::handle_validate(&file, cli.json).await,
        Commands::Plan { file } => cli::workflow::handle_plan(&file, cli.json).await,
        Commands::Run {
            file,
            session,
            state,
            timeout,
            continue_on_error,
        } => {
            cli::workflow::handle_run(
                cli::workflow::RunArgs {
                    file: &file,
                    config,
                    session,
                    state,
                    timeout,
                    continue_on_error,
                },
                cli.json,
            )
            .await
        }
        Commands::Agents => cli::workflow::handle_agents(config, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
