//! flowrig CLI entry point.
//!
//! Binary name: `flowrig`
//!
//! Parses CLI arguments, sets up tracing, loads the project and dispatches to
//! the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use flowrig_observe::tracing_setup::level_for_verbosity;
use flowrig_observe::{init_tracing, shutdown_tracing, TracingOptions};

use cli::apply::ApplyOptions;
use cli::{vars_to_map, Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = TracingOptions {
        default_level: level_for_verbosity(cli.verbose, cli.quiet).to_string(),
        json: cli.json,
        enable_otel: cli.otel,
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need a project
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "flowrig", &mut std::io::stdout());
        return Ok(());
    }

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    let state = AppState::init(cli.project.clone(), cli.plugin_dir.clone()).await?;

    match cli.command {
        Commands::Validate { flow } => {
            cli::validate::validate(&state, flow.as_deref(), cli.json)?;
        }

        Commands::Plan { flow, vars } => {
            cli::plan::plan(&state, flow.as_deref(), &vars_to_map(vars), cli.json).await?;
        }

        Commands::Apply { flow, vars, yes } => {
            let opts = ApplyOptions {
                yes,
                json: cli.json,
                quiet: cli.quiet,
            };
            cli::apply::apply(&state, flow.as_deref(), vars_to_map(vars), &opts).await?;
        }

        Commands::Plugin { action } => {
            cli::plugin::run(&state, action, cli.json).await?;
        }

        Commands::Status => {
            cli::status::status(&state, cli.json).await?;
        }

        Commands::Completions { .. } => unreachable!("handled before project load"),
    }

    Ok(())
}
