use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use kanban_sync::cli::{Cli, Commands};
use kanban_sync::commands::{cmd_board, cmd_config_show, cmd_replay};

fn init_tracing(verbose: bool) {
    let default = if verbose { "kanban_sync=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Replay {
            scenario,
            config,
            json,
        } => cmd_replay(&scenario, config.as_deref(), json).await,
        Commands::Board { id, config, json } => cmd_board(&id, config.as_deref(), json).await,
        Commands::Config { path, json } => cmd_config_show(path.as_deref(), json),
    };

    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
