use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kanban-sync")]
#[command(about = "Optimistic board sync engine for kanban ticket trackers")]
#[command(version)]
pub struct Cli {
    /// Log engine decisions (drops, deferrals, settles) to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a scripted board session against an in-memory server
    Replay {
        /// Scenario file (YAML)
        scenario: PathBuf,

        /// Config file to use instead of .kanban-sync/config.yaml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch a board from the configured API and print it
    Board {
        /// Board ID
        id: String,

        /// Config file to use instead of .kanban-sync/config.yaml
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the effective configuration
    Config {
        /// Config file to use instead of .kanban-sync/config.yaml
        #[arg(long)]
        path: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
