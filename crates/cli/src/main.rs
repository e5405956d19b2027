//! taskloop CLI: the main entry point.
//!
//! Commands:
//! - `run`: drive an objective to completion and record the trace
//! - `replay`: re-execute a recorded trace without the model
//! - `config`: show, locate or validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod clarifier;
mod commands;

#[derive(Parser)]
#[command(
    name = "taskloop",
    about = "taskloop: autonomous task execution with recorded, replayable traces",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of ~/.taskloop/config.toml
    #[arg(short, long, global = true, env = "TASKLOOP_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an objective until it is declared done or a bound is hit
    Run {
        /// What the run should accomplish
        objective: String,

        /// Override agent.max_steps
        #[arg(long)]
        max_steps: Option<usize>,

        /// Where to write the trace (default: <trace dir>/<run id>.json)
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Seed memory with a document, as NAME=PATH (repeatable)
        #[arg(long = "doc", value_name = "NAME=PATH")]
        docs: Vec<String>,

        /// Root for relative paths used by filesystem actions
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Replay a recorded trace against the standard actions
    Replay {
        /// Trace file written by `taskloop run`
        trace: PathBuf,

        /// Root for relative paths used by filesystem actions
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
enum ConfigAction {
    /// Print the default configuration
    Default,
    /// Print the effective configuration (API key redacted)
    Show,
    /// Print the config file path
    Path,
    /// Load and validate the configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run {
            objective,
            max_steps,
            trace,
            docs,
            workdir,
        } => {
            let options = commands::run::RunOptions {
                objective,
                max_steps,
                trace,
                docs,
                workdir,
            };
            commands::run::run(config_path, options).await?
        }
        Commands::Replay { trace, workdir } => {
            commands::replay::run(config_path, &trace, workdir).await?
        }
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Default) {
            ConfigAction::Default => commands::config_cmd::default(),
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate => commands::config_cmd::validate(config_path)?,
        },
    }

    Ok(())
}
