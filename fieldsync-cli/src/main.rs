use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{
    ClearCommand, ConfigCommand, EnqueueCommand, ListCommand, RemoveCommand, RetryCommand,
    StatusCommand, SubmitCommand, SyncCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "fsync")]
#[command(version)]
#[command(about = "Offline-first operation queue for field data", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue an operation for delivery
    Enqueue(EnqueueCommand),

    /// Deliver an operation now, or queue it if the server is unreachable
    Submit(SubmitCommand),

    /// List queued operations
    List(ListCommand),

    /// Show queue and server status
    Status(StatusCommand),

    /// Deliver queued operations to the server
    Sync(SyncCommand),

    /// Retry operations that failed terminally
    Retry(RetryCommand),

    /// Remove a queued operation
    Remove(RemoveCommand),

    /// Drop every queued operation
    Clear(ClearCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fieldsync_core=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let cli_config_path = cli.config.clone();
    let config = Config::load(cli.config)?;

    match &cli.command {
        Some(Commands::Enqueue(cmd)) => cmd.run(&config)?,
        Some(Commands::Submit(cmd)) => cmd.run(&config)?,
        Some(Commands::List(cmd)) => cmd.run(&config)?,
        Some(Commands::Status(cmd)) => cmd.run(&config)?,
        Some(Commands::Sync(cmd)) => cmd.run(&config)?,
        Some(Commands::Retry(cmd)) => cmd.run(&config)?,
        Some(Commands::Remove(cmd)) => cmd.run(&config)?,
        Some(Commands::Clear(cmd)) => cmd.run(&config)?,
        Some(Commands::Config(cmd)) => cmd.run(&config, cli_config_path)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
