//! annexstat CLI - badge status for git-annex working trees

use annexstat_core::AnnexCommand;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;
mod daemon;

/// annexstat - Presence and replica status for git-annex working trees
#[derive(Parser)]
#[command(name = "annexstat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/annexstat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Daemon,
    /// Start the daemon in the background
    Start {
        /// Run in foreground (same as `daemon`)
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the daemon
    Stop,
    /// Show the status of a path, or of the daemon without one
    Status {
        path: Option<PathBuf>,
        /// Wait for a status that is still being computed
        #[arg(long)]
        wait: bool,
        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },
    /// Fetch content into this repository (git annex get)
    Get { path: PathBuf },
    /// Add files to the annex (git annex add)
    Add { path: PathBuf },
    /// Drop local content (git annex drop)
    Drop { path: PathBuf },
    /// Lock unlocked files (git annex lock)
    Lock { path: PathBuf },
    /// Unlock files for editing (git annex unlock)
    Unlock { path: PathBuf },
    /// Manage watched root folders
    #[command(subcommand)]
    Watch(WatchCommands),
    /// View and edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
    /// List the trees the daemon is tracking
    Trees,
}

#[derive(Subcommand)]
enum WatchCommands {
    /// Watch a git-annex working tree
    Add { path: PathBuf },
    /// Stop watching a root folder
    Remove { path: PathBuf },
    /// List watched root folders
    List,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,
    /// Get a configuration value (e.g. engine.tick_millis)
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Show the config file path
    Path {
        /// Create the file with example contents if missing
        #[arg(long)]
        create: bool,
    },
    /// Print an example configuration
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    // The daemon installs its own file logger
    let runs_daemon = matches!(
        cli.command,
        Commands::Daemon | Commands::Start { foreground: true }
    );
    if !runs_daemon {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_env("ANNEXSTAT_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Daemon | Commands::Start { foreground: true } => {
            daemon::run(annexstat_cli::util::config_path(config)?).await
        }
        Commands::Start { .. } => cmd::start::run(config).await,
        Commands::Stop => cmd::stop::run().await,
        Commands::Status { path, wait, json } => match path {
            Some(path) => cmd::status::run_path(&path, wait, json).await,
            None => cmd::status::run_daemon().await,
        },
        Commands::Get { path } => cmd::command::run(&path, AnnexCommand::Get).await,
        Commands::Add { path } => cmd::command::run(&path, AnnexCommand::Add).await,
        Commands::Drop { path } => cmd::command::run(&path, AnnexCommand::Drop).await,
        Commands::Lock { path } => cmd::command::run(&path, AnnexCommand::Lock).await,
        Commands::Unlock { path } => cmd::command::run(&path, AnnexCommand::Unlock).await,
        Commands::Watch(watch_cmd) => match watch_cmd {
            WatchCommands::Add { path } => cmd::watch::run_add(config, &path).await,
            WatchCommands::Remove { path } => cmd::watch::run_remove(config, &path).await,
            WatchCommands::List => cmd::watch::run_list(config).await,
        },
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::List => cmd::config::run_list(config).await,
            ConfigCommands::Get { key } => cmd::config::run_get(config, &key).await,
            ConfigCommands::Set { key, value } => cmd::config::run_set(config, &key, &value).await,
            ConfigCommands::Path { create } => cmd::config::run_path(config, create).await,
            ConfigCommands::Example => cmd::config::run_example().await,
        },
        Commands::Trees => cmd::trees::run().await,
    }
}
