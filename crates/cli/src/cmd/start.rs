//! Start the annexstat daemon in the background

use annexstat_cli::util::{self, StatePaths};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

const STARTUP_POLLS: u32 = 10;

pub async fn run(config: Option<&Path>) -> Result<()> {
    if crate::daemon::is_running() {
        println!("{}", "Daemon is already running".yellow());
        return Ok(());
    }

    // 1. Output file next to the daemon log
    let paths = StatePaths::resolve()?;
    std::fs::create_dir_all(&paths.logs).context("Failed to create logs directory")?;
    let output = paths.logs.join("daemon.out");
    let output_writer = std::fs::File::create(&output).context("Failed to create daemon output file")?;

    // 2. Spawn detached with nohup
    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    let config_path = util::config_path(config)?;

    Command::new("nohup")
        .arg(&exe)
        .arg("--config")
        .arg(&config_path)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(output_writer.try_clone()?)
        .stderr(output_writer)
        .spawn()
        .context("Failed to spawn daemon process")?;

    // 3. Wait for the lock to show up
    for _ in 0..STARTUP_POLLS {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if crate::daemon::is_running() {
            println!("{} Daemon started", "✓".green());
            println!("{}: {}", "Logs".dimmed(), paths.log_file().display());
            return Ok(());
        }
    }

    anyhow::bail!("Daemon failed to start (check {})", output.display());
}
