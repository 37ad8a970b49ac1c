//! Stop the annexstat daemon

use annexstat_cli::ipc::{IpcClient, Request, Response};
use annexstat_cli::locks::DaemonLock;
use annexstat_cli::util::StatePaths;
use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use owo_colors::OwoColorize;
use std::time::Duration;
use tracing::warn;

const SHUTDOWN_POLLS: u32 = 50;

pub async fn run() -> Result<()> {
    let paths = StatePaths::resolve()?;
    let Some(holder) = DaemonLock::holder(&paths.dir) else {
        println!("{}", "Daemon is not running".yellow());
        return Ok(());
    };

    // 1. Ask politely over IPC, fall back to SIGTERM
    let asked = match IpcClient::connect(&paths.socket).await {
        Ok(mut client) => matches!(client.send(&Request::Stop).await, Ok(Response::Stopping)),
        Err(e) => {
            warn!("{}", e);
            false
        }
    };
    if !asked {
        kill(Pid::from_raw(holder.pid as i32), Signal::SIGTERM)
            .with_context(|| format!("Failed to signal daemon (pid {})", holder.pid))?;
    }

    // 2. Wait for the lock to be released
    for _ in 0..SHUTDOWN_POLLS {
        if DaemonLock::holder(&paths.dir).is_none() {
            println!("{} Daemon stopped", "✓".green());
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    anyhow::bail!("Daemon (pid {}) did not stop within 5 seconds", holder.pid);
}
