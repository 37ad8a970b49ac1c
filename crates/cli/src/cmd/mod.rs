//! CLI command implementations

pub mod command;
pub mod config;
pub mod start;
pub mod status;
pub mod stop;
pub mod trees;
pub mod watch;

use annexstat_cli::ipc::{IpcClient, Request, Response};
use annexstat_cli::util::StatePaths;
use anyhow::{Context, Result};

/// Send one request to the running daemon
pub async fn request(request: &Request) -> Result<Response> {
    let paths = StatePaths::resolve()?;
    if !crate::daemon::is_running() {
        anyhow::bail!("Daemon is not running (start it with 'annexstat start')");
    }
    let mut client = IpcClient::connect(&paths.socket)
        .await
        .context("Failed to connect to daemon")?;
    let response = client.send(request).await.context("Daemon request failed")?;
    if let Response::Error { message } = response {
        anyhow::bail!("{}", message);
    }
    Ok(response)
}
