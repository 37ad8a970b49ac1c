//! Queue a git-annex content command through the daemon

use super::request;
use annexstat_cli::ipc::{Request, Response};
use annexstat_cli::util;
use annexstat_core::AnnexCommand;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(path: &Path, command: AnnexCommand) -> Result<()> {
    let path = util::absolute(path)?;
    let response = request(&Request::Command {
        path: path.clone(),
        command,
    })
    .await?;

    let Response::Queued { id } = response else {
        anyhow::bail!("Unexpected response from daemon");
    };
    println!(
        "{} Queued {} {} {}",
        "✓".green(),
        command.as_str().cyan(),
        path.display(),
        format!("({})", id).dimmed()
    );
    Ok(())
}
