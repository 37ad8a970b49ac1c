//! List the trees the daemon tracks

use super::request;
use annexstat_cli::ipc::{Request, Response};
use anyhow::Result;
use owo_colors::OwoColorize;

pub async fn run() -> Result<()> {
    let Response::Trees { trees } = request(&Request::Trees).await? else {
        anyhow::bail!("Unexpected response from daemon");
    };

    if trees.is_empty() {
        println!("{}", "No trees are being watched".dimmed());
        println!("  {}", "Tip: Add one with 'annexstat watch add <path>'".dimmed());
        return Ok(());
    }
    for tree in trees {
        println!("{}  {}", tree.id.to_string().yellow(), tree.root.display());
    }
    Ok(())
}
