//! Show path badges and daemon status

use super::request;
use annexstat_cli::ipc::{Request, Response};
use annexstat_cli::locks::DaemonLock;
use annexstat_cli::util::{self, StatePaths};
use annexstat_core::{Badge, PathStatus, Sufficiency};
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;
use std::time::{Duration, Instant};

const WAIT_LIMIT: Duration = Duration::from_secs(30);
const WAIT_POLL: Duration = Duration::from_millis(200);

/// Status of one path
pub async fn run_path(path: &Path, wait: bool, json: bool) -> Result<()> {
    // 1. Resolve and ask the daemon
    let absolute = util::absolute(path)?;
    let request_msg = Request::Status { path: absolute.clone() };
    let mut response = request(&request_msg).await?;

    // 2. Poll until the refresh lands
    let started = Instant::now();
    while wait && started.elapsed() < WAIT_LIMIT {
        match &response {
            Response::Status { status: Some(status), .. } if status.is_resolved() => break,
            _ => {}
        }
        tokio::time::sleep(WAIT_POLL).await;
        response = request(&request_msg).await?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let Response::Status { path: repo_path, status, badge, .. } = response else {
        anyhow::bail!("Unexpected response from daemon");
    };

    // 3. Display
    println!("{}", absolute.display().to_string().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Tree path:     {}", repo_path.as_str().cyan());
    println!("Badge:         {}", colored_badge(badge));
    match status {
        Some(status) => print_status(&status),
        None => println!("  {}", "Status is being computed (retry or use --wait)".dimmed()),
    }
    Ok(())
}

fn print_status(status: &PathStatus) {
    println!("Kind:          {}", if status.is_dir { "directory" } else { "file" });
    println!("Tracked:       {}", status.is_tracked);
    if let Some(presence) = status.presence {
        println!("Presence:      {:?}", presence);
    }
    match status.replicas {
        Some(replicas) => println!("Copies:        {} ({:?})", replicas.count, replicas.sufficiency),
        None if status.is_tracked => println!("Copies:        {}", "unknown".dimmed()),
        None => {}
    }
    if let Some(key) = &status.content_key {
        println!("Key:           {}", key.as_str().dimmed());
    }
    println!(
        "Refreshed:     {}{}",
        util::format_relative_time(status.refreshed_at_ms),
        if status.needs_refresh { " (refresh pending)".yellow().to_string() } else { String::new() }
    );
}

fn colored_badge(badge: Badge) -> String {
    let id = badge.identifier();
    match badge {
        Badge::Unknown | Badge::NotTracked => id.dimmed().to_string(),
        Badge::ZeroCopies => id.red().to_string(),
        Badge::Copies {
            sufficiency: Sufficiency::Sufficient,
            ..
        } => id.green().to_string(),
        _ => id.yellow().to_string(),
    }
}

/// Daemon summary
pub async fn run_daemon() -> Result<()> {
    let paths = StatePaths::resolve()?;

    println!("{}", "annexstat Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    print!("Daemon:        ");
    let Some(holder) = DaemonLock::holder(&paths.dir) else {
        println!("{}", "Not running".yellow());
        println!("  {}", "Tip: Start with 'annexstat start'".dimmed());
        return Ok(());
    };
    println!("{}", "Running ✓".green());
    println!("  Since:       {}", util::format_relative_time(holder.started_at));

    if let Ok(Response::Stats { pid, uptime_secs, engine }) = request(&Request::Stats).await {
        println!("  PID:         {}", pid);
        println!("  Uptime:      {} seconds", uptime_secs);
        println!("  Trees:       {}", engine.trees);
        println!("  Scanning:    {}", engine.scanning);
        println!(
            "  Queued:      {} high, {} low{}",
            engine.queued_high,
            engine.queued_low,
            if engine.idle { " (idle)".dimmed().to_string() } else { String::new() }
        );
    }
    println!();
    println!("{}: {}", "Logs".dimmed(), paths.log_file().display());
    Ok(())
}
