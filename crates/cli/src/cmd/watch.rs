//! Manage the watched root folders in the config file
//!
//! A running daemon notices the edit and reconciles its trees without a
//! restart.

use annexstat_cli::ipc::{Request, Response};
use annexstat_cli::util;
use annexstat_engine::Config;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

pub async fn run_add(config: Option<&Path>, path: &Path) -> Result<()> {
    let config_path = util::config_path(config)?;
    let mut cfg = Config::load(&config_path)?;

    let root = util::absolute(path)?;
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }
    if cfg.roots.contains(&root) {
        println!("{}", format!("Already watching {}", root.display()).yellow());
        return Ok(());
    }

    cfg.roots.push(root.clone());
    cfg.save(&config_path)
        .with_context(|| format!("Failed to save {}", config_path.display()))?;
    println!("{} Watching {}", "✓".green(), root.display().to_string().cyan());
    if !crate::daemon::is_running() {
        println!("  {}", "Tip: Start the daemon with 'annexstat start'".dimmed());
    }
    Ok(())
}

pub async fn run_remove(config: Option<&Path>, path: &Path) -> Result<()> {
    let config_path = util::config_path(config)?;
    let mut cfg = Config::load(&config_path)?;

    // The folder may already be gone, so match the raw form too
    let root = util::absolute(path)?;
    let before = cfg.roots.len();
    cfg.roots.retain(|existing| existing != &root && existing != path);
    if cfg.roots.len() == before {
        anyhow::bail!("{} is not a watched root", root.display());
    }

    cfg.save(&config_path)
        .with_context(|| format!("Failed to save {}", config_path.display()))?;
    println!("{} Stopped watching {}", "✓".green(), root.display());
    Ok(())
}

pub async fn run_list(config: Option<&Path>) -> Result<()> {
    let config_path = util::config_path(config)?;
    let cfg = Config::load(&config_path)?;

    if cfg.roots.is_empty() {
        println!("{}", "No watched roots".dimmed());
        return Ok(());
    }

    // Annotate with what the daemon actually tracks, if it is up
    let tracked: Option<Vec<PathBuf>> = if crate::daemon::is_running() {
        match super::request(&Request::Trees).await {
            Ok(Response::Trees { trees }) => Some(trees.into_iter().map(|tree| tree.root).collect()),
            _ => None,
        }
    } else {
        None
    };

    for root in &cfg.roots {
        let note = match &tracked {
            Some(roots) if roots.iter().any(|tracked| root.starts_with(tracked)) => "tracked".green().to_string(),
            Some(_) => "not a git-annex tree".yellow().to_string(),
            None => String::new(),
        };
        println!("{}  {}", root.display(), note);
    }
    Ok(())
}
