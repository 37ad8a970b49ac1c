//! Configuration management command
//!
//! Provides CLI interface to view and edit the config file.

use annexstat_cli::util;
use annexstat_engine::{config, Config};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::Path;

/// List all configuration values
pub async fn run_list(explicit: Option<&Path>) -> Result<()> {
    let config_path = util::config_path(explicit)?;
    let cfg = Config::load(&config_path)?;

    println!("{}", "annexstat Configuration".bold());
    println!("{}: {}\n", "Location".dimmed(), config_path.display().dimmed());

    // Top-level keys first, then one block per table
    let mut entries = cfg.entries()?;
    entries.sort_by_key(|(key, _)| key.contains('.'));

    let mut section = String::new();
    for (key, value) in entries {
        let (table, name) = key.rsplit_once('.').unwrap_or(("", key.as_str()));
        if table != section {
            println!("\n{}", format!("[{}]", table).yellow());
            section = table.to_string();
        }
        println!("  {} = {}", name.cyan(), value);
    }

    Ok(())
}

/// Get a single configuration value
pub async fn run_get(explicit: Option<&Path>, key: &str) -> Result<()> {
    let config_path = util::config_path(explicit)?;
    let cfg = Config::load(&config_path)?;

    let value = cfg.get(key).with_context(|| {
        format!("Unknown config key: {}. Use 'annexstat config list' to see available keys.", key)
    })?;
    println!("{}", value);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(explicit: Option<&Path>, key: &str, value: &str) -> Result<()> {
    let config_path = util::config_path(explicit)?;
    let mut cfg = Config::load(&config_path)?;

    cfg.set(key, value).context("Invalid configuration value")?;
    cfg.save(&config_path)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    if key != "roots" {
        println!(
            "{}",
            "Note: Restart daemon for changes to take effect (annexstat stop && annexstat start)".yellow()
        );
    }

    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(explicit: Option<&Path>, create: bool) -> Result<()> {
    let config_path = util::config_path(explicit)?;

    if create && !config_path.exists() {
        Config::init_if_missing(&config_path)?;
        println!("{} Created config file at: {}", "✓".green(), config_path.display());
    } else if config_path.exists() {
        println!("{}", config_path.display());
    } else {
        println!("{}", config_path.display());
        println!("{}", "File does not exist. Use --create to create it.".yellow());
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", config::example_config());
    Ok(())
}
