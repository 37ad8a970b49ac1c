//! Shared utilities for CLI commands

use annexstat_engine::config;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Files the daemon keeps under the state directory
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub store: PathBuf,
    pub socket: PathBuf,
    pub logs: PathBuf,
}

impl StatePaths {
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            store: dir.join("store"),
            socket: dir.join("daemon.sock"),
            logs: dir.join("logs"),
            dir,
        }
    }

    /// Layout under the default (or `ANNEXSTAT_STATE_DIR`) state directory
    pub fn resolve() -> Result<Self> {
        let dir = config::state_dir().context("Could not determine state directory")?;
        Ok(Self::under(dir))
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs.join("daemon.log")
    }
}

/// Config file named on the command line, or the default location
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => absolute(path),
        None => config::config_file_path().context("Could not determine config file path"),
    }
}

/// Absolute form of `path`, resolved against the current directory
///
/// Symlinks are resolved when the path exists so it can be matched
/// against canonical tree roots.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path)
    };
    Ok(joined.canonicalize().unwrap_or(joined))
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts_ms: u64) -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let datetime = UNIX_EPOCH + Duration::from_millis(ts_ms);

    if let Ok(elapsed) = SystemTime::now().duration_since(datetime) {
        let seconds = elapsed.as_secs();

        if seconds < 60 {
            format!("{} seconds ago", seconds)
        } else if seconds < 3600 {
            format!("{} minutes ago", seconds / 60)
        } else if seconds < 86400 {
            format!("{} hours ago", seconds / 3600)
        } else if seconds < 604800 {
            format!("{} days ago", seconds / 86400)
        } else {
            format!("{} weeks ago", seconds / 604800)
        }
    } else {
        "in the future".to_string()
    }
}
