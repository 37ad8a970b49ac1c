//! Engine and daemon configuration
//!
//! Stored as TOML at `$XDG_CONFIG_HOME/annexstat/config.toml`. Every field
//! has a default, so a missing file or a partial file is fine.

use annexstat_watcher::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("no config directory on this platform")]
    NoConfigDir,
    #[error("unknown key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

pub const CONFIG_ENV: &str = "ANNEXSTAT_CONFIG";
pub const STATE_DIR_ENV: &str = "ANNEXSTAT_STATE_DIR";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root folders to keep badges for
    pub roots: Vec<PathBuf>,
    pub engine: EngineConfig,
    pub vcs: VcsConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub high_concurrency_per_tree: usize,
    pub low_concurrency_per_tree: usize,
    pub cache_capacity: usize,
    /// Freshness window for requests that do not name one
    pub default_max_age_secs: u64,
    pub fallback_interval_secs: u64,
    pub tick_millis: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            high_concurrency_per_tree: 20,
            low_concurrency_per_tree: 5,
            cache_capacity: 1000,
            default_max_age_secs: 0,
            fallback_interval_secs: 300,
            tick_millis: 1000,
        }
    }
}

impl EngineConfig {
    pub fn default_max_age(&self) -> Duration {
        Duration::from_secs(self.default_max_age_secs)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_secs(self.fallback_interval_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VcsConfig {
    pub git_bin: PathBuf,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            git_bin: PathBuf::from("git"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub debounce_millis: u64,
    #[serde(flatten)]
    pub ignore: IgnoreConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_millis: 100,
            ignore: IgnoreConfig::default(),
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_millis)
    }
}

/// Config file location; `ANNEXSTAT_CONFIG` overrides the default
pub fn config_file_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("annexstat").join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// State directory (store, lock, socket, logs); `ANNEXSTAT_STATE_DIR`
/// overrides the default
pub fn state_dir() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(STATE_DIR_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("annexstat"))
        .ok_or(ConfigError::NoConfigDir)
}

impl Config {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let text = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, text).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the example config if nothing exists at `path` yet
    pub fn init_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, example_config()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }

    pub fn validate(&self) -> Result<()> {
        let e = &self.engine;
        check_range("engine.high_concurrency_per_tree", e.high_concurrency_per_tree as u64, 1, 256)?;
        check_range("engine.low_concurrency_per_tree", e.low_concurrency_per_tree as u64, 1, 256)?;
        check_range("engine.cache_capacity", e.cache_capacity as u64, 1, 10_000_000)?;
        check_range("engine.default_max_age_secs", e.default_max_age_secs, 0, 86_400)?;
        check_range("engine.fallback_interval_secs", e.fallback_interval_secs, 5, 86_400)?;
        check_range("engine.tick_millis", e.tick_millis, 50, 60_000)?;
        check_range("watch.debounce_millis", self.watch.debounce_millis, 10, 60_000)?;

        for root in &self.roots {
            if !root.is_absolute() {
                return Err(ConfigError::InvalidValue {
                    key: "roots".to_string(),
                    reason: format!("{} is not an absolute path", root.display()),
                });
            }
        }
        Ok(())
    }

    /// Read a dotted key (`engine.tick_millis`) as display text
    pub fn get(&self, key: &str) -> Result<String> {
        let value = toml::Value::try_from(self)?;
        let found = lookup(&value, key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        Ok(match found {
            toml::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Every leaf key with its value, in file order
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let value = toml::Value::try_from(self)?;
        let mut out = Vec::new();
        flatten("", &value, &mut out);
        Ok(out)
    }

    /// Set a dotted key from its text form and re-validate
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut value = toml::Value::try_from(&*self)?;
        let slot = lookup_mut(&mut value, key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;

        let parsed = match slot {
            toml::Value::Integer(_) => raw.parse::<i64>().map(toml::Value::Integer).map_err(|e| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?,
            toml::Value::Boolean(_) => raw.parse::<bool>().map(toml::Value::Boolean).map_err(|e| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: e.to_string(),
                }
            })?,
            toml::Value::Array(_) => toml::Value::Array(
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(|item| toml::Value::String(item.to_string()))
                    .collect(),
            ),
            _ => toml::Value::String(raw.to_string()),
        };
        *slot = parsed;

        let updated: Config = value.try_into()?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("{} is outside {}..={}", value, min, max),
        });
    }
    Ok(())
}

fn lookup<'a>(value: &'a toml::Value, key: &str) -> Option<&'a toml::Value> {
    key.split('.').try_fold(value, |current, part| current.get(part))
}

fn lookup_mut<'a>(value: &'a mut toml::Value, key: &str) -> Option<&'a mut toml::Value> {
    key.split('.').try_fold(value, |current, part| current.get_mut(part))
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (name, child) in table {
                let key = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", prefix, name)
                };
                flatten(&key, child, out);
            }
        }
        toml::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Commented config written by `config init`
pub fn example_config() -> String {
    r#"# annexstat configuration

# Root folders of git-annex working trees to keep badges for
roots = []

[engine]
# Concurrent refreshes per tree in each priority lane
high_concurrency_per_tree = 20
low_concurrency_per_tree = 5

# In-memory status cache entries
cache_capacity = 1000

# Freshness window for status requests, in seconds
default_max_age_secs = 0

# Seconds between change checks of every tree, in case a filesystem event was missed
fallback_interval_secs = 300

# Aggregation and scan scheduling interval
tick_millis = 1000

[vcs]
git_bin = "git"

[watch]
debounce_millis = 100
use_gitignore = true
additional_patterns = []
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(&temp_dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.engine.high_concurrency_per_tree, 20);
        assert_eq!(config.engine.low_concurrency_per_tree, 5);
        assert_eq!(config.engine.cache_capacity, 1000);
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(&example_config()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.watch.ignore.use_gitignore);
    }

    #[test]
    fn test_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[engine]\ntick_millis = 250\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.engine.tick_millis, 250);
        assert_eq!(config.engine.cache_capacity, 1000);
        assert_eq!(config.watch.debounce_millis, 100);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.roots.push(PathBuf::from("/data/annex"));
        config.watch.ignore.additional_patterns.push("*.tmp".to_string());
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn test_get_and_set_dotted_keys() {
        let mut config = Config::default();
        assert_eq!(config.get("engine.cache_capacity").unwrap(), "1000");
        assert_eq!(config.get("vcs.git_bin").unwrap(), "git");

        config.set("engine.cache_capacity", "50").unwrap();
        assert_eq!(config.engine.cache_capacity, 50);

        config.set("watch.use_gitignore", "false").unwrap();
        assert!(!config.watch.ignore.use_gitignore);

        config.set("roots", "/a, /b").unwrap();
        assert_eq!(config.roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);

        assert!(matches!(config.get("engine.nope"), Err(ConfigError::UnknownKey(_))));
    }

    #[test]
    fn test_set_rejects_out_of_range() {
        let mut config = Config::default();
        let err = config.set("engine.high_concurrency_per_tree", "0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        // Unchanged after a rejected set
        assert_eq!(config.engine.high_concurrency_per_tree, 20);

        assert!(config.set("engine.tick_millis", "soon").is_err());
        assert!(config.set("roots", "relative/path").is_err());
    }

    #[test]
    fn test_entries_lists_leaf_keys() {
        let entries = Config::default().entries().unwrap();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"engine.tick_millis"));
        assert!(keys.contains(&"vcs.git_bin"));
        assert!(keys.contains(&"watch.debounce_millis"));
        assert!(keys.contains(&"watch.use_gitignore"));
    }
}
