//! Ignore rules for change events
//!
//! Sources, checked in order:
//! 1. Built-in annex churn under `.git/` (temp dirs, object store, lock files)
//! 2. Editor temporary files
//! 3. `.gitignore` patterns (optional, enabled by default)
//! 4. Config-based patterns
//!
//! Unlike a working-tree watcher, most of `.git/` is *not* ignored: ref and
//! branch updates there are exactly the commits the engine reacts to.

use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Paths under `.git/` that change constantly without producing commits
const ANNEX_NOISE: &[&str] = &[
    ".git/annex/tmp",
    ".git/annex/misctmp",
    ".git/annex/othertmp",
    ".git/annex/mergedrefs",
    ".git/annex/objects",
    ".git/annex/journal",
    ".git/annex/transfer",
    ".git/annex/ssh",
    ".git/objects",
    ".git/logs",
];

/// Ignore rule set for one watched tree
pub struct IgnoreRules {
    root: PathBuf,
    gitignore: Option<Gitignore>,
    config: IgnoreConfig,
}

impl IgnoreRules {
    /// Load ignore rules for the tree at `root`
    pub fn load(root: &Path, config: IgnoreConfig) -> Result<Self> {
        let mut rules = Self {
            root: root.to_path_buf(),
            gitignore: None,
            config,
        };
        rules.reload_ignore_files()?;
        Ok(rules)
    }

    /// Re-read `.gitignore` from disk; on error the current rules stay
    pub fn reload_ignore_files(&mut self) -> Result<()> {
        let path = self.root.join(".gitignore");
        if !self.config.use_gitignore || !path.exists() {
            self.gitignore = None;
            return Ok(());
        }
        let mut builder = GitignoreBuilder::new(&self.root);
        if let Some(err) = builder.add(&path) {
            return Err(err.into());
        }
        self.gitignore = Some(builder.build()?);
        Ok(())
    }

    /// Should an event for `path` (relative to the tree root) be dropped?
    pub fn should_ignore(&self, path: &Path) -> bool {
        if is_annex_noise(path) || is_lock_file(path) || is_editor_temp(path) {
            return true;
        }

        // Everything else inside .git is a potential commit
        if path.starts_with(".git") {
            return false;
        }

        if let Some(gitignore) = &self.gitignore {
            let is_dir = self.root.join(path).is_dir();
            if gitignore
                .matched_path_or_any_parents(path, is_dir)
                .is_ignore()
            {
                return true;
            }
        }

        self.config
            .additional_patterns
            .iter()
            .any(|pattern| matches_glob_pattern(path, pattern))
    }
}

fn is_annex_noise(path: &Path) -> bool {
    ANNEX_NOISE.iter().any(|noise| path.starts_with(noise))
}

/// `index.lock`, `HEAD.lock`, `refs/heads/git-annex.lock`, ...
fn is_lock_file(path: &Path) -> bool {
    path.starts_with(".git")
        && path
            .extension()
            .map(|ext| ext == "lock")
            .unwrap_or(false)
}

fn is_editor_temp(path: &Path) -> bool {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

    filename.ends_with(".swp")
        || filename.ends_with(".swo")
        || filename.ends_with('~')
        || (filename.starts_with('#') && filename.ends_with('#'))
        || filename.starts_with(".#")
        || filename == ".DS_Store"
        || filename.starts_with("._")
}

/// Single-`*` glob, or a plain substring
fn matches_glob_pattern(path: &Path, pattern: &str) -> bool {
    let path_str = path.to_string_lossy();
    match pattern.split_once('*') {
        Some((prefix, suffix)) if !suffix.contains('*') => {
            path_str.starts_with(prefix) && path_str.ends_with(suffix)
        }
        Some(_) => false,
        None => path_str.contains(pattern),
    }
}

/// Ignore configuration (`[watch]` section)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreConfig {
    #[serde(default = "default_true")]
    pub use_gitignore: bool,

    #[serde(default)]
    pub additional_patterns: Vec<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            use_gitignore: true,
            additional_patterns: vec![],
        }
    }
}

fn default_true() -> bool {
    true
}
