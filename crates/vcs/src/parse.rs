//! Parsers for `git` and `git annex` output
//!
//! Kept free of process handling so they can be tested on captured output.

use crate::{Result, VcsError};
use annexstat_core::{CommitHash, ContentKey, Presence, RepoPath, TreeId};
use serde::Deserialize;
use std::collections::HashSet;

/// One `git annex --json info` record
#[derive(Debug, Deserialize)]
struct InfoJson {
    success: bool,
    /// Only files report presence
    present: Option<bool>,
    key: Option<String>,
    #[serde(rename = "local annex keys")]
    local_annex_keys: Option<u64>,
    #[serde(rename = "annexed files in working tree")]
    annexed_files_in_working_tree: Option<u64>,
}

/// What `git annex info` says about a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoRecord {
    /// Not managed by the annex
    Untracked,
    File { present: bool, key: ContentKey },
    Dir { presence: Presence },
}

pub fn parse_info(stdout: &str) -> Result<InfoRecord> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| VcsError::Malformed("empty info output".to_string()))?;

    let info: InfoJson = serde_json::from_str(line)
        .map_err(|e| VcsError::Malformed(format!("info json: {}", e)))?;

    if !info.success {
        return Ok(InfoRecord::Untracked);
    }

    if let (Some(present), Some(key)) = (info.present, info.key) {
        return Ok(InfoRecord::File {
            present,
            key: ContentKey::new(key),
        });
    }

    match (info.local_annex_keys, info.annexed_files_in_working_tree) {
        (Some(local), Some(annexed)) => {
            let presence = if local == annexed {
                Presence::Present
            } else if local == 0 {
                Presence::Absent
            } else {
                Presence::PartiallyPresent
            };
            Ok(InfoRecord::Dir { presence })
        }
        _ => Err(VcsError::Malformed(format!("no status in info record: {}", line))),
    }
}

#[derive(Debug, Deserialize)]
struct WhereisJson {
    success: bool,
    #[serde(default)]
    whereis: Vec<serde_json::Value>,
}

/// Fewest known copies across the `whereis` records (one per file)
pub fn parse_whereis(stdout: &str) -> Result<Option<u32>> {
    let mut least: Option<u32> = None;
    for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record: WhereisJson = serde_json::from_str(line)
            .map_err(|e| VcsError::Malformed(format!("whereis json: {}", e)))?;
        if !record.success && record.whereis.is_empty() {
            // git-annex reports a failed record when a file has no copies
            least = Some(0);
            continue;
        }
        let count = record.whereis.len() as u32;
        least = Some(least.map_or(count, |l| l.min(count)));
    }
    Ok(least)
}

/// `find --lackingcopies=1` prints one record per lacking file
pub fn parse_lacking(stdout: &str) -> bool {
    stdout.lines().any(|l| !l.trim().is_empty())
}

/// File list from `git log --name-only --pretty=format:`
pub fn parse_changed_files(stdout: &str) -> Vec<RepoPath> {
    let mut seen = HashSet::new();
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter_map(|l| RepoPath::new(l).ok())
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Content keys from location-log file names on the metadata branch
///
/// Location logs live at `<hash dirs>/<key>.log`; other logs (`uuid.log`,
/// `*.log.met`, `*.log.web`) are skipped.
pub fn parse_location_log_keys(stdout: &str) -> Vec<ContentKey> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for line in stdout.lines().map(str::trim) {
        let Some((dir, name)) = line.rsplit_once('/') else {
            continue;
        };
        if dir.is_empty() {
            continue;
        }
        if let Some(key) = name.strip_suffix(".log") {
            if !key.is_empty() && seen.insert(key.to_string()) {
                keys.push(ContentKey::new(key));
            }
        }
    }
    keys
}

/// Immediate child names of `dir` from NUL-separated `git ls-files` output
pub fn children_from_ls_files(dir: &RepoPath, stdout: &str) -> Vec<String> {
    let prefix = if dir.is_root() {
        String::new()
    } else {
        format!("{}/", dir.as_str())
    };

    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for entry in stdout.split('\0').filter(|e| !e.is_empty()) {
        let Some(rest) = entry.strip_prefix(prefix.as_str()) else {
            continue;
        };
        let name = rest.split('/').next().unwrap_or_default();
        if !name.is_empty() && seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    }
    names
}

/// First line as a full commit hash
pub fn parse_commit_hash(stdout: &str) -> Option<CommitHash> {
    let line = stdout.lines().next()?.trim().trim_matches('"');
    if line.len() >= 40 && line.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(CommitHash::new(line))
    } else {
        None
    }
}

/// `git config annex.uuid`
pub fn parse_tree_id(stdout: &str) -> Option<TreeId> {
    TreeId::parse(stdout.lines().next()?)
}
