//! Per-path annex status records

use crate::RepoPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether content is locally available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Presence {
    Present,
    Absent,
    /// Directory holding both present and absent content
    PartiallyPresent,
}

impl Presence {
    /// Fold two presences into the presence of a directory containing both
    pub fn combine(self, other: Presence) -> Presence {
        match (self, other) {
            (Presence::Present, Presence::Present) => Presence::Present,
            (Presence::Absent, Presence::Absent) => Presence::Absent,
            _ => Presence::PartiallyPresent,
        }
    }
}

/// Whether the known copy count meets the configured minimum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sufficiency {
    Sufficient,
    Insufficient,
}

impl Sufficiency {
    pub fn and(self, other: Sufficiency) -> Sufficiency {
        if self == Sufficiency::Sufficient && other == Sufficiency::Sufficient {
            Sufficiency::Sufficient
        } else {
            Sufficiency::Insufficient
        }
    }

    pub fn from_lacking(lacking: bool) -> Sufficiency {
        if lacking {
            Sufficiency::Insufficient
        } else {
            Sufficiency::Sufficient
        }
    }
}

/// Replica count and its sufficiency, always known together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replicas {
    pub count: u32,
    pub sufficiency: Sufficiency,
}

impl Replicas {
    pub fn new(count: u32, sufficiency: Sufficiency) -> Self {
        Self { count, sufficiency }
    }

    /// Directory view of two children: fewest copies, and sufficient only if both are
    pub fn combine(self, other: Replicas) -> Replicas {
        Replicas {
            count: self.count.min(other.count),
            sufficiency: self.sufficiency.and(other.sufficiency),
        }
    }
}

/// Opaque annex content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentKey(String);

impl ContentKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque commit hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitHash(String);

impl CommitHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(12) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl fmt::Display for CommitHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last handled point in each of the two commit histories of a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCursor {
    /// Primary (content) history; `None` while it has no commits
    pub primary: Option<CommitHash>,
    /// Location-metadata history
    pub metadata: CommitHash,
}

/// Facts about one path as reported by the version-control tooling
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFacts {
    pub is_dir: bool,
    pub tracked: bool,
    pub presence: Option<Presence>,
    pub replicas: Option<Replicas>,
    pub content_key: Option<ContentKey>,
}

impl PathFacts {
    pub fn untracked(is_dir: bool) -> Self {
        Self {
            is_dir,
            tracked: false,
            presence: None,
            replicas: None,
            content_key: None,
        }
    }

    pub fn tracked_file(presence: Presence, replicas: Replicas, key: ContentKey) -> Self {
        Self {
            is_dir: false,
            tracked: true,
            presence: Some(presence),
            replicas: Some(replicas),
            content_key: Some(key),
        }
    }
}

/// Stored status of one path in a watched tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStatus {
    pub path: RepoPath,
    pub is_dir: bool,
    pub is_tracked: bool,
    pub presence: Option<Presence>,
    pub replicas: Option<Replicas>,
    /// Directories never carry a key
    pub content_key: Option<ContentKey>,
    /// Unix milliseconds of the last write
    pub refreshed_at_ms: u64,
    pub needs_refresh: bool,
}

impl PathStatus {
    /// Status built from a completed VCS query
    pub fn from_facts(path: RepoPath, facts: PathFacts, now_ms: u64) -> Self {
        Self {
            path,
            is_dir: facts.is_dir,
            is_tracked: facts.tracked,
            presence: facts.presence,
            replicas: facts.replicas,
            content_key: if facts.is_dir { None } else { facts.content_key },
            refreshed_at_ms: now_ms,
            needs_refresh: false,
        }
    }

    /// Directory entry whose children are still being resolved
    pub fn pending_dir(path: RepoPath, now_ms: u64) -> Self {
        Self {
            path,
            is_dir: true,
            is_tracked: true,
            presence: None,
            replicas: None,
            content_key: None,
            refreshed_at_ms: now_ms,
            needs_refresh: true,
        }
    }

    /// Fully aggregated directory
    pub fn resolved_dir(
        path: RepoPath,
        presence: Presence,
        replicas: Option<Replicas>,
        now_ms: u64,
    ) -> Self {
        Self {
            path,
            is_dir: true,
            is_tracked: true,
            presence: Some(presence),
            replicas,
            content_key: None,
            refreshed_at_ms: now_ms,
            needs_refresh: false,
        }
    }

    /// Directory with no tracked content below it
    pub fn is_empty_dir(&self) -> bool {
        self.is_dir
            && !self.needs_refresh
            && self.presence == Some(Presence::Present)
            && self.replicas.is_none()
    }

    /// Everything a parent directory needs from this child is known
    pub fn is_resolved(&self) -> bool {
        if !self.is_tracked {
            return true;
        }
        if self.is_dir {
            return !self.needs_refresh && self.presence.is_some();
        }
        self.presence.is_some() && self.replicas.is_some()
    }

    /// Is the stored status younger than `max_age_ms`?
    pub fn is_fresh(&self, now_ms: u64, max_age_ms: u64) -> bool {
        !self.needs_refresh && self.refreshed_at_ms.saturating_add(max_age_ms) > now_ms
    }

    /// Same badge-relevant content, ignoring timestamps and the refresh flag
    pub fn same_status(&self, other: &PathStatus) -> bool {
        self.path == other.path
            && self.is_dir == other.is_dir
            && self.is_tracked == other.is_tracked
            && self.presence == other.presence
            && self.replicas == other.replicas
            && self.content_key == other.content_key
    }
}
