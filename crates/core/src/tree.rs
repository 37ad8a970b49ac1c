//! Watched working trees

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of a working tree (the annex repository UUID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeId(Uuid);

impl TreeId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse the identifier as printed by `git config annex.uuid`
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }

    /// Fresh random identifier (tests and fixtures)
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Fixed-width key prefix used by the persisted store
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TreeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// A working tree the engine keeps badges for
///
/// Identity is the `id` alone: the same repository moved to a new
/// location is still the same tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedTree {
    pub id: TreeId,
    pub root: PathBuf,
}

impl WatchedTree {
    pub fn new(id: TreeId, root: impl Into<PathBuf>) -> Self {
        Self {
            id,
            root: root.into(),
        }
    }

    /// Absolute filesystem path of a repository-relative path
    pub fn absolute(&self, path: &crate::RepoPath) -> PathBuf {
        if path.is_root() {
            self.root.clone()
        } else {
            self.root.join(path.as_str())
        }
    }

    /// Does an absolute path live inside this tree?
    pub fn contains_path(&self, absolute: &Path) -> bool {
        absolute.starts_with(&self.root)
    }
}

impl PartialEq for WatchedTree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WatchedTree {}

impl Hash for WatchedTree {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for WatchedTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.root.display(), self.id)
    }
}
