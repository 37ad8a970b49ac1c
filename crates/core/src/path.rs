//! Repository-relative paths
//!
//! Every path the engine stores is relative to its tree root, uses `/` as
//! the separator, and never contains `..`. The tree root itself is `"."`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path};
use thiserror::Error;

/// Path normalization errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("absolute path not allowed: {0}")]
    Absolute(String),
    #[error("parent traversal not allowed: {0}")]
    ParentTraversal(String),
    #[error("path is not valid UTF-8")]
    NotUtf8,
    #[error("{path} is outside of {root}")]
    OutsideTree { path: String, root: String },
}

/// Slash-separated path relative to a watched tree root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoPath(String);

impl RepoPath {
    /// The tree root
    pub const ROOT: &'static str = ".";

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Normalize a relative path
    ///
    /// - Rejects absolute paths and `..` components
    /// - Removes `./` prefixes and trailing slashes
    /// - Empty input maps to the root
    pub fn new(path: &str) -> Result<Self, PathError> {
        if path.starts_with('/') {
            return Err(PathError::Absolute(path.to_string()));
        }

        let mut parts = Vec::new();
        for part in path.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(PathError::ParentTraversal(path.to_string())),
                other => parts.push(other),
            }
        }

        if parts.is_empty() {
            Ok(Self::root())
        } else {
            Ok(Self(parts.join("/")))
        }
    }

    /// Relative path of `absolute` inside `root`
    pub fn from_absolute(root: &Path, absolute: &Path) -> Result<Self, PathError> {
        let rel = absolute
            .strip_prefix(root)
            .map_err(|_| PathError::OutsideTree {
                path: absolute.display().to_string(),
                root: root.display().to_string(),
            })?;

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_str().ok_or(PathError::NotUtf8)?),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(PathError::ParentTraversal(absolute.display().to_string()))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(PathError::Absolute(absolute.display().to_string()))
                }
            }
        }

        Self::new(&parts.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// Parent directory, `None` for the root
    pub fn parent(&self) -> Option<RepoPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Every ancestor from the immediate parent up to the root
    pub fn ancestors(&self) -> Vec<RepoPath> {
        let mut out = Vec::new();
        let mut current = self.parent();
        while let Some(dir) = current {
            current = dir.parent();
            out.push(dir);
        }
        out
    }

    /// Number of components; the root has depth 0
    pub fn depth(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.split('/').count()
        }
    }

    /// Final component (the root's name is `"."`)
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Append a single child name
    pub fn join(&self, name: &str) -> RepoPath {
        if self.is_root() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    /// Is `self` the immediate parent of `other`?
    pub fn is_parent_of(&self, other: &RepoPath) -> bool {
        other.parent().as_ref() == Some(self)
    }
}

impl fmt::Display for RepoPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort directories deepest first, so children resolve before parents
pub fn sort_deepest_first(paths: &mut [RepoPath]) {
    paths.sort_by(|a, b| b.depth().cmp(&a.depth()).then_with(|| a.cmp(b)));
}
