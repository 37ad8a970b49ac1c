//! Version-control adapter
//!
//! This crate provides:
//! - The `VcsQuery` trait the engine queries trees through
//! - `GitAnnexCli`, which runs `git` / `git annex` subprocesses
//! - Pure parsers for their output

pub mod git_annex;
pub mod parse;

pub use git_annex::GitAnnexCli;

use annexstat_core::{
    AnnexCommand, CommitHash, ContentKey, PathFacts, RepoPath, TreeId, WatchedTree,
};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// VCS failures; none of these are fatal to the engine
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("unexpected output: {0}")]
    Malformed(String),
    #[error("no annex identifier for {}", .0.display())]
    MissingTreeId(PathBuf),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Result type for VCS queries
pub type Result<T> = std::result::Result<T, VcsError>;

/// Queries and commands against a working tree
///
/// Every call blocks; the engine runs them on the blocking pool.
pub trait VcsQuery: Send + Sync + 'static {
    /// Content-store identifier of the repository at `root`
    fn tree_id(&self, root: &Path) -> Result<TreeId>;

    fn is_directory(&self, tree: &WatchedTree, path: &RepoPath) -> Result<bool>;

    fn status_of(&self, tree: &WatchedTree, path: &RepoPath) -> Result<PathFacts>;

    /// Non-ignored children of `dir` that exist in the working tree
    fn immediate_children(&self, tree: &WatchedTree, dir: &RepoPath) -> Result<Vec<RepoPath>>;

    /// Files touched by primary-history commits after `since`, or by every
    /// commit when `since` is `None`
    fn changed_files_since(
        &self,
        tree: &WatchedTree,
        since: Option<&CommitHash>,
    ) -> Result<Vec<RepoPath>>;

    /// Keys whose location logs changed after `since`
    fn changed_content_keys_since(
        &self,
        tree: &WatchedTree,
        since: &CommitHash,
    ) -> Result<Vec<ContentKey>>;

    /// `None` while the primary history has no commits
    fn latest_primary_commit(&self, tree: &WatchedTree) -> Result<Option<CommitHash>>;

    fn latest_metadata_commit(&self, tree: &WatchedTree) -> Result<CommitHash>;

    fn run_command(&self, tree: &WatchedTree, path: &RepoPath, command: AnnexCommand)
        -> Result<()>;
}
