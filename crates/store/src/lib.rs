//! Persisted status store
//!
//! This crate provides:
//! - The `StatusStore` repository trait the engine talks to
//! - `SledStore`, the sled-backed implementation
//! - Key layout helpers for per-tree prefixes

pub mod keys;
pub mod sled_store;

pub use sled_store::SledStore;

use annexstat_core::{
    CommandRequest, CommitCursor, ContentKey, PathStatus, RepoPath, TreeId, WatchedTree,
};
use thiserror::Error;

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of mapping changed content keys back to paths
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyLookup {
    pub paths: Vec<RepoPath>,
    /// Keys with no stored path
    pub unmapped: Vec<ContentKey>,
}

/// Repository over per-tree path statuses, cursors, the watched set and
/// the command queue
///
/// Implementations are synchronous; the engine calls them from blocking
/// tasks or under short critical sections.
pub trait StatusStore: Send + Sync {
    fn status(&self, tree: TreeId, path: &RepoPath) -> Result<Option<PathStatus>>;

    /// Insert or replace; bumps `last_modified`
    fn put_status(&self, tree: TreeId, status: &PathStatus) -> Result<()>;

    fn put_statuses(&self, tree: TreeId, statuses: &[PathStatus]) -> Result<()> {
        for status in statuses {
            self.put_status(tree, status)?;
        }
        Ok(())
    }

    /// Stored immediate children of `dir`
    fn children_of(&self, tree: TreeId, dir: &RepoPath) -> Result<Vec<PathStatus>>;

    /// Every stored status of a tree
    fn statuses(&self, tree: TreeId) -> Result<Vec<PathStatus>>;

    fn dirs_needing_refresh(&self, tree: TreeId) -> Result<Vec<RepoPath>>;

    /// Ancestor directories of stored paths that have no entry themselves
    fn dirs_missing_entries(&self, tree: TreeId) -> Result<Vec<RepoPath>>;

    fn untracked_paths(&self, tree: TreeId) -> Result<Vec<RepoPath>>;

    fn paths_for_content_keys(&self, tree: TreeId, keys: &[ContentKey]) -> Result<KeyLookup>;

    /// Mark a directory for re-aggregation, creating a pending entry if
    /// it has none
    ///
    /// Every call bumps the directory's invalidation generation.
    fn invalidate_dir(&self, tree: TreeId, dir: &RepoPath) -> Result<()>;

    /// Invalidation generation of a directory, 0 if never invalidated
    fn dir_generation(&self, tree: TreeId, dir: &RepoPath) -> Result<u64>;

    /// Write a directory status unless the directory was invalidated after
    /// `generation` was read. Returns whether it was written.
    fn put_dir_status_if(&self, tree: TreeId, status: &PathStatus, generation: u64) -> Result<bool>;

    /// Drop every status and the cursor of a tree
    fn remove_tree(&self, tree: TreeId) -> Result<()>;

    fn cursor(&self, tree: TreeId) -> Result<Option<CommitCursor>>;

    fn put_cursor(&self, tree: TreeId, cursor: &CommitCursor) -> Result<()>;

    fn watched_trees(&self) -> Result<Vec<WatchedTree>>;

    /// Replace the persisted watched set
    fn put_watched_trees(&self, trees: &[WatchedTree]) -> Result<()>;

    fn push_command(&self, request: &CommandRequest) -> Result<()>;

    /// Remove and return queued commands, oldest first
    fn drain_commands(&self) -> Result<Vec<CommandRequest>>;

    /// Unix milliseconds of the latest status write (0 if never written)
    fn last_modified(&self) -> Result<u64>;
}
