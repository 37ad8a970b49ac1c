//! Core domain types for annexstat
//!
//! This crate provides:
//! - Watched working trees and their stable identifiers
//! - Repository-relative paths (`RepoPath`) and parent/depth helpers
//! - Per-path annex status records and commit cursors
//! - Out-of-band annex command requests
//! - The pure status → badge decision table

pub mod badge;
pub mod command;
pub mod path;
pub mod status;
pub mod tree;

// Re-exports
pub use badge::{badge_for, Badge, CopyBucket};
pub use command::{AnnexCommand, CommandRequest};
pub use path::{PathError, RepoPath};
pub use status::{
    CommitCursor, CommitHash, ContentKey, PathFacts, PathStatus, Presence, Replicas, Sufficiency,
};
pub use tree::{TreeId, WatchedTree};

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
