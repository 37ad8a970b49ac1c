//! Out-of-band annex commands requested by clients

use crate::{RepoPath, TreeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// A content command run through `git annex`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnexCommand {
    Get,
    Add,
    Drop,
    Lock,
    Unlock,
}

impl AnnexCommand {
    pub const ALL: [AnnexCommand; 5] = [
        AnnexCommand::Get,
        AnnexCommand::Add,
        AnnexCommand::Drop,
        AnnexCommand::Lock,
        AnnexCommand::Unlock,
    ];

    /// `git annex` subcommand name
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnexCommand::Get => "get",
            AnnexCommand::Add => "add",
            AnnexCommand::Drop => "drop",
            AnnexCommand::Lock => "lock",
            AnnexCommand::Unlock => "unlock",
        }
    }
}

impl fmt::Display for AnnexCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnexCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnnexCommand::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown annex command: {}", s))
    }
}

/// A queued command; persisted until executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub id: Ulid,
    pub tree: TreeId,
    pub path: RepoPath,
    pub command: AnnexCommand,
}

impl CommandRequest {
    pub fn new(tree: TreeId, path: RepoPath, command: AnnexCommand) -> Self {
        Self {
            id: Ulid::new(),
            tree,
            path,
            command,
        }
    }
}
