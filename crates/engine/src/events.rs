//! Notifications published to clients

use annexstat_core::{PathStatus, TreeId};
use serde::Serialize;

/// A stored status changed in a way that affects its badge
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChanged {
    pub tree: TreeId,
    pub status: PathStatus,
}

/// A scan finished or was stopped
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub tree: TreeId,
    /// False when stopped early or the baseline could not be read
    pub completed: bool,
    pub baseline: Option<annexstat_core::CommitCursor>,
    pub files: usize,
}
