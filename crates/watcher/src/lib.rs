//! Change signals for watched trees
//!
//! This crate provides:
//! - Recursive filesystem watches per tree (`TreeWatcher`)
//! - Filtering of annex churn and gitignored paths
//! - Per-tree debouncing
//! - A coarse fallback timer for missed events

pub mod debounce;
pub mod ignore;
pub mod reconcile;
pub mod watch;

pub use ignore::{IgnoreConfig, IgnoreRules};
pub use reconcile::FallbackTimer;
pub use watch::{SignalPump, TreeWatcher};

use annexstat_core::TreeId;

/// Something in a tree may have changed; run change detection for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeSignal {
    pub tree: TreeId,
}
