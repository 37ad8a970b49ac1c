//! Incremental change detection from commit history
//!
//! Both histories of a tree are diffed from its cursor: primary commits
//! give changed files directly, location-log commits give content keys that
//! are mapped back to paths through the store. The cursor only advances
//! after every implied path has been submitted, so a crash in between just
//! repeats the same diff.

use crate::context::EngineContext;
use crate::scheduler::{Priority, Scheduler};
use ahash::AHashMap;
use annexstat_core::{CommitCursor, RepoPath, TreeId, WatchedTree};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Paths implied by the commits after a cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub paths: BTreeSet<RepoPath>,
    /// Cursor to store once `paths` are submitted
    pub latest: CommitCursor,
    /// Some content keys had no known path, so untracked paths were added
    pub fallback_used: bool,
}

/// Result of one detector run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub submitted: usize,
    pub fallback_used: bool,
    pub cursor_advanced: bool,
}

/// Follow-up owed by a running check
#[derive(Debug, Default)]
struct Rerun {
    requested: bool,
    /// Newest explicit baseline among the folded requests
    base: Option<CommitCursor>,
}

pub struct ChangeDetector {
    ctx: Arc<EngineContext>,
    scheduler: Arc<Scheduler>,
    /// Trees with a check running
    running: Mutex<AHashMap<TreeId, Rerun>>,
}

impl ChangeDetector {
    pub fn new(ctx: Arc<EngineContext>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            ctx,
            scheduler,
            running: Mutex::new(AHashMap::new()),
        }
    }

    /// Paths changed since `cursor`
    pub fn changed_paths(&self, tree: &WatchedTree, cursor: &CommitCursor) -> Result<ChangeSet> {
        let vcs = &self.ctx.vcs;

        // Read the heads first: anything committed while diffing is picked
        // up again next time
        let latest = CommitCursor {
            primary: vcs
                .latest_primary_commit(tree)
                .context("Failed to read latest primary commit")?,
            metadata: vcs
                .latest_metadata_commit(tree)
                .context("Failed to read latest metadata commit")?,
        };

        let mut paths = BTreeSet::new();
        let mut fallback_used = false;

        if latest.primary.is_some() && latest.primary != cursor.primary {
            let files = vcs
                .changed_files_since(tree, cursor.primary.as_ref())
                .context("Failed to list changed files")?;
            paths.extend(files);
        }

        if latest.metadata != cursor.metadata {
            let keys = vcs
                .changed_content_keys_since(tree, &cursor.metadata)
                .context("Failed to list changed content keys")?;
            if !keys.is_empty() {
                let lookup = self
                    .ctx
                    .store
                    .paths_for_content_keys(tree.id, &keys)
                    .context("Failed to map content keys to paths")?;
                paths.extend(lookup.paths);

                if !lookup.unmapped.is_empty() {
                    // Content we have no path for, e.g. added outside of
                    // the engine: recheck everything not yet tracked
                    debug!(tree = %tree.id, unmapped = lookup.unmapped.len(), "Falling back to untracked paths");
                    paths.extend(
                        self.ctx
                            .store
                            .untracked_paths(tree.id)
                            .context("Failed to list untracked paths")?,
                    );
                    fallback_used = true;
                }
            }
        }

        Ok(ChangeSet {
            paths,
            latest,
            fallback_used,
        })
    }

    /// Run change detection for a tree, from `base` or else its stored cursor
    ///
    /// A check requested while one is running for the same tree is folded
    /// into a single follow-up run, which keeps the newest explicit base.
    pub async fn check(self: &Arc<Self>, tree: TreeId, base: Option<CommitCursor>) {
        {
            let mut running = self.running.lock();
            if let Some(rerun) = running.get_mut(&tree) {
                rerun.requested = true;
                if base.is_some() {
                    rerun.base = base;
                }
                return;
            }
            running.insert(tree, Rerun::default());
        }

        let mut base = base;
        loop {
            let this = self.clone();
            let from = base.take();
            match tokio::task::spawn_blocking(move || this.run_once(tree, from)).await {
                Ok(Ok(report)) if report.submitted > 0 || report.cursor_advanced => {
                    info!(
                        %tree,
                        submitted = report.submitted,
                        fallback = report.fallback_used,
                        "Change check"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(%tree, "change check failed: {:#}", e),
                Err(e) => error!(%tree, "change check task failed: {}", e),
            }

            let mut running = self.running.lock();
            match running.get_mut(&tree) {
                Some(rerun) if rerun.requested => {
                    base = std::mem::take(rerun).base;
                }
                _ => {
                    running.remove(&tree);
                    break;
                }
            }
        }
    }

    pub fn is_checking(&self, tree: TreeId) -> bool {
        self.running.lock().contains_key(&tree)
    }

    /// One detection run; blocks on VCS and store calls
    pub fn run_once(&self, tree: TreeId, base: Option<CommitCursor>) -> Result<CheckReport> {
        let ctx = &self.ctx;
        let Some(watched) = ctx.registry.get(tree) else {
            return Ok(CheckReport::default());
        };

        let explicit_base = base.is_some();
        let cursor = match base {
            Some(cursor) => cursor,
            None => match ctx.store.cursor(tree).context("Failed to read cursor")? {
                Some(cursor) => cursor,
                None => {
                    debug!(%tree, "no cursor yet; waiting for scan");
                    return Ok(CheckReport::default());
                }
            },
        };

        let changes = self.changed_paths(&watched, &cursor)?;

        let mut report = CheckReport {
            fallback_used: changes.fallback_used,
            ..CheckReport::default()
        };
        for path in changes.paths {
            // A cached parent means someone is looking at this directory
            let priority = match path.parent() {
                Some(parent) if ctx.cache.contains(tree, &parent) => Priority::High,
                Some(_) => Priority::Low,
                None => Priority::High,
            };
            if self.scheduler.submit(tree, path, priority, Duration::ZERO) {
                report.submitted += 1;
            }
        }

        if (explicit_base || changes.latest != cursor) && ctx.registry.contains(tree) {
            ctx.store
                .put_cursor(tree, &changes.latest)
                .context("Failed to store cursor")?;
            report.cursor_advanced = true;
        }
        Ok(report)
    }
}
