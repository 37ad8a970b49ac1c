//! Bottom-up directory aggregation
//!
//! One pass resolves every dirty directory (flagged `needs_refresh`, or an
//! ancestor of a stored path with no entry of its own) deepest first. A
//! resolved directory always flags its parent, so changes climb one level
//! per pass at least and the root settles within the tree's depth.
//!
//! A directory is only written if it was not invalidated again while its
//! children were read; otherwise it stays flagged for the next pass.

use crate::context::EngineContext;
use crate::scheduler::{Priority, Scheduler};
use annexstat_core::path::sort_deepest_first;
use annexstat_core::{now_ms, PathStatus, Presence, RepoPath, Replicas, TreeId};
use annexstat_store::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Directory status implied by its children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    /// Some tracked child is not resolved yet
    Incomplete,
    /// No tracked content below
    Empty,
    Resolved { presence: Presence, replicas: Replicas },
}

/// Fold child statuses into their directory's status
///
/// Untracked children and empty directories are skipped. Presence is
/// Present or Absent only when every input agrees; the replica count is the
/// minimum and sufficiency holds only if it holds for every input.
pub fn aggregate<'a>(children: impl IntoIterator<Item = &'a PathStatus>) -> Aggregate {
    let mut acc: Option<(Presence, Replicas)> = None;

    for child in children {
        if !child.is_tracked {
            continue;
        }
        if child.is_dir && child.is_empty_dir() {
            continue;
        }
        if child.is_dir && child.needs_refresh {
            return Aggregate::Incomplete;
        }
        let (Some(presence), Some(replicas)) = (child.presence, child.replicas) else {
            return Aggregate::Incomplete;
        };

        acc = Some(match acc {
            None => (presence, replicas),
            Some((p, r)) => (p.combine(presence), r.combine(replicas)),
        });
    }

    match acc {
        None => Aggregate::Empty,
        Some((presence, replicas)) => Aggregate::Resolved { presence, replicas },
    }
}

/// Counts from one aggregation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregationReport {
    /// Directories written
    pub processed: usize,
    /// Directories whose status changed
    pub updated: usize,
    /// Directories left for a later pass
    pub incomplete: usize,
    /// Pass stopped early
    pub halted: bool,
}

pub struct FolderAggregator {
    ctx: Arc<EngineContext>,
    scheduler: Arc<Scheduler>,
}

impl FolderAggregator {
    pub fn new(ctx: Arc<EngineContext>, scheduler: Arc<Scheduler>) -> Self {
        Self { ctx, scheduler }
    }

    /// One pass over the tree; blocks on VCS and store calls
    pub fn reconcile(&self, tree: TreeId) -> Result<AggregationReport> {
        self.reconcile_with_stop(tree, &|| false)
    }

    /// One pass that also ends as soon as `stop` returns true
    pub fn reconcile_with_stop(
        &self,
        tree: TreeId,
        stop: &dyn Fn() -> bool,
    ) -> Result<AggregationReport> {
        let ctx = &self.ctx;
        let mut report = AggregationReport::default();
        let Some(watched) = ctx.registry.get(tree) else {
            report.halted = true;
            return Ok(report);
        };

        let mut dirty: BTreeSet<RepoPath> = ctx.store.dirs_needing_refresh(tree)?.into_iter().collect();
        dirty.extend(ctx.store.dirs_missing_entries(tree)?);
        let mut dirs: Vec<RepoPath> = dirty.into_iter().collect();
        sort_deepest_first(&mut dirs);

        for dir in dirs {
            if stop() || !ctx.registry.contains(tree) {
                debug!(%tree, "Aggregation pass halted");
                report.halted = true;
                break;
            }

            // Read before the children so a concurrent invalidation is seen
            let generation = ctx.store.dir_generation(tree, &dir)?;
            let children = match ctx.vcs.immediate_children(&watched, &dir) {
                Ok(children) => children,
                Err(e) => {
                    warn!(%tree, path = %dir, "failed to list children: {}", e);
                    report.incomplete += 1;
                    continue;
                }
            };

            let mut statuses = Vec::with_capacity(children.len());
            let mut missing = Vec::new();
            for child in children {
                match ctx.store.status(tree, &child)? {
                    Some(status) => statuses.push(status),
                    None => missing.push(child),
                }
            }

            // Files whose facts could not be read last time
            for status in statuses.iter().filter(|s| s.is_tracked && !s.is_dir && !s.is_resolved()) {
                debug!(%tree, path = %status.path, "Resubmitting unresolved file");
                self.scheduler
                    .submit(tree, status.path.clone(), Priority::Low, Duration::ZERO);
            }

            if !missing.is_empty() {
                debug!(%tree, path = %dir, missing = missing.len(), "Directory waiting on children");
                for child in missing {
                    let lane = match ctx.vcs.is_directory(&watched, &child) {
                        Ok(true) => Priority::Low,
                        Ok(false) => Priority::High,
                        Err(e) => {
                            warn!(%tree, path = %child, "failed to stat child: {}", e);
                            continue;
                        }
                    };
                    self.scheduler.submit(tree, child, lane, Duration::ZERO);
                }
                // Keep an entry so the parent waits instead of requesting it
                ctx.store.invalidate_dir(tree, &dir)?;
                report.incomplete += 1;
                continue;
            }

            let status = match aggregate(&statuses) {
                Aggregate::Incomplete => {
                    report.incomplete += 1;
                    continue;
                }
                Aggregate::Empty => PathStatus::resolved_dir(dir.clone(), Presence::Present, None, now_ms()),
                Aggregate::Resolved { presence, replicas } => {
                    PathStatus::resolved_dir(dir.clone(), presence, Some(replicas), now_ms())
                }
            };

            match ctx.write_dir_status(tree, status, generation)? {
                Some(changed) => {
                    if changed {
                        report.updated += 1;
                    }
                }
                None => {
                    debug!(%tree, path = %dir, "Directory changed during aggregation");
                    report.incomplete += 1;
                    continue;
                }
            }
            report.processed += 1;
            ctx.invalidate_parent(tree, &dir)?;
        }

        if report.processed > 0 || report.incomplete > 0 {
            debug!(
                %tree,
                processed = report.processed,
                updated = report.updated,
                incomplete = report.incomplete,
                "Aggregation pass"
            );
        }
        Ok(report)
    }
}
