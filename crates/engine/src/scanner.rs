//! Full-tree bootstrap
//!
//! Runs once for a tree with no commit cursor: walks every file, stores
//! its status, then aggregates the directories. The scan records the latest
//! commits *before* walking; the engine's first incremental check starts
//! from that baseline and is what writes the cursor.

use crate::aggregator::FolderAggregator;
use crate::context::EngineContext;
use crate::events::ScanOutcome;
use ahash::AHashMap;
use annexstat_core::{now_ms, CommitCursor, PathStatus, RepoPath, TreeId, WatchedTree};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Running under this generation; a stop or restart changes it
    Scanning(u64),
    /// Finished, waiting for the engine to run the baseline check
    Completed,
}

pub struct TreeScanner {
    ctx: Arc<EngineContext>,
    aggregator: Arc<FolderAggregator>,
    scans: Mutex<AHashMap<TreeId, ScanState>>,
    generation: AtomicU64,
    outcomes: Option<mpsc::UnboundedSender<ScanOutcome>>,
}

impl TreeScanner {
    pub fn new(
        ctx: Arc<EngineContext>,
        aggregator: Arc<FolderAggregator>,
        outcomes: Option<mpsc::UnboundedSender<ScanOutcome>>,
    ) -> Self {
        Self {
            ctx,
            aggregator,
            scans: Mutex::new(AHashMap::new()),
            generation: AtomicU64::new(0),
            outcomes,
        }
    }

    /// Start scanning `tree` on the blocking pool
    ///
    /// Returns `None` when the tree is unregistered, already scanning or
    /// waiting for its baseline check.
    pub fn scan(self: &Arc<Self>, tree: TreeId) -> Option<JoinHandle<ScanOutcome>> {
        if !self.ctx.registry.contains(tree) {
            return None;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut scans = self.scans.lock();
            if scans.contains_key(&tree) {
                debug!(%tree, "scan already running");
                return None;
            }
            scans.insert(tree, ScanState::Scanning(generation));
        }

        let this = self.clone();
        Some(tokio::task::spawn_blocking(move || {
            let outcome = this.run(tree, generation);
            this.finish(&outcome, generation);
            outcome
        }))
    }

    /// Stop a running scan; it halts before its next directory or write
    pub fn stop(&self, tree: TreeId) {
        if self.scans.lock().remove(&tree).is_some() {
            info!(%tree, "Scan stopped");
        }
    }

    pub fn is_scanning(&self, tree: TreeId) -> bool {
        matches!(self.scans.lock().get(&tree), Some(ScanState::Scanning(_)))
    }

    /// Scanning, or finished but not yet acknowledged
    pub fn busy(&self, tree: TreeId) -> bool {
        self.scans.lock().contains_key(&tree)
    }

    /// The engine is done with the outcome of a finished scan
    pub fn acknowledge(&self, tree: TreeId) {
        let mut scans = self.scans.lock();
        if scans.get(&tree) == Some(&ScanState::Completed) {
            scans.remove(&tree);
        }
    }

    fn is_current(&self, tree: TreeId, generation: u64) -> bool {
        self.scans.lock().get(&tree) == Some(&ScanState::Scanning(generation))
    }

    fn finish(&self, outcome: &ScanOutcome, generation: u64) {
        {
            let mut scans = self.scans.lock();
            if scans.get(&outcome.tree) == Some(&ScanState::Scanning(generation)) {
                if outcome.completed {
                    scans.insert(outcome.tree, ScanState::Completed);
                } else {
                    scans.remove(&outcome.tree);
                }
            }
        }
        if let Some(tx) = &self.outcomes {
            let _ = tx.send(outcome.clone());
        }
    }

    fn run(&self, tree: TreeId, generation: u64) -> ScanOutcome {
        let ctx = &self.ctx;
        let stopped = || !self.is_current(tree, generation) || !ctx.registry.contains(tree);
        let mut outcome = ScanOutcome {
            tree,
            completed: false,
            baseline: None,
            files: 0,
        };

        let Some(watched) = ctx.registry.get(tree) else {
            return outcome;
        };
        let baseline = match self.baseline(&watched) {
            Some(baseline) => baseline,
            None => return outcome,
        };

        info!(tree = %watched, "Scanning tree");
        let mut max_depth = 0;
        let mut stack = vec![RepoPath::root()];

        while let Some(dir) = stack.pop() {
            if stopped() {
                info!(%tree, files = outcome.files, "Scan halted");
                return outcome;
            }
            max_depth = max_depth.max(dir.depth());

            let children = match ctx.vcs.immediate_children(&watched, &dir) {
                Ok(children) => children,
                Err(e) => {
                    warn!(%tree, path = %dir, "failed to list children: {}", e);
                    continue;
                }
            };

            for child in children {
                match ctx.vcs.is_directory(&watched, &child) {
                    Ok(true) => {
                        stack.push(child);
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(%tree, path = %child, "failed to stat path: {}", e);
                        continue;
                    }
                }

                let facts = match ctx.vcs.status_of(&watched, &child) {
                    Ok(facts) => facts,
                    Err(e) => {
                        warn!(%tree, path = %child, "status query failed: {}", e);
                        continue;
                    }
                };

                if stopped() {
                    info!(%tree, files = outcome.files, "Scan halted");
                    return outcome;
                }

                let status = PathStatus::from_facts(child.clone(), facts, now_ms());
                match ctx.write_status(tree, status) {
                    Ok(changed) => {
                        outcome.files += 1;
                        if changed {
                            if let Err(e) = ctx.invalidate_parent(tree, &child) {
                                error!(%tree, path = %child, "failed to invalidate parent: {}", e);
                            }
                        }
                    }
                    Err(e) => error!(%tree, path = %child, "store write failed: {}", e),
                }
            }
        }

        // Each pass settles at least one more level
        for _ in 0..=max_depth {
            if stopped() {
                return outcome;
            }
            match self.aggregator.reconcile_with_stop(tree, &stopped) {
                Ok(report) if report.halted => return outcome,
                Ok(report) if report.processed == 0 => break,
                Ok(_) => {}
                Err(e) => {
                    error!(%tree, "aggregation failed: {}", e);
                    break;
                }
            }
        }

        info!(%tree, files = outcome.files, "Scan complete");
        outcome.completed = true;
        outcome.baseline = Some(baseline);
        outcome
    }

    fn baseline(&self, tree: &WatchedTree) -> Option<CommitCursor> {
        let primary = self.ctx.vcs.latest_primary_commit(tree);
        let metadata = self.ctx.vcs.latest_metadata_commit(tree);
        match (primary, metadata) {
            (Ok(primary), Ok(metadata)) => Some(CommitCursor { primary, metadata }),
            (Err(e), _) | (_, Err(e)) => {
                warn!(tree = %tree.id, "cannot read scan baseline: {}", e);
                None
            }
        }
    }
}
