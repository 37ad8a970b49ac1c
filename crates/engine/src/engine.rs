//! Engine runtime
//!
//! Owns every component and the background loops:
//! - tick: start scans for cursorless trees, run aggregation passes when
//!   the store changed
//! - change signals: run change detection
//! - scan outcomes: run the baseline check of a finished scan
//! - commands: execute queued annex commands

use crate::aggregator::FolderAggregator;
use crate::commands::CommandExecutor;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::detector::ChangeDetector;
use crate::events::{ScanOutcome, StatusChanged};
use crate::registry::{TreeDelta, TreeRegistry};
use crate::scanner::TreeScanner;
use crate::scheduler::{LaneLimits, Priority, Scheduler};
use ahash::AHashMap;
use annexstat_core::{AnnexCommand, CommandRequest, PathStatus, RepoPath, TreeId, WatchedTree};
use annexstat_store::StatusStore;
use annexstat_vcs::VcsQuery;
use annexstat_watcher::ChangeSignal;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SIGNAL_CAPACITY: usize = 256;

/// Snapshot of engine activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub trees: usize,
    pub scanning: usize,
    pub queued_high: usize,
    pub queued_low: usize,
    pub idle: bool,
}

pub struct Engine {
    ctx: Arc<EngineContext>,
    scheduler: Arc<Scheduler>,
    aggregator: Arc<FolderAggregator>,
    scanner: Arc<TreeScanner>,
    detector: Arc<ChangeDetector>,
    commands: Arc<CommandExecutor>,
    config: EngineConfig,
    shutdown: CancellationToken,
    signal_tx: mpsc::Sender<ChangeSignal>,
    signal_rx: Mutex<Option<mpsc::Receiver<ChangeSignal>>>,
    scan_rx: Mutex<Option<mpsc::UnboundedReceiver<ScanOutcome>>>,
    /// `last_modified` seen at each tree's latest aggregation pass
    aggregated_at: Mutex<AHashMap<TreeId, u64>>,
}

impl Engine {
    /// Build the engine over an opened store; fails only if the persisted
    /// watched set cannot be read
    pub fn new(
        store: Arc<dyn StatusStore>,
        vcs: Arc<dyn VcsQuery>,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let registry = TreeRegistry::load(store.clone()).context("Failed to load watched trees")?;
        let ctx = Arc::new(EngineContext::new(store, vcs, registry, config.cache_capacity));

        let scheduler = Arc::new(Scheduler::new(
            ctx.clone(),
            LaneLimits {
                high: config.high_concurrency_per_tree,
                low: config.low_concurrency_per_tree,
            },
        ));
        let aggregator = Arc::new(FolderAggregator::new(ctx.clone(), scheduler.clone()));
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let scanner = Arc::new(TreeScanner::new(ctx.clone(), aggregator.clone(), Some(scan_tx)));
        let detector = Arc::new(ChangeDetector::new(ctx.clone(), scheduler.clone()));
        let commands = Arc::new(CommandExecutor::new(
            ctx.clone(),
            scheduler.clone(),
            detector.clone(),
        ));
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);

        Ok(Arc::new(Self {
            ctx,
            scheduler,
            aggregator,
            scanner,
            detector,
            commands,
            config,
            shutdown: CancellationToken::new(),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
            scan_rx: Mutex::new(Some(scan_rx)),
            aggregated_at: Mutex::new(AHashMap::new()),
        }))
    }

    /// Spawn the scheduler lanes and background loops; a second call is a no-op
    pub fn start(self: &Arc<Self>) {
        let (Some(signal_rx), Some(scan_rx)) = (self.signal_rx.lock().take(), self.scan_rx.lock().take())
        else {
            warn!("Engine already started");
            return;
        };

        info!(trees = self.ctx.registry.len(), "Starting engine");
        self.scheduler.start(self.shutdown.clone());
        tokio::spawn(self.clone().tick_loop());
        tokio::spawn(self.clone().signal_loop(signal_rx));
        tokio::spawn(self.clone().scan_outcome_loop(scan_rx));
        tokio::spawn(self.commands.clone().run(self.shutdown.clone()));
    }

    pub fn shutdown(&self) {
        info!("Engine shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Sender for change signals (filesystem watcher, fallback timer)
    pub fn signal_sender(&self) -> mpsc::Sender<ChangeSignal> {
        self.signal_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.ctx.subscribe()
    }

    pub fn trees(&self) -> HashSet<WatchedTree> {
        self.ctx.registry.current_trees()
    }

    pub fn tree(&self, id: TreeId) -> Option<WatchedTree> {
        self.ctx.registry.get(id)
    }

    /// Tree whose root contains `absolute`, preferring the deepest root
    pub fn tree_for_path(&self, absolute: &std::path::Path) -> Option<WatchedTree> {
        self.ctx
            .registry
            .current_trees()
            .into_iter()
            .filter(|tree| tree.contains_path(absolute))
            .max_by_key(|tree| tree.root.components().count())
    }

    /// Replace the watched set and retire the work of removed trees
    pub fn set_trees(&self, trees: HashSet<WatchedTree>) -> Result<TreeDelta> {
        let delta = self
            .ctx
            .registry
            .reconcile(trees)
            .context("Failed to persist watched trees")?;

        for tree in &delta.removed {
            self.scanner.stop(tree.id);
            self.scheduler.retire_tree(tree.id);
            self.ctx.cache.forget_tree(tree.id);
            self.aggregated_at.lock().remove(&tree.id);
            if let Err(e) = self.ctx.store.remove_tree(tree.id) {
                error!(tree = %tree.id, "failed to drop stored statuses: {}", e);
            }
            info!(tree = %tree, "Tree removed");
        }
        for tree in &delta.added {
            info!(tree = %tree, "Tree added");
        }
        for tree in &delta.relocated {
            info!(tree = %tree, "Tree relocated");
        }
        Ok(delta)
    }

    /// Cached status right away; a miss requests a refresh at high priority
    pub fn request_status(&self, tree: TreeId, path: &RepoPath) -> Option<PathStatus> {
        if !self.ctx.registry.contains(tree) {
            return None;
        }
        match self.ctx.cache.get_or_load(self.ctx.store.as_ref(), tree, path) {
            Ok(Some(status)) => return Some(status),
            Ok(None) => {}
            Err(e) => error!(%tree, %path, "store read failed: {}", e),
        }
        self.scheduler.submit(
            tree,
            path.clone(),
            Priority::High,
            self.config.default_max_age(),
        );
        None
    }

    /// Queue an annex command for a path
    pub fn submit_command(
        &self,
        tree: TreeId,
        path: RepoPath,
        command: AnnexCommand,
    ) -> Result<CommandRequest> {
        if !self.ctx.registry.contains(tree) {
            anyhow::bail!("Tree {} is not watched", tree);
        }
        let request = CommandRequest::new(tree, path, command);
        self.commands
            .submit(&request)
            .context("Failed to queue command")?;
        Ok(request)
    }

    pub fn stats(&self) -> EngineStats {
        let ids = self.ctx.registry.ids();
        EngineStats {
            trees: ids.len(),
            scanning: ids.iter().filter(|id| self.scanner.is_scanning(**id)).count(),
            queued_high: self.scheduler.queued(Priority::High),
            queued_low: self.scheduler.queued(Priority::Low),
            idle: self.scheduler.is_idle(),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn scanner(&self) -> &Arc<TreeScanner> {
        &self.scanner
    }

    pub fn detector(&self) -> &Arc<ChangeDetector> {
        &self.detector
    }

    /// One round of scan starts and aggregation passes
    pub async fn tick(&self) {
        for tree in self.ctx.registry.ids() {
            if self.shutdown.is_cancelled() {
                return;
            }
            if self.scanner.busy(tree) {
                continue;
            }

            let cursor = match self.ctx.store.cursor(tree) {
                Ok(cursor) => cursor,
                Err(e) => {
                    error!(%tree, "failed to read cursor: {}", e);
                    continue;
                }
            };
            if cursor.is_none() {
                self.scanner.scan(tree);
                continue;
            }

            let modified = match self.ctx.store.last_modified() {
                Ok(modified) => modified,
                Err(e) => {
                    error!("failed to read last-modified marker: {}", e);
                    return;
                }
            };
            {
                let mut seen = self.aggregated_at.lock();
                if seen.get(&tree) == Some(&modified) {
                    continue;
                }
                seen.insert(tree, modified);
            }

            let aggregator = self.aggregator.clone();
            match tokio::task::spawn_blocking(move || aggregator.reconcile(tree)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(%tree, "aggregation failed: {}", e);
                    // Retry on the next tick
                    self.aggregated_at.lock().remove(&tree);
                }
                Err(e) => error!(%tree, "aggregation task failed: {}", e),
            }
        }
    }

    async fn tick_loop(self: Arc<Self>) {
        let mut timer = interval(self.config.tick());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => self.tick().await,
            }
        }
        debug!("Tick loop stopped");
    }

    async fn signal_loop(self: Arc<Self>, mut signals: mpsc::Receiver<ChangeSignal>) {
        loop {
            let signal = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                signal = signals.recv() => match signal {
                    Some(signal) => signal,
                    None => break,
                },
            };

            let tree = signal.tree;
            if !self.ctx.registry.contains(tree) || self.scanner.busy(tree) {
                continue;
            }
            // Cursorless trees are bootstrapped by a scan instead
            match self.ctx.store.cursor(tree) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    error!(%tree, "failed to read cursor: {}", e);
                    continue;
                }
            }

            let detector = self.detector.clone();
            tokio::spawn(async move { detector.check(tree, None).await });
        }
        debug!("Signal loop stopped");
    }

    async fn scan_outcome_loop(self: Arc<Self>, mut outcomes: mpsc::UnboundedReceiver<ScanOutcome>) {
        loop {
            let outcome = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                outcome = outcomes.recv() => match outcome {
                    Some(outcome) => outcome,
                    None => break,
                },
            };

            let tree = outcome.tree;
            match outcome.baseline {
                Some(baseline) if outcome.completed => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.detector.check(tree, Some(baseline)).await;
                        this.scanner.acknowledge(tree);
                    });
                }
                _ => self.scanner.acknowledge(tree),
            }
        }
        debug!("Scan outcome loop stopped");
    }
}
