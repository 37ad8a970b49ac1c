//! Filesystem watches over tree roots
//!
//! One recursive `notify` watch per tree. The notify callback filters raw
//! events through the tree's ignore rules and forwards the tree id; the
//! `SignalPump` debounces those into `ChangeSignal`s.

use crate::debounce::Debouncer;
use crate::ignore::{IgnoreConfig, IgnoreRules};
use crate::ChangeSignal;
use ahash::AHashMap;
use annexstat_core::{TreeId, WatchedTree};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Set of live watches, one per tree
pub struct TreeWatcher {
    watches: Mutex<AHashMap<TreeId, RecommendedWatcher>>,
    ignore: IgnoreConfig,
    raw_tx: mpsc::UnboundedSender<TreeId>,
}

/// Debounces raw per-tree events into change signals
pub struct SignalPump {
    raw_rx: mpsc::UnboundedReceiver<TreeId>,
    debouncer: Debouncer,
    signal_tx: mpsc::Sender<ChangeSignal>,
}

impl TreeWatcher {
    pub fn new(
        debounce: Duration,
        ignore: IgnoreConfig,
        signal_tx: mpsc::Sender<ChangeSignal>,
    ) -> (Self, SignalPump) {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            watches: Mutex::new(AHashMap::new()),
            ignore,
            raw_tx,
        };
        let pump = SignalPump {
            raw_rx,
            debouncer: Debouncer::new(debounce),
            signal_tx,
        };
        (watcher, pump)
    }

    /// Start watching a tree (replacing any previous watch for its id)
    pub fn watch(&self, tree: &WatchedTree) -> Result<()> {
        let rules = IgnoreRules::load(&tree.root, self.ignore.clone())
            .with_context(|| format!("Failed to load ignore rules for {}", tree))?;
        let rules = Mutex::new(rules);
        let id = tree.id;
        let root = tree.root.clone();
        let tx = self.raw_tx.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    // Overflow and similar: signal anyway, the detector is cheap
                    warn!(tree = %id, "watch error: {}", e);
                    let _ = tx.send(id);
                    return;
                }
            };
            if matches!(event.kind, EventKind::Access(_)) {
                return;
            }

            let mut rules = rules.lock();
            if event.paths.iter().any(|path| path.ends_with(".gitignore")) {
                if let Err(e) = rules.reload_ignore_files() {
                    warn!(tree = %id, "keeping previous ignore rules: {:#}", e);
                }
            }
            let relevant = event.paths.iter().any(|path| match path.strip_prefix(&root) {
                Ok(rel) => !rules.should_ignore(rel),
                Err(_) => false,
            });
            if relevant {
                let _ = tx.send(id);
            }
        })
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(&tree.root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", tree.root.display()))?;

        info!(tree = %tree.id, root = %tree.root.display(), "Watching tree");
        self.watches.lock().insert(tree.id, watcher);
        Ok(())
    }

    /// Stop watching a tree; dropping the notify watcher ends its watch
    pub fn unwatch(&self, tree: TreeId) {
        if self.watches.lock().remove(&tree).is_some() {
            info!(%tree, "Stopped watching tree");
        }
    }

    pub fn is_watching(&self, tree: TreeId) -> bool {
        self.watches.lock().contains_key(&tree)
    }

    pub fn watched(&self) -> Vec<TreeId> {
        self.watches.lock().keys().copied().collect()
    }
}

impl SignalPump {
    /// Run until every raw sender (the `TreeWatcher` and its watches) is gone
    /// or the signal receiver is dropped
    pub async fn run(mut self) {
        loop {
            let next = self.debouncer.next_deadline();
            tokio::select! {
                raw = self.raw_rx.recv() => match raw {
                    Some(tree) => self.debouncer.record(tree, Instant::now()),
                    None => break,
                },
                _ = sleep_until_deadline(next) => {}
            }

            for tree in self.debouncer.take_due(Instant::now()) {
                debug!(%tree, "Change signal");
                if self.signal_tx.send(ChangeSignal { tree }).await.is_err() {
                    return;
                }
            }
        }

        // Flush what is still pending
        for tree in self.debouncer.take_due(Instant::now() + Duration::from_secs(3600)) {
            let _ = self.signal_tx.send(ChangeSignal { tree }).await;
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending::<()>().await,
    }
}
