//! Two-lane refresh scheduler
//!
//! Requests are de-duplicated per `(tree, path)` across both lanes and
//! dispatched oldest-first, bounded by a counting semaphore per tree per
//! lane. At most one refresh per `(tree, path)` runs at any time.
//!
//! Directories are never refreshed directly: a directory request writes a
//! pending entry and fans out to the children, and the directory resolves
//! later through aggregation.

use crate::context::EngineContext;
use ahash::{AHashMap, AHashSet};
use annexstat_core::{now_ms, PathStatus, RepoPath, TreeId, WatchedTree};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Key = (TreeId, RepoPath);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Low,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub tree: TreeId,
    pub path: RepoPath,
    pub priority: Priority,
    /// A stored status younger than this satisfies the request
    pub max_age: Duration,
    pub submitted_at: Instant,
}

impl RefreshRequest {
    fn key(&self) -> Key {
        (self.tree, self.path.clone())
    }
}

/// Per-tree worker limits for each lane
#[derive(Debug, Clone, Copy)]
pub struct LaneLimits {
    pub high: usize,
    pub low: usize,
}

impl Default for LaneLimits {
    fn default() -> Self {
        Self { high: 20, low: 5 }
    }
}

/// What a dispatched request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    AlreadyFresh,
    DirectoryEntry,
    Downgraded,
    Expanded(usize),
    Updated { changed: bool },
    Failed,
    Retired,
}

#[derive(Default)]
struct LaneQueues {
    high: VecDeque<RefreshRequest>,
    low: VecDeque<RefreshRequest>,
    /// Lane each queued key currently sits in
    index: AHashMap<Key, Priority>,
}

impl LaneQueues {
    fn lane_mut(&mut self, priority: Priority) -> &mut VecDeque<RefreshRequest> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Paths being refreshed, plus requests waiting for them to finish
#[derive(Default)]
struct ActiveSet {
    refreshing: AHashSet<Key>,
    deferred: AHashMap<Key, RefreshRequest>,
}

pub struct Scheduler {
    ctx: Arc<EngineContext>,
    limits: LaneLimits,
    queues: Mutex<LaneQueues>,
    active: Mutex<ActiveSet>,
    permits: DashMap<(TreeId, Priority), Arc<Semaphore>>,
    in_flight: AtomicUsize,
    high_ready: Notify,
    low_ready: Notify,
    idle: Notify,
}

impl Scheduler {
    pub fn new(ctx: Arc<EngineContext>, limits: LaneLimits) -> Self {
        Self {
            ctx,
            limits,
            queues: Mutex::new(LaneQueues::default()),
            active: Mutex::new(ActiveSet::default()),
            permits: DashMap::new(),
            in_flight: AtomicUsize::new(0),
            high_ready: Notify::new(),
            low_ready: Notify::new(),
            idle: Notify::new(),
        }
    }

    /// Spawn both lane loops
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) {
        tokio::spawn(self.clone().run_lane(Priority::High, shutdown.clone()));
        tokio::spawn(self.clone().run_lane(Priority::Low, shutdown));
    }

    /// Ask for `path` to be refreshed unless a status younger than `max_age`
    /// is stored
    ///
    /// Returns whether the request was queued. Duplicates merge into the
    /// queued request (a Low one is promoted by a High one); while the path
    /// is refreshing, Low requests are dropped and High ones wait for the
    /// refresh to finish.
    pub fn submit(&self, tree: TreeId, path: RepoPath, priority: Priority, max_age: Duration) -> bool {
        if !self.ctx.registry.contains(tree) {
            debug!(%tree, %path, "discarding request for unregistered tree");
            return false;
        }

        let request = RefreshRequest {
            tree,
            path,
            priority,
            max_age,
            submitted_at: Instant::now(),
        };

        {
            let mut active = self.active.lock();
            let key = request.key();
            if active.refreshing.contains(&key) {
                if priority == Priority::High {
                    merge_deferred(&mut active.deferred, request);
                }
                return false;
            }
        }

        self.enqueue(request)
    }

    fn enqueue(&self, request: RefreshRequest) -> bool {
        let key = request.key();
        let priority = request.priority;
        {
            let mut queues = self.queues.lock();
            match queues.index.get(&key).copied() {
                Some(queued) if queued == priority || queued == Priority::High => {
                    // Keep the stricter freshness requirement
                    if let Some(existing) = queues
                        .lane_mut(queued)
                        .iter_mut()
                        .find(|r| r.tree == request.tree && r.path == request.path)
                    {
                        existing.max_age = existing.max_age.min(request.max_age);
                    }
                    return false;
                }
                Some(_) => {
                    // Promote Low -> High
                    let mut max_age = request.max_age;
                    queues.low.retain(|r| {
                        let same = r.tree == request.tree && r.path == request.path;
                        if same {
                            max_age = max_age.min(r.max_age);
                        }
                        !same
                    });
                    queues.high.push_back(RefreshRequest { max_age, ..request });
                    queues.index.insert(key, Priority::High);
                }
                None => {
                    queues.lane_mut(priority).push_back(request);
                    queues.index.insert(key, priority);
                }
            }
        }
        self.lane_notify(priority).notify_one();
        true
    }

    /// Drop queued and deferred work for a tree; in-flight work re-checks
    /// registry membership before writing
    pub fn retire_tree(&self, tree: TreeId) {
        let dropped = {
            let mut queues = self.queues.lock();
            let before = queues.index.len();
            queues.high.retain(|r| r.tree != tree);
            queues.low.retain(|r| r.tree != tree);
            queues.index.retain(|(id, _), _| *id != tree);
            before - queues.index.len()
        };
        self.active.lock().deferred.retain(|(id, _), _| *id != tree);
        self.permits.retain(|(id, _), _| *id != tree);

        if dropped > 0 {
            info!(%tree, dropped, "Retired queued refreshes");
        }
        self.idle.notify_waiters();
    }

    /// No queued, deferred or running work
    pub fn is_idle(&self) -> bool {
        self.queues.lock().is_empty()
            && self.active.lock().deferred.is_empty()
            && self.in_flight.load(Ordering::SeqCst) == 0
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Number of requests queued in a lane
    pub fn queued(&self, lane: Priority) -> usize {
        let queues = self.queues.lock();
        match lane {
            Priority::High => queues.high.len(),
            Priority::Low => queues.low.len(),
        }
    }

    pub fn is_refreshing(&self, tree: TreeId, path: &RepoPath) -> bool {
        self.active.lock().refreshing.contains(&(tree, path.clone()))
    }

    fn lane_notify(&self, lane: Priority) -> &Notify {
        match lane {
            Priority::High => &self.high_ready,
            Priority::Low => &self.low_ready,
        }
    }

    fn semaphore(&self, tree: TreeId, lane: Priority) -> Arc<Semaphore> {
        let limit = match lane {
            Priority::High => self.limits.high,
            Priority::Low => self.limits.low,
        };
        self.permits
            .entry((tree, lane))
            .or_insert_with(|| Arc::new(Semaphore::new(limit.max(1))))
            .clone()
    }

    /// Oldest queued request whose tree has a free worker slot
    fn next_dispatchable(&self, lane: Priority) -> Option<(RefreshRequest, OwnedSemaphorePermit)> {
        let mut queues = self.queues.lock();
        let mut found = None;
        for (pos, request) in queues.lane_mut(lane).iter().enumerate() {
            if let Ok(permit) = self.semaphore(request.tree, lane).try_acquire_owned() {
                found = Some((pos, permit));
                break;
            }
        }

        let (pos, permit) = found?;
        let request = queues.lane_mut(lane).remove(pos)?;
        queues.index.remove(&request.key());
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some((request, permit))
    }

    async fn run_lane(self: Arc<Self>, lane: Priority, shutdown: CancellationToken) {
        debug!(?lane, "Scheduler lane started");
        loop {
            while let Some((request, permit)) = self.next_dispatchable(lane) {
                let this = self.clone();
                tokio::spawn(async move { this.process(request, permit).await });
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.lane_notify(lane).notified() => {}
            }
        }
        debug!(?lane, "Scheduler lane stopped");
    }

    async fn process(self: Arc<Self>, request: RefreshRequest, permit: OwnedSemaphorePermit) {
        let key = request.key();
        let lane = request.priority;

        let claimed = {
            let mut active = self.active.lock();
            if active.refreshing.insert(key.clone()) {
                true
            } else {
                if request.priority == Priority::High {
                    merge_deferred(&mut active.deferred, request.clone());
                }
                false
            }
        };

        if claimed {
            let this = self.clone();
            let req = request.clone();
            let outcome = match tokio::task::spawn_blocking(move || this.refresh(&req)).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(tree = %request.tree, path = %request.path, "refresh task failed: {}", e);
                    Outcome::Failed
                }
            };
            debug!(tree = %request.tree, path = %request.path, ?outcome, "Refresh finished");

            let deferred = {
                let mut active = self.active.lock();
                active.refreshing.remove(&key);
                active.deferred.remove(&key)
            };
            if let Some(deferred) = deferred {
                self.submit(deferred.tree, deferred.path, deferred.priority, deferred.max_age);
            }
        }

        drop(permit);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.lane_notify(lane).notify_one();
        self.idle.notify_waiters();
    }

    fn refresh(&self, request: &RefreshRequest) -> Outcome {
        let ctx = &self.ctx;
        let Some(tree) = ctx.registry.get(request.tree) else {
            return Outcome::Retired;
        };
        let path = &request.path;

        let stored = match ctx.store.status(tree.id, path) {
            Ok(stored) => stored,
            Err(e) => {
                error!(tree = %tree.id, %path, "store read failed: {}", e);
                return Outcome::Failed;
            }
        };
        if let Some(status) = &stored {
            if status.is_fresh(now_ms(), request.max_age.as_millis() as u64) {
                return Outcome::AlreadyFresh;
            }
            if status.is_dir {
                return Outcome::DirectoryEntry;
            }
        }

        let is_dir = match ctx.vcs.is_directory(&tree, path) {
            Ok(is_dir) => is_dir,
            Err(e) => {
                warn!(tree = %tree.id, %path, "failed to stat path: {}", e);
                return Outcome::Failed;
            }
        };

        if is_dir {
            if request.priority == Priority::High {
                // Directories only ever run in the low lane; resubmitted once
                // this refresh releases the path
                let low = RefreshRequest {
                    priority: Priority::Low,
                    ..request.clone()
                };
                self.active.lock().deferred.insert(low.key(), low);
                return Outcome::Downgraded;
            }
            return self.expand_directory(&tree, request);
        }

        let facts = match ctx.vcs.status_of(&tree, path) {
            Ok(facts) => facts,
            Err(e) => {
                warn!(tree = %tree.id, %path, "status query failed: {}", e);
                return Outcome::Failed;
            }
        };

        let status = PathStatus::from_facts(path.clone(), facts, now_ms());
        match ctx.write_status(tree.id, status) {
            Ok(true) => {
                if let Err(e) = ctx.invalidate_parent(tree.id, path) {
                    error!(tree = %tree.id, %path, "failed to invalidate parent: {}", e);
                }
                Outcome::Updated { changed: true }
            }
            Ok(false) => Outcome::Updated { changed: false },
            Err(e) => {
                error!(tree = %tree.id, %path, "store write failed: {}", e);
                Outcome::Failed
            }
        }
    }

    fn expand_directory(
        &self,
        tree: &WatchedTree,
        request: &RefreshRequest,
    ) -> Outcome {
        let ctx = &self.ctx;
        let path = &request.path;

        if let Err(e) = ctx.write_status(tree.id, PathStatus::pending_dir(path.clone(), now_ms())) {
            error!(tree = %tree.id, %path, "store write failed: {}", e);
            return Outcome::Failed;
        }

        let children = match ctx.vcs.immediate_children(tree, path) {
            Ok(children) => children,
            Err(e) => {
                warn!(tree = %tree.id, %path, "failed to list children: {}", e);
                return Outcome::Failed;
            }
        };

        let count = children.len();
        for child in children {
            let lane = match ctx.vcs.is_directory(tree, &child) {
                Ok(true) => Priority::Low,
                Ok(false) => Priority::High,
                Err(e) => {
                    warn!(tree = %tree.id, path = %child, "failed to stat child: {}", e);
                    continue;
                }
            };
            self.submit(tree.id, child, lane, request.max_age);
        }
        Outcome::Expanded(count)
    }
}

fn merge_deferred(deferred: &mut AHashMap<Key, RefreshRequest>, request: RefreshRequest) {
    match deferred.get_mut(&request.key()) {
        Some(existing) => {
            existing.max_age = existing.max_age.min(request.max_age);
            if request.priority == Priority::High {
                existing.priority = Priority::High;
            }
        }
        None => {
            deferred.insert(request.key(), request);
        }
    }
}
