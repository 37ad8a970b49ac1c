//! Scripted in-memory VCS and engine harness

#![allow(dead_code)]

use annexstat_core::{
    AnnexCommand, CommitCursor, CommitHash, ContentKey, PathFacts, PathStatus, Presence,
    RepoPath, Replicas, Sufficiency, TreeId, WatchedTree,
};
use annexstat_engine::{
    ChangeDetector, EngineContext, FolderAggregator, LaneLimits, Scheduler, TreeRegistry,
    TreeScanner,
};
use annexstat_core::CommandRequest;
use annexstat_store::{KeyLookup, Result as StoreResult, SledStore, StatusStore};
use annexstat_vcs::{Result as VcsResult, VcsError, VcsQuery};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn p(path: &str) -> RepoPath {
    RepoPath::new(path).unwrap()
}

#[derive(Debug, Clone)]
pub struct FakeFile {
    pub tracked: bool,
    pub presence: Presence,
    pub copies: u32,
    pub sufficiency: Sufficiency,
}

impl FakeFile {
    pub fn key(path: &RepoPath) -> ContentKey {
        ContentKey::new(format!("SHA256E-s1--{}", path.as_str().replace('/', "_")))
    }
}

#[derive(Default)]
struct FakeState {
    files: BTreeMap<RepoPath, FakeFile>,
    empty_dirs: BTreeSet<RepoPath>,
    primary: Vec<(CommitHash, Vec<RepoPath>)>,
    metadata: Vec<(CommitHash, Vec<ContentKey>)>,
    failing: HashSet<RepoPath>,
    commands: Vec<(RepoPath, AnnexCommand)>,
}

/// One in-memory working tree
pub struct FakeVcs {
    pub root: PathBuf,
    pub id: TreeId,
    state: Mutex<FakeState>,
    delay: Mutex<Duration>,
    in_progress: Mutex<HashMap<RepoPath, usize>>,
    max_same_path: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub diff_calls: AtomicUsize,
}

impl FakeVcs {
    pub fn new() -> Self {
        let mut state = FakeState::default();
        state.metadata.push((CommitHash::new("meta-0"), Vec::new()));
        Self {
            root: PathBuf::from("/repo"),
            id: TreeId::random(),
            state: Mutex::new(state),
            delay: Mutex::new(Duration::ZERO),
            in_progress: Mutex::new(HashMap::new()),
            max_same_path: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            diff_calls: AtomicUsize::new(0),
        }
    }

    pub fn tree(&self) -> WatchedTree {
        WatchedTree::new(self.id, self.root.clone())
    }

    pub fn with_file(self, path: &str, presence: Presence, copies: u32, sufficiency: Sufficiency) -> Self {
        self.set_file(path, presence, copies, sufficiency);
        self
    }

    pub fn set_file(&self, path: &str, presence: Presence, copies: u32, sufficiency: Sufficiency) {
        self.state.lock().files.insert(
            p(path),
            FakeFile {
                tracked: true,
                presence,
                copies,
                sufficiency,
            },
        );
    }

    pub fn add_untracked(&self, path: &str) {
        self.state.lock().files.insert(
            p(path),
            FakeFile {
                tracked: false,
                presence: Presence::Absent,
                copies: 0,
                sufficiency: Sufficiency::Insufficient,
            },
        );
    }

    pub fn add_empty_dir(&self, path: &str) {
        self.state.lock().empty_dirs.insert(p(path));
    }

    pub fn fail(&self, path: &str) {
        self.state.lock().failing.insert(p(path));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Record a primary-history commit touching `paths`
    pub fn commit_primary(&self, paths: &[&str]) -> CommitHash {
        let mut state = self.state.lock();
        let hash = CommitHash::new(format!("primary-{}", state.primary.len() + 1));
        state
            .primary
            .push((hash.clone(), paths.iter().map(|s| p(s)).collect()));
        hash
    }

    /// Record a location-log commit touching `keys`
    pub fn commit_metadata(&self, keys: Vec<ContentKey>) -> CommitHash {
        let mut state = self.state.lock();
        let hash = CommitHash::new(format!("meta-{}", state.metadata.len()));
        state.metadata.push((hash.clone(), keys));
        hash
    }

    pub fn head(&self) -> CommitCursor {
        let state = self.state.lock();
        CommitCursor {
            primary: state.primary.last().map(|(h, _)| h.clone()),
            metadata: state.metadata.last().map(|(h, _)| h.clone()).unwrap_or_else(|| CommitHash::new("meta-0")),
        }
    }

    pub fn commands(&self) -> Vec<(RepoPath, AnnexCommand)> {
        self.state.lock().commands.clone()
    }

    /// Most refreshes of one path ever observed running at once
    pub fn max_concurrent_same_path(&self) -> usize {
        self.max_same_path.load(Ordering::SeqCst)
    }

    fn all_dirs(state: &FakeState) -> BTreeSet<RepoPath> {
        let mut dirs: BTreeSet<RepoPath> = state.empty_dirs.clone();
        for dir in state.empty_dirs.iter() {
            dirs.extend(dir.ancestors());
        }
        for path in state.files.keys() {
            dirs.extend(path.ancestors());
        }
        dirs.insert(RepoPath::root());
        dirs
    }
}

impl VcsQuery for FakeVcs {
    fn tree_id(&self, root: &Path) -> VcsResult<TreeId> {
        if root == self.root {
            Ok(self.id)
        } else {
            Err(VcsError::MissingTreeId(root.to_path_buf()))
        }
    }

    fn is_directory(&self, _tree: &WatchedTree, path: &RepoPath) -> VcsResult<bool> {
        let state = self.state.lock();
        Ok(Self::all_dirs(&state).contains(path))
    }

    fn status_of(&self, _tree: &WatchedTree, path: &RepoPath) -> VcsResult<PathFacts> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut running = self.in_progress.lock();
            let count = running.entry(path.clone()).or_insert(0);
            *count += 1;
            self.max_same_path.fetch_max(*count, Ordering::SeqCst);
        }

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = {
            let state = self.state.lock();
            if state.failing.contains(path) {
                Err(VcsError::Malformed(format!("scripted failure for {}", path)))
            } else {
                match state.files.get(path) {
                    Some(file) if file.tracked => Ok(PathFacts::tracked_file(
                        file.presence,
                        Replicas::new(file.copies, file.sufficiency),
                        FakeFile::key(path),
                    )),
                    Some(_) => Ok(PathFacts::untracked(false)),
                    None => Err(VcsError::Exit {
                        command: format!("info {}", path),
                        code: Some(1),
                        stderr: "not found".to_string(),
                    }),
                }
            }
        };

        if let Some(count) = self.in_progress.lock().get_mut(path) {
            *count -= 1;
        }
        result
    }

    fn immediate_children(&self, _tree: &WatchedTree, dir: &RepoPath) -> VcsResult<Vec<RepoPath>> {
        let state = self.state.lock();
        let mut children: BTreeSet<RepoPath> = Self::all_dirs(&state)
            .into_iter()
            .filter(|d| dir.is_parent_of(d))
            .collect();
        children.extend(state.files.keys().filter(|f| dir.is_parent_of(f)).cloned());
        Ok(children.into_iter().collect())
    }

    fn changed_files_since(
        &self,
        _tree: &WatchedTree,
        since: Option<&CommitHash>,
    ) -> VcsResult<Vec<RepoPath>> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let start = match since {
            None => 0,
            Some(hash) => state
                .primary
                .iter()
                .position(|(h, _)| h == hash)
                .map(|i| i + 1)
                .ok_or_else(|| VcsError::Malformed(format!("unknown commit {}", hash)))?,
        };
        let mut out: Vec<RepoPath> = state.primary[start..]
            .iter()
            .flat_map(|(_, paths)| paths.iter().cloned())
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn changed_content_keys_since(
        &self,
        _tree: &WatchedTree,
        since: &CommitHash,
    ) -> VcsResult<Vec<ContentKey>> {
        self.diff_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let start = state
            .metadata
            .iter()
            .position(|(h, _)| h == since)
            .map(|i| i + 1)
            .ok_or_else(|| VcsError::Malformed(format!("unknown commit {}", since)))?;
        Ok(state.metadata[start..]
            .iter()
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect())
    }

    fn latest_primary_commit(&self, _tree: &WatchedTree) -> VcsResult<Option<CommitHash>> {
        Ok(self.head().primary)
    }

    fn latest_metadata_commit(&self, _tree: &WatchedTree) -> VcsResult<CommitHash> {
        Ok(self.head().metadata)
    }

    fn run_command(
        &self,
        _tree: &WatchedTree,
        path: &RepoPath,
        command: AnnexCommand,
    ) -> VcsResult<()> {
        let mut state = self.state.lock();
        state.commands.push((path.clone(), command));
        if let Some(file) = state.files.get_mut(path) {
            match command {
                AnnexCommand::Get => file.presence = Presence::Present,
                AnnexCommand::Drop => file.presence = Presence::Absent,
                AnnexCommand::Add => file.tracked = true,
                AnnexCommand::Lock | AnnexCommand::Unlock => {}
            }
        }
        Ok(())
    }
}

/// Runs once, when the store is asked for the status of its path
pub type ReadHook = Box<dyn FnOnce(&SledStore) + Send>;

/// Temporary sled store with hooks for interleaving engine work
pub struct HookedStore {
    inner: SledStore,
    on_read: Mutex<Option<(RepoPath, ReadHook)>>,
    cursor_delay: Mutex<Duration>,
}

impl HookedStore {
    pub fn temporary() -> Self {
        Self {
            inner: SledStore::temporary().unwrap(),
            on_read: Mutex::new(None),
            cursor_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Run `hook` right after the next read of `path`, before the value
    /// is returned to the reader
    pub fn on_next_read(&self, path: &str, hook: impl FnOnce(&SledStore) + Send + 'static) {
        *self.on_read.lock() = Some((p(path), Box::new(hook)));
    }

    /// Slow down cursor reads
    pub fn set_cursor_delay(&self, delay: Duration) {
        *self.cursor_delay.lock() = delay;
    }

    pub fn status_count(&self, tree: TreeId) -> usize {
        self.inner.status_count(tree)
    }
}

impl StatusStore for HookedStore {
    fn status(&self, tree: TreeId, path: &RepoPath) -> StoreResult<Option<PathStatus>> {
        let value = self.inner.status(tree, path)?;
        let hook = {
            let mut slot = self.on_read.lock();
            match slot.take() {
                Some((hooked, hook)) if &hooked == path => Some(hook),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        if let Some(hook) = hook {
            hook(&self.inner);
        }
        Ok(value)
    }

    fn put_status(&self, tree: TreeId, status: &PathStatus) -> StoreResult<()> {
        self.inner.put_status(tree, status)
    }

    fn children_of(&self, tree: TreeId, dir: &RepoPath) -> StoreResult<Vec<PathStatus>> {
        self.inner.children_of(tree, dir)
    }

    fn statuses(&self, tree: TreeId) -> StoreResult<Vec<PathStatus>> {
        self.inner.statuses(tree)
    }

    fn dirs_needing_refresh(&self, tree: TreeId) -> StoreResult<Vec<RepoPath>> {
        self.inner.dirs_needing_refresh(tree)
    }

    fn dirs_missing_entries(&self, tree: TreeId) -> StoreResult<Vec<RepoPath>> {
        self.inner.dirs_missing_entries(tree)
    }

    fn untracked_paths(&self, tree: TreeId) -> StoreResult<Vec<RepoPath>> {
        self.inner.untracked_paths(tree)
    }

    fn paths_for_content_keys(&self, tree: TreeId, keys: &[ContentKey]) -> StoreResult<KeyLookup> {
        self.inner.paths_for_content_keys(tree, keys)
    }

    fn invalidate_dir(&self, tree: TreeId, dir: &RepoPath) -> StoreResult<()> {
        self.inner.invalidate_dir(tree, dir)
    }

    fn dir_generation(&self, tree: TreeId, dir: &RepoPath) -> StoreResult<u64> {
        self.inner.dir_generation(tree, dir)
    }

    fn put_dir_status_if(&self, tree: TreeId, status: &PathStatus, generation: u64) -> StoreResult<bool> {
        self.inner.put_dir_status_if(tree, status, generation)
    }

    fn remove_tree(&self, tree: TreeId) -> StoreResult<()> {
        self.inner.remove_tree(tree)
    }

    fn cursor(&self, tree: TreeId) -> StoreResult<Option<CommitCursor>> {
        let delay = *self.cursor_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.inner.cursor(tree)
    }

    fn put_cursor(&self, tree: TreeId, cursor: &CommitCursor) -> StoreResult<()> {
        self.inner.put_cursor(tree, cursor)
    }

    fn watched_trees(&self) -> StoreResult<Vec<WatchedTree>> {
        self.inner.watched_trees()
    }

    fn put_watched_trees(&self, trees: &[WatchedTree]) -> StoreResult<()> {
        self.inner.put_watched_trees(trees)
    }

    fn push_command(&self, request: &CommandRequest) -> StoreResult<()> {
        self.inner.push_command(request)
    }

    fn drain_commands(&self) -> StoreResult<Vec<CommandRequest>> {
        self.inner.drain_commands()
    }

    fn last_modified(&self) -> StoreResult<u64> {
        self.inner.last_modified()
    }
}

/// Components wired over a temporary store and a registered fake tree
pub struct Harness {
    pub store: Arc<HookedStore>,
    pub vcs: Arc<FakeVcs>,
    pub ctx: Arc<EngineContext>,
    pub scheduler: Arc<Scheduler>,
    pub aggregator: Arc<FolderAggregator>,
    pub scanner: Arc<TreeScanner>,
    pub detector: Arc<ChangeDetector>,
    pub tree: WatchedTree,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(vcs: FakeVcs) -> Self {
        let store = Arc::new(HookedStore::temporary());
        let vcs = Arc::new(vcs);
        let tree = vcs.tree();

        let registry = TreeRegistry::load(store.clone()).unwrap();
        registry.reconcile([tree.clone()].into_iter().collect()).unwrap();

        let ctx = Arc::new(EngineContext::new(store.clone(), vcs.clone(), registry, 1000));
        let scheduler = Arc::new(Scheduler::new(ctx.clone(), LaneLimits::default()));
        let aggregator = Arc::new(FolderAggregator::new(ctx.clone(), scheduler.clone()));
        let scanner = Arc::new(TreeScanner::new(ctx.clone(), aggregator.clone(), None));
        let detector = Arc::new(ChangeDetector::new(ctx.clone(), scheduler.clone()));

        Self {
            store,
            vcs,
            ctx,
            scheduler,
            aggregator,
            scanner,
            detector,
            tree,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start the scheduler lanes
    pub fn start(&self) {
        self.scheduler.start(self.shutdown.clone());
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.scheduler.wait_idle())
            .await
            .expect("scheduler did not go idle");
    }

    pub fn status(&self, path: &str) -> Option<PathStatus> {
        self.store.status(self.tree.id, &p(path)).unwrap()
    }

    /// Run aggregation passes until nothing is left to process
    pub fn aggregate_until_quiet(&self, max_passes: usize) -> usize {
        for pass in 1..=max_passes {
            let report = self.aggregator.reconcile(self.tree.id).unwrap();
            if report.processed == 0 {
                return pass;
            }
        }
        max_passes
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
