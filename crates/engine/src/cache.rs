//! Bounded read-through status cache
//!
//! Mirrors what was just persisted; the store stays authoritative, so
//! eviction never loses anything.

use annexstat_core::{PathStatus, RepoPath, TreeId};
use annexstat_store::{Result, StatusStore};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

pub struct StatusCache {
    entries: Mutex<LruCache<(TreeId, RepoPath), PathStatus>>,
}

impl StatusCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Memory only
    pub fn get(&self, tree: TreeId, path: &RepoPath) -> Option<PathStatus> {
        self.entries.lock().get(&(tree, path.clone())).cloned()
    }

    /// Falls through to the store on a miss and remembers the result
    pub fn get_or_load(
        &self,
        store: &dyn StatusStore,
        tree: TreeId,
        path: &RepoPath,
    ) -> Result<Option<PathStatus>> {
        if let Some(hit) = self.get(tree, path) {
            return Ok(Some(hit));
        }
        let loaded = store.status(tree, path)?;
        if let Some(status) = &loaded {
            self.put(tree, status.clone());
        }
        Ok(loaded)
    }

    pub fn put(&self, tree: TreeId, status: PathStatus) {
        self.entries.lock().put((tree, status.path.clone()), status);
    }

    /// Update an entry only if it is already cached
    pub fn refresh(&self, tree: TreeId, status: PathStatus) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.peek_mut(&(tree, status.path.clone())) {
            *slot = status;
        }
    }

    pub fn contains(&self, tree: TreeId, path: &RepoPath) -> bool {
        self.entries.lock().contains(&(tree, path.clone()))
    }

    pub fn forget_tree(&self, tree: TreeId) {
        let mut entries = self.entries.lock();
        let stale: Vec<(TreeId, RepoPath)> = entries
            .iter()
            .filter(|((id, _), _)| *id == tree)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
