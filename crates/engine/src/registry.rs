//! The authoritative set of watched trees

use ahash::AHashMap;
use annexstat_core::{TreeId, WatchedTree};
use annexstat_store::{StatusStore, StoreError};
use annexstat_vcs::{VcsError, VcsQuery};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Difference between two watched sets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeDelta {
    pub added: Vec<WatchedTree>,
    pub removed: Vec<WatchedTree>,
    /// Same id, new root
    pub relocated: Vec<WatchedTree>,
}

impl TreeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.relocated.is_empty()
    }
}

/// Result of mapping configured roots to trees
#[derive(Debug, Default)]
pub struct Identified {
    pub trees: HashSet<WatchedTree>,
    /// Roots without a usable annex identifier
    pub rejected: Vec<(PathBuf, VcsError)>,
}

pub struct TreeRegistry {
    store: Arc<dyn StatusStore>,
    trees: RwLock<AHashMap<TreeId, WatchedTree>>,
}

impl TreeRegistry {
    /// Registry seeded from the persisted set
    pub fn load(store: Arc<dyn StatusStore>) -> Result<Self, StoreError> {
        let trees = store
            .watched_trees()?
            .into_iter()
            .map(|tree| (tree.id, tree))
            .collect();
        Ok(Self {
            store,
            trees: RwLock::new(trees),
        })
    }

    pub fn current_trees(&self) -> HashSet<WatchedTree> {
        self.trees.read().values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<TreeId> {
        self.trees.read().keys().copied().collect()
    }

    pub fn contains(&self, id: TreeId) -> bool {
        self.trees.read().contains_key(&id)
    }

    pub fn get(&self, id: TreeId) -> Option<WatchedTree> {
        self.trees.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.trees.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.read().is_empty()
    }

    /// Replace the watched set, persisting it first
    ///
    /// On a store failure the previous set stays in place and the error is
    /// returned; the caller retries on its next cycle.
    pub fn reconcile(&self, new_set: HashSet<WatchedTree>) -> Result<TreeDelta, StoreError> {
        let delta = self.delta_to(&new_set);
        if delta.is_empty() {
            return Ok(delta);
        }

        // Persist outside the lock; only the swap happens under it
        let persisted: Vec<WatchedTree> = new_set.iter().cloned().collect();
        self.store.put_watched_trees(&persisted)?;

        *self.trees.write() = new_set.into_iter().map(|tree| (tree.id, tree)).collect();
        info!(
            added = delta.added.len(),
            removed = delta.removed.len(),
            relocated = delta.relocated.len(),
            "Watched trees updated"
        );
        Ok(delta)
    }

    fn delta_to(&self, new_set: &HashSet<WatchedTree>) -> TreeDelta {
        let trees = self.trees.read();

        let mut delta = TreeDelta::default();
        for tree in new_set {
            match trees.get(&tree.id) {
                None => delta.added.push(tree.clone()),
                Some(old) if old.root != tree.root => delta.relocated.push(tree.clone()),
                Some(_) => {}
            }
        }
        for (id, old) in trees.iter() {
            if !new_set.iter().any(|t| t.id == *id) {
                delta.removed.push(old.clone());
            }
        }
        delta
    }
}

/// Resolve configured root folders to trees through the VCS
pub fn identify(roots: &[PathBuf], vcs: &dyn VcsQuery) -> Identified {
    let mut out = Identified::default();
    for root in roots {
        match vcs.tree_id(root) {
            Ok(id) => {
                out.trees.insert(WatchedTree::new(id, root.clone()));
            }
            Err(e) => {
                warn!(root = %root.display(), "Not watching root: {}", e);
                out.rejected.push((root.clone(), e));
            }
        }
    }
    out
}
