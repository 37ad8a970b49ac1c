//! Handles shared by every engine component

use crate::cache::StatusCache;
use crate::events::StatusChanged;
use crate::registry::TreeRegistry;
use annexstat_core::{PathStatus, RepoPath, TreeId};
use annexstat_store::{Result, StatusStore};
use annexstat_vcs::VcsQuery;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 1024;

pub struct EngineContext {
    pub store: Arc<dyn StatusStore>,
    pub vcs: Arc<dyn VcsQuery>,
    pub cache: StatusCache,
    pub registry: TreeRegistry,
    events: broadcast::Sender<StatusChanged>,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn StatusStore>,
        vcs: Arc<dyn VcsQuery>,
        registry: TreeRegistry,
        cache_capacity: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            vcs,
            cache: StatusCache::new(cache_capacity),
            registry,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.events.subscribe()
    }

    /// Persist a status, mirror it into the cache and announce it if its
    /// badge-relevant content changed
    ///
    /// Writes for trees that left the registry are dropped. Returns whether
    /// the status changed.
    pub fn write_status(&self, tree: TreeId, status: PathStatus) -> Result<bool> {
        if !self.registry.contains(tree) {
            debug!(%tree, path = %status.path, "dropping write for retired tree");
            return Ok(false);
        }

        let prior = self.store.status(tree, &status.path)?;
        self.store.put_status(tree, &status)?;
        Ok(self.publish(tree, prior, status))
    }

    /// `write_status` for an aggregated directory, read at invalidation
    /// `generation`
    ///
    /// Returns `None` without writing if the directory was invalidated
    /// again since; it then stays flagged for the next pass.
    pub fn write_dir_status(
        &self,
        tree: TreeId,
        status: PathStatus,
        generation: u64,
    ) -> Result<Option<bool>> {
        if !self.registry.contains(tree) {
            debug!(%tree, path = %status.path, "dropping write for retired tree");
            return Ok(Some(false));
        }

        let prior = self.store.status(tree, &status.path)?;
        if !self.store.put_dir_status_if(tree, &status, generation)? {
            return Ok(None);
        }
        Ok(Some(self.publish(tree, prior, status)))
    }

    fn publish(&self, tree: TreeId, prior: Option<PathStatus>, status: PathStatus) -> bool {
        let changed = prior.map_or(true, |prior| !prior.same_status(&status));
        self.cache.refresh(tree, status.clone());
        if changed {
            // No subscribers is fine
            let _ = self.events.send(StatusChanged { tree, status });
        }
        changed
    }

    /// Flag the parent directory of `path` for re-aggregation
    pub fn invalidate_parent(&self, tree: TreeId, path: &RepoPath) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };
        if !self.registry.contains(tree) {
            return Ok(());
        }

        self.store.invalidate_dir(tree, &parent)?;
        if self.cache.contains(tree, &parent) {
            if let Some(status) = self.store.status(tree, &parent)? {
                self.cache.refresh(tree, status);
            }
        }
        Ok(())
    }
}
