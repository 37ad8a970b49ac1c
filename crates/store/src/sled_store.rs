//! sled-backed `StatusStore`

use crate::keys::{self, TREE_PREFIX_LEN};
use crate::{KeyLookup, Result, StatusStore, StoreError};
use ahash::{AHashMap, AHashSet};
use annexstat_core::{
    now_ms, CommandRequest, CommitCursor, ContentKey, PathStatus, RepoPath, TreeId, WatchedTree,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use sled::{Batch, Db, Tree};
use std::path::Path;
use tracing::debug;

const LAST_MODIFIED: &[u8] = b"last_modified";

/// Status store persisted in a sled database
pub struct SledStore {
    db: Db,
    /// tree ++ path -> PathStatus
    statuses: Tree,
    /// tree ++ content key ++ 0x00 ++ path -> ()
    content_keys: Tree,
    /// tree -> CommitCursor
    cursors: Tree,
    /// tree -> WatchedTree
    trees: Tree,
    /// ULID -> CommandRequest
    commands: Tree,
    meta: Tree,
    /// status key -> invalidation generation; also serializes directory
    /// invalidation against conditional directory writes
    generations: Mutex<AHashMap<Vec<u8>, u64>>,
}

impl SledStore {
    /// Open or create a store inside `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let db = sled::open(dir.join("status.db"))?;
        Self::from_db(db)
    }

    /// In-memory store removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            statuses: db.open_tree("statuses")?,
            content_keys: db.open_tree("content_keys")?,
            cursors: db.open_tree("cursors")?,
            trees: db.open_tree("trees")?,
            commands: db.open_tree("commands")?,
            meta: db.open_tree("meta")?,
            generations: Mutex::new(AHashMap::new()),
            db,
        })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Number of stored statuses for a tree
    pub fn status_count(&self, tree: TreeId) -> usize {
        self.statuses.scan_prefix(keys::tree_prefix(tree)).count()
    }

    fn touch(&self) -> Result<()> {
        let now = now_ms();
        self.meta.fetch_and_update(LAST_MODIFIED, |old| {
            let prev = old.and_then(decode_u64).unwrap_or(0);
            Some(now.max(prev + 1).to_be_bytes().to_vec())
        })?;
        Ok(())
    }

    fn scan_statuses(&self, prefix: &[u8]) -> Result<Vec<PathStatus>> {
        let mut out = Vec::new();
        for item in self.statuses.scan_prefix(prefix) {
            let (_, value) = item?;
            out.push(decode::<PathStatus>(&value)?);
        }
        Ok(out)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

fn decode_u64(bytes: &[u8]) -> Option<u64> {
    bytes.try_into().ok().map(u64::from_be_bytes)
}

impl StatusStore for SledStore {
    fn status(&self, tree: TreeId, path: &RepoPath) -> Result<Option<PathStatus>> {
        match self.statuses.get(keys::status_key(tree, path))? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn put_status(&self, tree: TreeId, status: &PathStatus) -> Result<()> {
        let key = keys::status_key(tree, &status.path);
        let previous = self.statuses.insert(key, bincode::serialize(status)?)?;

        // Keep the content-key index in step with the record
        if let Some(prev) = previous {
            let prev: PathStatus = decode(&prev)?;
            if let Some(old) = prev.content_key.filter(|k| Some(k) != status.content_key.as_ref()) {
                self.content_keys
                    .remove(keys::content_index_key(tree, &old, &status.path))?;
            }
        }
        if let Some(content) = &status.content_key {
            self.content_keys.insert(
                keys::content_index_key(tree, content, &status.path),
                Vec::<u8>::new(),
            )?;
        }

        self.touch()
    }

    fn children_of(&self, tree: TreeId, dir: &RepoPath) -> Result<Vec<PathStatus>> {
        let mut prefix = keys::tree_prefix(tree).to_vec();
        if !dir.is_root() {
            prefix.extend_from_slice(dir.as_str().as_bytes());
            prefix.push(b'/');
        }

        Ok(self
            .scan_statuses(&prefix)?
            .into_iter()
            .filter(|s| dir.is_parent_of(&s.path))
            .collect())
    }

    fn statuses(&self, tree: TreeId) -> Result<Vec<PathStatus>> {
        self.scan_statuses(&keys::tree_prefix(tree))
    }

    fn dirs_needing_refresh(&self, tree: TreeId) -> Result<Vec<RepoPath>> {
        Ok(self
            .statuses(tree)?
            .into_iter()
            .filter(|s| s.is_dir && s.needs_refresh)
            .map(|s| s.path)
            .collect())
    }

    fn dirs_missing_entries(&self, tree: TreeId) -> Result<Vec<RepoPath>> {
        let all = self.statuses(tree)?;
        let known: AHashSet<&RepoPath> = all.iter().map(|s| &s.path).collect();

        let mut missing = AHashSet::new();
        for status in &all {
            for ancestor in status.path.ancestors() {
                if !known.contains(&ancestor) {
                    missing.insert(ancestor);
                }
            }
        }

        let mut out: Vec<RepoPath> = missing.into_iter().collect();
        out.sort();
        Ok(out)
    }

    fn untracked_paths(&self, tree: TreeId) -> Result<Vec<RepoPath>> {
        Ok(self
            .statuses(tree)?
            .into_iter()
            .filter(|s| !s.is_tracked)
            .map(|s| s.path)
            .collect())
    }

    fn paths_for_content_keys(&self, tree: TreeId, wanted: &[ContentKey]) -> Result<KeyLookup> {
        let mut lookup = KeyLookup::default();
        let mut seen = AHashSet::new();

        for content in wanted {
            let prefix = keys::content_index_prefix(tree, content);
            let mut found = false;
            for item in self.content_keys.scan_prefix(&prefix) {
                let (key, _) = item?;
                let path = keys::path_from_suffix(&key[prefix.len()..]).ok_or_else(|| {
                    StoreError::Corrupt(format!("content index entry for {}", content))
                })?;
                found = true;
                if seen.insert(path.clone()) {
                    lookup.paths.push(path);
                }
            }
            if !found {
                lookup.unmapped.push(content.clone());
            }
        }

        Ok(lookup)
    }

    fn invalidate_dir(&self, tree: TreeId, dir: &RepoPath) -> Result<()> {
        let mut generations = self.generations.lock();
        *generations.entry(keys::status_key(tree, dir)).or_insert(0) += 1;

        match self.status(tree, dir)? {
            Some(mut status) if status.is_dir => {
                if !status.needs_refresh {
                    status.needs_refresh = true;
                    self.put_status(tree, &status)?;
                }
                Ok(())
            }
            Some(_) => {
                debug!(%tree, path = %dir, "not invalidating non-directory entry");
                Ok(())
            }
            None => self.put_status(tree, &PathStatus::pending_dir(dir.clone(), now_ms())),
        }
    }

    fn dir_generation(&self, tree: TreeId, dir: &RepoPath) -> Result<u64> {
        Ok(self
            .generations
            .lock()
            .get(&keys::status_key(tree, dir))
            .copied()
            .unwrap_or(0))
    }

    fn put_dir_status_if(&self, tree: TreeId, status: &PathStatus, generation: u64) -> Result<bool> {
        let generations = self.generations.lock();
        let current = generations
            .get(&keys::status_key(tree, &status.path))
            .copied()
            .unwrap_or(0);
        if current != generation {
            debug!(%tree, path = %status.path, "directory invalidated since read; not writing");
            return Ok(false);
        }
        self.put_status(tree, status)?;
        Ok(true)
    }

    fn remove_tree(&self, tree: TreeId) -> Result<()> {
        let prefix = keys::tree_prefix(tree);
        self.generations.lock().retain(|key, _| !key.starts_with(&prefix));

        let mut batch = Batch::default();
        for item in self.statuses.scan_prefix(prefix) {
            let (key, _) = item?;
            batch.remove(key);
        }
        self.statuses.apply_batch(batch)?;

        let mut batch = Batch::default();
        for item in self.content_keys.scan_prefix(prefix) {
            let (key, _) = item?;
            batch.remove(key);
        }
        self.content_keys.apply_batch(batch)?;

        self.cursors.remove(prefix)?;
        Ok(())
    }

    fn cursor(&self, tree: TreeId) -> Result<Option<CommitCursor>> {
        match self.cursors.get(keys::tree_prefix(tree))? {
            Some(value) => Ok(Some(decode(&value)?)),
            None => Ok(None),
        }
    }

    fn put_cursor(&self, tree: TreeId, cursor: &CommitCursor) -> Result<()> {
        self.cursors
            .insert(keys::tree_prefix(tree), bincode::serialize(cursor)?)?;
        Ok(())
    }

    fn watched_trees(&self) -> Result<Vec<WatchedTree>> {
        let mut out = Vec::new();
        for item in self.trees.iter() {
            let (_, value) = item?;
            out.push(decode::<WatchedTree>(&value)?);
        }
        Ok(out)
    }

    fn put_watched_trees(&self, trees: &[WatchedTree]) -> Result<()> {
        let keep: AHashSet<[u8; TREE_PREFIX_LEN]> =
            trees.iter().map(|t| keys::tree_prefix(t.id)).collect();

        let mut batch = Batch::default();
        for item in self.trees.iter() {
            let (key, _) = item?;
            let stale = <[u8; TREE_PREFIX_LEN]>::try_from(&key[..])
                .map(|k| !keep.contains(&k))
                .unwrap_or(true);
            if stale {
                batch.remove(key);
            }
        }
        for tree in trees {
            batch.insert(&keys::tree_prefix(tree.id)[..], bincode::serialize(tree)?);
        }
        self.trees.apply_batch(batch)?;
        Ok(())
    }

    fn push_command(&self, request: &CommandRequest) -> Result<()> {
        self.commands
            .insert(request.id.to_bytes(), bincode::serialize(request)?)?;
        Ok(())
    }

    fn drain_commands(&self) -> Result<Vec<CommandRequest>> {
        let mut out = Vec::new();
        while let Some((_, value)) = self.commands.pop_min()? {
            out.push(decode::<CommandRequest>(&value)?);
        }
        Ok(out)
    }

    fn last_modified(&self) -> Result<u64> {
        Ok(self
            .meta
            .get(LAST_MODIFIED)?
            .and_then(|v| decode_u64(&v))
            .unwrap_or(0))
    }
}
