//! Lock-aware status cache over a resource tree's sync-info table.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

use subsync_common::{Error, ResourcePath, Result};
use subsync_storage::{Depth, ResourceTree, SyncKey};

use crate::pending::{PendingValue, PendingWrites};
use crate::status::LocalResourceStatus;

/// Persistent map from resource path to its last known [`LocalResourceStatus`].
///
/// Entries live in the resource tree's sync-info table under one [`SyncKey`].
/// The tree may be locked by unrelated work at any time; writes issued while
/// it is locked go to a [`PendingWrites`] overlay instead, and reads consult the
/// overlay before the tree. Every read first drains at most one pending write
/// so the overlay empties gradually once the tree is unlocked.
///
/// Failures inside the cache are logged and never surface to callers of the
/// status accessors: an unreadable entry is reported as unknown.
pub struct StatusCache {
    tree: Arc<dyn ResourceTree>,
    key: SyncKey,
    pending: PendingWrites,
}

impl StatusCache {
    /// Create a cache storing entries in `tree` under `key`.
    pub fn new(tree: Arc<dyn ResourceTree>, key: SyncKey) -> Self {
        Self {
            tree,
            key,
            pending: PendingWrites::new(),
        }
    }

    pub fn key(&self) -> &SyncKey {
        &self.key
    }

    pub fn tree(&self) -> &Arc<dyn ResourceTree> {
        &self.tree
    }

    /// Number of writes still waiting for the tree to unlock.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cached status for `path`, or `None` if unknown or unreadable.
    pub fn get_status(&self, path: &ResourcePath) -> Option<LocalResourceStatus> {
        let bytes = match self.cached_bytes(path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read cached status for {}: {}", path, e);
                return None;
            }
        };

        match LocalResourceStatus::from_bytes(&bytes) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Discarding unreadable cached status for {}: {}", path, e);
                None
            }
        }
    }

    /// Install every status in `statuses`, as fetched for `root`.
    ///
    /// Existing entries that are not part of `statuses` are left alone.
    /// Statuses outside `root` are skipped.
    pub fn set_statuses(&self, statuses: &[LocalResourceStatus], root: &ResourcePath) {
        let mut installed = 0usize;
        for status in statuses {
            if !root.is_prefix_of(&status.path) {
                warn!("Skipping status for {} outside of {}", status.path, root);
                continue;
            }
            self.add_status(status);
            installed += 1;
        }
        debug!("Installed {} statuses under {}", installed, root);
    }

    /// Install one status and return the path it was stored under.
    ///
    /// An unversioned status for a path that neither exists nor is a phantom
    /// is not recorded.
    pub fn add_status(&self, status: &LocalResourceStatus) -> ResourcePath {
        let path = status.path.clone();
        if status.is_unversioned() && !self.is_tracked(&path) {
            return path;
        }

        let result = status
            .to_bytes()
            .and_then(|bytes| self.set_cached_bytes(&path, Some(bytes)));
        if let Err(e) = result {
            warn!("Failed to cache status for {}: {}", path, e);
        }
        path
    }

    /// Clear the entry for `path` and return the path.
    pub fn remove_status(&self, path: &ResourcePath) -> ResourcePath {
        if let Err(e) = self.set_cached_bytes(path, None) {
            warn!("Failed to clear cached status for {}: {}", path, e);
        }
        path.clone()
    }

    /// Clear the entry at `root`, and every entry below it when `deep`.
    ///
    /// Both the tree and the pending overlay are cleared. A root that no longer
    /// exists is not an error. While the tree is locked, stored entries are
    /// shadowed by tombstones until they can be cleared.
    pub fn purge_cache(&self, root: &ResourcePath, deep: bool) -> Result<()> {
        let depth = if deep { Depth::Infinite } else { Depth::Zero };

        if deep {
            self.pending.remove_recursive(root);
        } else {
            self.pending.remove(root);
        }

        if !self.is_tracked(root) {
            return Ok(());
        }

        match self.tree.flush_sync_info(&self.key, root, depth) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Purge root {} vanished: {}", root, e);
                Ok(())
            }
            Err(e) if e.is_not_permitted() => {
                let paths = self
                    .tree
                    .sync_info_paths(&self.key, root, depth)
                    .map_err(|e| storage_error("listing", root, e))?;
                debug!("Tree locked; shadowing {} entries under {}", paths.len(), root);
                for path in paths {
                    self.pending.write(path, PendingValue::Removed);
                }
                Ok(())
            }
            Err(e) => Err(storage_error("purging", root, e)),
        }
    }

    /// Write at most one pending entry through to the tree.
    ///
    /// Does nothing while the tree is locked or nothing is pending. Returns
    /// whether an entry was written. The overlay stays locked for the duration
    /// of the write, so a direct write of the same path waits for it and is
    /// never overwritten by the older buffered value.
    pub fn flush_pending_cache_writes(&self) -> bool {
        if self.pending.is_empty() || self.tree.is_locked() {
            return false;
        }
        let flushed = self.pending.flush_one(|path, value| {
            self.tree.set_sync_info(&self.key, path, value.as_bytes())
        });

        match flushed {
            None => false,
            Some((path, Ok(()))) => {
                debug!("Flushed pending status for {}", path);
                true
            }
            Some((_, Err(e))) if e.is_not_permitted() => false,
            Some((path, Err(e))) => {
                warn!("Failed to flush pending status for {}: {}", path, e);
                false
            }
        }
    }

    /// Paths at or below `root` that currently have a cached entry.
    pub fn cached_paths(&self, root: &ResourcePath) -> Result<Vec<ResourcePath>> {
        let stored = self
            .tree
            .sync_info_paths(&self.key, root, Depth::Infinite)
            .map_err(|e| storage_error("listing", root, e))?;

        let mut paths: BTreeSet<ResourcePath> = stored.into_iter().collect();
        for (path, value) in self.pending.entries_under(root) {
            if value.is_removed() {
                paths.remove(&path);
            } else {
                paths.insert(path);
            }
        }
        Ok(paths.into_iter().collect())
    }

    fn is_tracked(&self, path: &ResourcePath) -> bool {
        self.tree.exists(path) || self.tree.is_phantom(path)
    }

    fn cached_bytes(&self, path: &ResourcePath) -> Result<Option<Vec<u8>>> {
        self.flush_pending_cache_writes();

        match self.pending.read(path) {
            Some(PendingValue::Bytes(bytes)) => Ok(Some(bytes)),
            Some(PendingValue::Removed) => Ok(None),
            None => self
                .tree
                .sync_info(&self.key, path)
                .map_err(|e| storage_error("reading", path, e)),
        }
    }

    fn set_cached_bytes(&self, path: &ResourcePath, bytes: Option<Vec<u8>>) -> Result<()> {
        let can_modify = !self.tree.is_locked();
        let old = self.cached_bytes(path)?;

        match bytes {
            None => {
                if old.is_none() {
                    return Ok(());
                }
                let tracked = self.is_tracked(path);
                if can_modify {
                    self.pending.remove(path);
                    if tracked {
                        self.write_through(path, PendingValue::Removed)?;
                    }
                } else if tracked {
                    self.pending.write(path.clone(), PendingValue::Removed);
                } else {
                    self.pending.remove(path);
                }
            }
            Some(bytes) => {
                if old.as_deref() == Some(bytes.as_slice()) {
                    return Ok(());
                }
                if can_modify {
                    self.pending.remove(path);
                    self.write_through(path, PendingValue::Bytes(bytes))?;
                } else {
                    self.pending.write(path.clone(), PendingValue::Bytes(bytes));
                }
            }
        }
        Ok(())
    }

    /// Write directly to the tree, deferring if it became locked meanwhile.
    fn write_through(&self, path: &ResourcePath, value: PendingValue) -> Result<()> {
        match self.tree.set_sync_info(&self.key, path, value.as_bytes()) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_permitted() => {
                debug!("Tree locked while writing {}; deferring", path);
                self.pending.write(path.clone(), value);
                Ok(())
            }
            Err(e) => Err(storage_error("writing", path, e)),
        }
    }
}

fn storage_error(action: &str, path: &ResourcePath, err: Error) -> Error {
    match err {
        Error::Storage(_) => err,
        other => Error::Storage(format!("{} sync info for {}: {}", action, path, other)),
    }
}
