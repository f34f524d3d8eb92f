//! In-memory resource tree for testing and embedding.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tree::{Depth, ResourceTree, SyncKey};
use subsync_common::{Error, ResourcePath, Result};

type SyncTable = HashMap<(SyncKey, ResourcePath), Vec<u8>>;

/// In-memory resource tree.
///
/// Resources are registered explicitly with [`add_resource`](Self::add_resource).
/// Deleting a resource keeps its sync info, which turns it into a phantom until
/// that info is cleared. The lock flag is driven by the test or host through
/// [`set_locked`](Self::set_locked).
pub struct MemoryResourceTree {
    resources: RwLock<HashSet<ResourcePath>>,
    sync_info: RwLock<SyncTable>,
    locked: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryResourceTree {
    /// Create a new empty tree containing only the workspace root.
    pub fn new() -> Self {
        Self {
            resources: RwLock::new(HashSet::from([ResourcePath::root()])),
            sync_info: RwLock::new(HashMap::new()),
            locked: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Register a resource (and its ancestors) as existing.
    pub fn add_resource(&self, path: &ResourcePath) -> Result<()> {
        let mut resources = self.resources_mut()?;
        let mut current = Some(path.clone());
        while let Some(p) = current {
            current = p.parent();
            resources.insert(p);
        }
        Ok(())
    }

    /// Delete a resource and everything below it. Sync info is retained.
    pub fn delete_resource(&self, path: &ResourcePath) -> Result<()> {
        self.resources_mut()?.retain(|p| !path.is_prefix_of(p));
        Ok(())
    }

    /// Lock or unlock the tree against mutation.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Number of successful sync-info mutations so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn resources(&self) -> Result<RwLockReadGuard<'_, HashSet<ResourcePath>>> {
        self.resources
            .read()
            .map_err(|_| Error::Storage("resource table poisoned".to_string()))
    }

    fn resources_mut(&self) -> Result<RwLockWriteGuard<'_, HashSet<ResourcePath>>> {
        self.resources
            .write()
            .map_err(|_| Error::Storage("resource table poisoned".to_string()))
    }

    fn table(&self) -> Result<RwLockReadGuard<'_, SyncTable>> {
        self.sync_info
            .read()
            .map_err(|_| Error::Storage("sync table poisoned".to_string()))
    }

    fn table_mut(&self) -> Result<RwLockWriteGuard<'_, SyncTable>> {
        self.sync_info
            .write()
            .map_err(|_| Error::Storage("sync table poisoned".to_string()))
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.is_locked() {
            return Err(Error::NotPermitted("resource tree is locked".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryResourceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceTree for MemoryResourceTree {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        self.resources().map(|r| r.contains(path)).unwrap_or(false)
    }

    fn is_phantom(&self, path: &ResourcePath) -> bool {
        if self.exists(path) {
            return false;
        }
        self.table()
            .map(|table| table.keys().any(|(_, p)| path.is_prefix_of(p)))
            .unwrap_or(false)
    }

    fn sync_info(&self, key: &SyncKey, path: &ResourcePath) -> Result<Option<Vec<u8>>> {
        Ok(self.table()?.get(&(key.clone(), path.clone())).cloned())
    }

    fn set_sync_info(
        &self,
        key: &SyncKey,
        path: &ResourcePath,
        bytes: Option<&[u8]>,
    ) -> Result<()> {
        self.ensure_unlocked()?;
        let mut table = self.table_mut()?;
        let entry = (key.clone(), path.clone());
        match bytes {
            Some(bytes) => {
                table.insert(entry, bytes.to_vec());
            }
            None => {
                table.remove(&entry);
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn flush_sync_info(&self, key: &SyncKey, root: &ResourcePath, depth: Depth) -> Result<()> {
        if !self.exists(root) && !self.is_phantom(root) {
            return Err(Error::NotFound(format!("Resource not found: {}", root)));
        }
        self.ensure_unlocked()?;
        self.table_mut()?
            .retain(|(k, p), _| k != key || !depth.covers(root, p));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sync_info_paths(
        &self,
        key: &SyncKey,
        root: &ResourcePath,
        depth: Depth,
    ) -> Result<Vec<ResourcePath>> {
        let mut paths: Vec<ResourcePath> = self
            .table()?
            .keys()
            .filter(|(k, p)| k == key && depth.covers(root, p))
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}
