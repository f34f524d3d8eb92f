//! Pending-write overlay for sync info that could not be persisted yet.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use subsync_common::ResourcePath;

/// A deferred sync-info write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingValue {
    /// Encoded status to store.
    Bytes(Vec<u8>),
    /// Tombstone: the entry is to be cleared.
    Removed,
}

impl PendingValue {
    /// Bytes to hand to the resource tree (`None` clears).
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            PendingValue::Bytes(bytes) => Some(bytes),
            PendingValue::Removed => None,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, PendingValue::Removed)
    }
}

/// Overlay of writes deferred while the resource tree was locked.
///
/// Every method takes the internal lock for its own duration only, so
/// individual operations are atomic but sequences of them are not.
/// [`flush_one`](Self::flush_one) keeps the lock across its write.
#[derive(Debug, Default)]
pub struct PendingWrites {
    writes: Mutex<HashMap<ResourcePath, PendingValue>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourcePath, PendingValue>> {
        // The map holds plain values; a panicking writer cannot leave it torn.
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, path: &ResourcePath) -> bool {
        self.lock().contains_key(path)
    }

    /// Pending value for `path`, if any.
    pub fn read(&self, path: &ResourcePath) -> Option<PendingValue> {
        self.lock().get(path).cloned()
    }

    /// Record a pending value, replacing any earlier one for the same path.
    pub fn write(&self, path: ResourcePath, value: PendingValue) {
        self.lock().insert(path, value);
    }

    pub fn remove(&self, path: &ResourcePath) -> Option<PendingValue> {
        self.lock().remove(path)
    }

    /// Remove `root` and every entry below it. Returns how many were removed.
    pub fn remove_recursive(&self, root: &ResourcePath) -> usize {
        let mut writes = self.lock();
        let before = writes.len();
        writes.retain(|path, _| !root.is_prefix_of(path));
        before - writes.len()
    }

    /// Hand one pending entry to `write`, dropping it if the write succeeds.
    ///
    /// Which entry is picked is unspecified. The overlay stays locked while
    /// `write` runs, so an overlay operation on the same path issued meanwhile
    /// takes effect after the flushed value. Returns `None` when nothing is
    /// pending.
    pub fn flush_one<E>(
        &self,
        write: impl FnOnce(&ResourcePath, &PendingValue) -> Result<(), E>,
    ) -> Option<(ResourcePath, Result<(), E>)> {
        let mut writes = self.lock();
        let (path, value) = writes
            .iter()
            .next()
            .map(|(path, value)| (path.clone(), value.clone()))?;

        let result = write(&path, &value);
        if result.is_ok() {
            writes.remove(&path);
        }
        Some((path, result))
    }

    /// Snapshot of the pending entries at or below `root`.
    pub fn entries_under(&self, root: &ResourcePath) -> Vec<(ResourcePath, PendingValue)> {
        self.lock()
            .iter()
            .filter(|(path, _)| root.is_prefix_of(path))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect()
    }
}
