//! Resource tree trait definition.

use serde::{Deserialize, Serialize};
use std::fmt;

use subsync_common::{ResourcePath, Result};

/// Key partitioning the sync-info side table between independent clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncKey(String);

impl SyncKey {
    /// Key used by the status cache unless configured otherwise.
    pub const DEFAULT: &'static str = "subsync.status";

    /// Create a key from a qualified name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SyncKey {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How far below a root an operation reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Depth {
    /// Only the root itself.
    Zero,
    /// The root and its direct children.
    One,
    /// The root and everything below it.
    Infinite,
}

impl Depth {
    /// Whether `path` lies within `depth` of `root`.
    pub fn covers(self, root: &ResourcePath, path: &ResourcePath) -> bool {
        if !root.is_prefix_of(path) {
            return false;
        }
        let below = path.components().len() - root.components().len();
        match self {
            Depth::Zero => below == 0,
            Depth::One => below <= 1,
            Depth::Infinite => true,
        }
    }
}

/// Host workspace resource tree with a per-resource sync-info side table.
///
/// Implementations must be safe to call from any thread. The tree may be
/// write-locked by an unrelated operation at any time; while it is locked,
/// mutating calls fail with `Error::NotPermitted` and callers are expected to
/// defer their writes. Lock state can change between a call to
/// [`is_locked`](Self::is_locked) and the next mutation.
pub trait ResourceTree: Send + Sync {
    /// Backend name (e.g. "memory", "local").
    fn name(&self) -> &str;

    /// Whether the tree currently refuses mutations.
    fn is_locked(&self) -> bool;

    /// Whether a resource exists at `path`.
    fn exists(&self, path: &ResourcePath) -> bool;

    /// Whether `path` no longer exists but sync info is still stored for it
    /// or for anything below it.
    fn is_phantom(&self, path: &ResourcePath) -> bool;

    /// Read the sync info stored under `key` for `path`.
    ///
    /// Returns `Ok(None)` when nothing is stored.
    fn sync_info(&self, key: &SyncKey, path: &ResourcePath) -> Result<Option<Vec<u8>>>;

    /// Replace (or clear, with `None`) the sync info stored under `key` for `path`.
    ///
    /// # Errors
    /// - `NotPermitted` while the tree is locked
    /// - `Storage`/`Io` on backend failure
    fn set_sync_info(&self, key: &SyncKey, path: &ResourcePath, bytes: Option<&[u8]>)
        -> Result<()>;

    /// Clear all sync info under `key` within `depth` of `root`.
    ///
    /// # Errors
    /// - `NotFound` if `root` neither exists nor is a phantom
    /// - `NotPermitted` while the tree is locked
    fn flush_sync_info(&self, key: &SyncKey, root: &ResourcePath, depth: Depth) -> Result<()>;

    /// Paths within `depth` of `root` that carry sync info under `key`.
    fn sync_info_paths(
        &self,
        key: &SyncKey,
        root: &ResourcePath,
        depth: Depth,
    ) -> Result<Vec<ResourcePath>>;
}
