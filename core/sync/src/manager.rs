//! Cache configuration and the context object owning the caches.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use subsync_common::{Error, RepositoryLocationId, ResourcePath, Result};
use subsync_storage::{ResourceTree, SyncKey};

use crate::cache::StatusCache;
use crate::content::RemoteResourceCache;
use crate::reconcile::{SyncInfo, SyncInfoReconciler};
use crate::remote::RemoteResource;
use crate::status::LocalResourceStatus;

/// Configuration for the status cache manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Key the status cache stores its entries under.
    pub sync_key: SyncKey,
    /// Clear a subtree before installing a recursive refresh of it.
    pub replace_subtree_on_refresh: bool,
    /// Remote contents kept in memory.
    pub remote_cache_max_entries: usize,
    /// Directory remote contents are spilled to, if any.
    pub remote_cache_dir: Option<PathBuf>,
    /// Drain pending writes on shutdown.
    pub flush_on_shutdown: bool,
    /// Upper bound on writes drained during shutdown.
    pub max_shutdown_flushes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sync_key: SyncKey::default(),
            replace_subtree_on_refresh: true,
            remote_cache_max_entries: 256,
            remote_cache_dir: None,
            flush_on_shutdown: true,
            max_shutdown_flushes: 10_000,
        }
    }
}

impl CacheConfig {
    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Encoding(e.to_string()))
    }

    /// Deserialize configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Encoding(e.to_string()))
    }
}

/// Outcome of [`StatusCacheManager::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pending writes flushed during shutdown.
    pub flushed: usize,
    /// Pending writes left behind.
    pub remaining: usize,
}

/// Owns the status cache, the remote contents cache and the reconciler.
///
/// Created once per workspace with [`create`](Self::create) and shared as an
/// `Arc`. [`shutdown`](Self::shutdown) cancels in-flight work started with
/// [`cancellation_token`](Self::cancellation_token) and drains pending writes.
pub struct StatusCacheManager {
    config: CacheConfig,
    status_cache: Arc<StatusCache>,
    remote_cache: Arc<RemoteResourceCache>,
    reconciler: SyncInfoReconciler,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl StatusCacheManager {
    /// Create the caches over `tree`.
    ///
    /// # Errors
    /// - I/O error creating the remote cache directory
    pub fn create(tree: Arc<dyn ResourceTree>, config: CacheConfig) -> Result<Arc<Self>> {
        let remote_cache = match &config.remote_cache_dir {
            Some(dir) => RemoteResourceCache::with_spill_dir(config.remote_cache_max_entries, dir)?,
            None => RemoteResourceCache::new(config.remote_cache_max_entries),
        };
        info!(
            "Status cache created over {} tree (key {})",
            tree.name(),
            config.sync_key
        );

        Ok(Arc::new(Self {
            status_cache: Arc::new(StatusCache::new(tree, config.sync_key.clone())),
            remote_cache: Arc::new(remote_cache),
            reconciler: SyncInfoReconciler::new(),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
            config,
        }))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn status_cache(&self) -> &Arc<StatusCache> {
        &self.status_cache
    }

    pub fn remote_cache(&self) -> &Arc<RemoteResourceCache> {
        &self.remote_cache
    }

    pub fn reconciler(&self) -> &SyncInfoReconciler {
        &self.reconciler
    }

    /// Token that fires when the manager shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Install statuses fetched for `root`.
    ///
    /// A recursive refresh replaces the whole subtree when
    /// `replace_subtree_on_refresh` is set, so entries for nodes that vanished
    /// from the working copy do not linger.
    ///
    /// # Errors
    /// - `NotPermitted` after shutdown
    pub fn install_statuses(
        &self,
        statuses: &[LocalResourceStatus],
        root: &ResourcePath,
        recursive: bool,
    ) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::NotPermitted("status cache is shut down".to_string()));
        }
        if recursive && self.config.replace_subtree_on_refresh {
            if let Err(e) = self.status_cache.purge_cache(root, true) {
                warn!("Failed to clear {} before refresh: {}", root, e);
            }
        }
        self.status_cache.set_statuses(statuses, root);
        Ok(())
    }

    /// Synchronization state of `path` against `remote`.
    pub fn sync_info(
        &self,
        path: &ResourcePath,
        location: &RepositoryLocationId,
        remote: Option<&RemoteResource>,
    ) -> SyncInfo {
        SyncInfo::compute(path, &self.status_cache, location, remote, &self.reconciler)
    }

    /// Stop the manager.
    ///
    /// Cancels every token handed out by
    /// [`cancellation_token`](Self::cancellation_token), then flushes pending
    /// writes one at a time while the tree stays unlocked, up to
    /// `max_shutdown_flushes`. Calling it again only reports what is left.
    pub fn shutdown(&self) -> ShutdownReport {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        self.shutdown.cancel();

        let mut flushed = 0;
        if first && self.config.flush_on_shutdown {
            while flushed < self.config.max_shutdown_flushes
                && self.status_cache.flush_pending_cache_writes()
            {
                flushed += 1;
            }
        }

        let remaining = self.status_cache.pending_count();
        if first {
            if remaining > 0 {
                warn!("Status cache shut down with {} pending writes", remaining);
            } else {
                info!("Status cache shut down ({} pending writes flushed)", flushed);
            }
        }
        ShutdownReport { flushed, remaining }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{NodeKind, StatusKind};
    use subsync_storage::MemoryResourceTree;
    use tempfile::TempDir;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn status(path: &str) -> LocalResourceStatus {
        LocalResourceStatus::new(p(path), NodeKind::File, StatusKind::Modified)
    }

    fn setup(config: CacheConfig) -> (Arc<MemoryResourceTree>, Arc<StatusCacheManager>) {
        let tree = Arc::new(MemoryResourceTree::new());
        for s in ["/src/a", "/src/b", "/src/stale"] {
            tree.add_resource(&p(s)).unwrap();
        }
        let manager = StatusCacheManager::create(tree.clone(), config).unwrap();
        (tree, manager)
    }

    #[test]
    fn test_config_defaults_and_json() {
        let config = CacheConfig::default();
        assert!(config.replace_subtree_on_refresh);
        assert_eq!(config.remote_cache_max_entries, 256);
        assert_eq!(config.max_shutdown_flushes, 10_000);

        let json = config.to_json().unwrap();
        assert_eq!(CacheConfig::from_json(&json).unwrap(), config);

        let partial = CacheConfig::from_json(r#"{"flush_on_shutdown": false}"#).unwrap();
        assert!(!partial.flush_on_shutdown);
        assert_eq!(partial.sync_key, SyncKey::default());
    }

    #[test]
    fn test_recursive_install_replaces_subtree() {
        let (_tree, manager) = setup(CacheConfig::default());
        let cache = manager.status_cache();
        cache.add_status(&status("/src/stale"));

        manager
            .install_statuses(&[status("/src/a"), status("/src/b")], &p("/src"), true)
            .unwrap();
        assert!(cache.get_status(&p("/src/stale")).is_none());
        assert!(cache.get_status(&p("/src/a")).is_some());
    }

    #[test]
    fn test_install_keeps_subtree_when_disabled() {
        let config = CacheConfig {
            replace_subtree_on_refresh: false,
            ..CacheConfig::default()
        };
        let (_tree, manager) = setup(config);
        let cache = manager.status_cache();
        cache.add_status(&status("/src/stale"));

        manager
            .install_statuses(&[status("/src/a")], &p("/src"), true)
            .unwrap();
        assert!(cache.get_status(&p("/src/stale")).is_some());
    }

    #[test]
    fn test_non_recursive_install_keeps_siblings() {
        let (_tree, manager) = setup(CacheConfig::default());
        let cache = manager.status_cache();
        cache.add_status(&status("/src/stale"));

        manager
            .install_statuses(&[status("/src/a")], &p("/src/a"), false)
            .unwrap();
        assert!(cache.get_status(&p("/src/stale")).is_some());
    }

    #[test]
    fn test_shutdown_drains_and_cancels() {
        let (tree, manager) = setup(CacheConfig::default());
        let token = manager.cancellation_token();
        tree.set_locked(true);
        for s in ["/src/a", "/src/b"] {
            manager.status_cache().add_status(&status(s));
        }
        tree.set_locked(false);

        let report = manager.shutdown();
        assert_eq!(report, ShutdownReport { flushed: 2, remaining: 0 });
        assert!(token.is_cancelled());
        assert!(manager.is_shut_down());

        let err = manager
            .install_statuses(&[status("/src/a")], &p("/src"), true)
            .unwrap_err();
        assert!(err.is_not_permitted());
        assert_eq!(manager.shutdown().flushed, 0);
    }

    #[test]
    fn test_shutdown_is_bounded() {
        let config = CacheConfig {
            max_shutdown_flushes: 1,
            ..CacheConfig::default()
        };
        let (tree, manager) = setup(config);
        tree.set_locked(true);
        for s in ["/src/a", "/src/b"] {
            manager.status_cache().add_status(&status(s));
        }
        tree.set_locked(false);

        assert_eq!(manager.shutdown(), ShutdownReport { flushed: 1, remaining: 1 });
    }

    #[test]
    fn test_remote_cache_dir_created() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("remote");
        let config = CacheConfig {
            remote_cache_dir: Some(dir.clone()),
            ..CacheConfig::default()
        };
        let (_tree, _manager) = setup(config);
        assert!(dir.is_dir());
    }
}
