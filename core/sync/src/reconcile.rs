//! Three-way reconciliation of local status, base and remote revisions.

use serde::{Deserialize, Serialize};
use std::fmt;

use subsync_common::{RepositoryLocationId, ResourcePath};

use crate::cache::StatusCache;
use crate::remote::{RemoteResource, RevisionIdentity};
use crate::status::LocalResourceStatus;

/// Synchronization state of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncVerdict {
    /// No local change and the remote matches the base.
    InSync,
    /// Local change on top of an unchanged remote.
    OutgoingChange,
    /// Remote moved on while the local copy is unchanged.
    IncomingChange,
    /// Both sides changed, or a conflict is recorded locally.
    Conflicting,
}

impl SyncVerdict {
    pub fn is_outgoing(self) -> bool {
        matches!(self, SyncVerdict::OutgoingChange | SyncVerdict::Conflicting)
    }

    pub fn is_incoming(self) -> bool {
        matches!(self, SyncVerdict::IncomingChange | SyncVerdict::Conflicting)
    }
}

impl fmt::Display for SyncVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncVerdict::InSync => "in-sync",
            SyncVerdict::OutgoingChange => "outgoing",
            SyncVerdict::IncomingChange => "incoming",
            SyncVerdict::Conflicting => "conflicting",
        };
        write!(f, "{}", name)
    }
}

/// Combines a resource's local status with its base and remote revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncInfoReconciler;

impl SyncInfoReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Classify one resource.
    ///
    /// | local        | remote vs base | verdict     |
    /// |--------------|----------------|-------------|
    /// | unchanged    | equal          | InSync      |
    /// | changed      | equal          | Outgoing    |
    /// | unchanged    | different      | Incoming    |
    /// | changed      | different      | Conflicting |
    ///
    /// A recorded conflict always yields `Conflicting`. An absent local status
    /// counts as unchanged; absent identities compare equal only to each other.
    pub fn reconcile(
        &self,
        local: Option<&LocalResourceStatus>,
        remote: Option<&RevisionIdentity>,
        base: Option<&RevisionIdentity>,
    ) -> SyncVerdict {
        if local.is_some_and(LocalResourceStatus::has_conflict_marker) {
            return SyncVerdict::Conflicting;
        }

        let local_changed = local.is_some_and(LocalResourceStatus::has_local_change);
        let remote_changed = remote != base;

        match (local_changed, remote_changed) {
            (false, false) => SyncVerdict::InSync,
            (true, false) => SyncVerdict::OutgoingChange,
            (false, true) => SyncVerdict::IncomingChange,
            (true, true) => SyncVerdict::Conflicting,
        }
    }
}

/// Everything known about one resource's synchronization state.
#[derive(Debug, Clone)]
pub struct SyncInfo {
    pub path: ResourcePath,
    pub local: Option<LocalResourceStatus>,
    pub base: Option<RevisionIdentity>,
    pub remote: Option<RevisionIdentity>,
    pub verdict: SyncVerdict,
}

impl SyncInfo {
    /// Reconcile the cached status of `path` against `remote`.
    ///
    /// The base identity comes from the cached status's URL and last-changed
    /// revision. With no remote counterpart, a versioned base reads as an
    /// incoming deletion.
    pub fn compute(
        path: &ResourcePath,
        cache: &StatusCache,
        location: &RepositoryLocationId,
        remote: Option<&RemoteResource>,
        reconciler: &SyncInfoReconciler,
    ) -> Self {
        let local = cache.get_status(path);
        let base = local.as_ref().and_then(|s| s.base_identity(location));
        let remote = remote.map(RemoteResource::identity);
        let verdict = reconciler.reconcile(local.as_ref(), remote.as_ref(), base.as_ref());

        Self {
            path: path.clone(),
            local,
            base,
            remote,
            verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RepositoryLocation, RevisionNumber};
    use crate::status::{NodeKind, StatusKind};
    use std::sync::Arc;
    use subsync_storage::{MemoryResourceTree, SyncKey};
    use url::Url;

    const URL: &str = "https://svn.example.com/repo/trunk/a.txt";

    fn location() -> RepositoryLocationId {
        RepositoryLocationId::new("main").unwrap()
    }

    fn identity(revision: u64) -> RevisionIdentity {
        RevisionIdentity::new(location(), URL, Some(RevisionNumber::new(revision)))
    }

    fn status(text: StatusKind) -> LocalResourceStatus {
        let mut status = LocalResourceStatus::new(
            ResourcePath::parse("/project/a.txt").unwrap(),
            NodeKind::File,
            text,
        );
        status.url = Some(Url::parse(URL).unwrap());
        status.last_changed_revision = Some(RevisionNumber::new(5));
        status
    }

    #[test]
    fn test_truth_table() {
        let reconciler = SyncInfoReconciler::new();
        let base = identity(5);
        let same = identity(5);
        let newer = identity(8);

        let cases = [
            (StatusKind::Normal, &same, false, SyncVerdict::InSync),
            (StatusKind::Modified, &same, false, SyncVerdict::OutgoingChange),
            (StatusKind::Normal, &newer, false, SyncVerdict::IncomingChange),
            (StatusKind::Modified, &newer, false, SyncVerdict::Conflicting),
            (StatusKind::Normal, &same, true, SyncVerdict::Conflicting),
            (StatusKind::Modified, &same, true, SyncVerdict::Conflicting),
            (StatusKind::Normal, &newer, true, SyncVerdict::Conflicting),
            (StatusKind::Modified, &newer, true, SyncVerdict::Conflicting),
        ];

        for (text, remote, conflicted, expected) in cases {
            let mut local = status(text);
            local.tree_conflicted = conflicted;
            assert_eq!(
                reconciler.reconcile(Some(&local), Some(remote), Some(&base)),
                expected,
                "text={:?} remote={} conflicted={}",
                text,
                remote,
                conflicted
            );
        }
    }

    #[test]
    fn test_text_and_property_conflicts_win() {
        let reconciler = SyncInfoReconciler::new();
        let base = identity(5);
        assert_eq!(
            reconciler.reconcile(Some(&status(StatusKind::Conflicted)), Some(&base), Some(&base)),
            SyncVerdict::Conflicting
        );

        let mut prop = status(StatusKind::Normal);
        prop.prop_status = StatusKind::Conflicted;
        assert_eq!(
            reconciler.reconcile(Some(&prop), Some(&base), Some(&base)),
            SyncVerdict::Conflicting
        );
    }

    #[test]
    fn test_absent_inputs() {
        let reconciler = SyncInfoReconciler::new();
        assert_eq!(reconciler.reconcile(None, None, None), SyncVerdict::InSync);
        assert_eq!(
            reconciler.reconcile(None, Some(&identity(1)), None),
            SyncVerdict::IncomingChange
        );
        assert_eq!(
            reconciler.reconcile(Some(&status(StatusKind::Normal)), None, Some(&identity(5))),
            SyncVerdict::IncomingChange
        );
    }

    #[test]
    fn test_location_is_not_compared() {
        let reconciler = SyncInfoReconciler::new();
        let base = identity(5);
        let remote = RevisionIdentity::new(
            RepositoryLocationId::new("mirror").unwrap(),
            URL,
            Some(RevisionNumber::new(5)),
        );
        assert_eq!(
            reconciler.reconcile(Some(&status(StatusKind::Normal)), Some(&remote), Some(&base)),
            SyncVerdict::InSync
        );
    }

    #[test]
    fn test_verdict_direction() {
        assert!(SyncVerdict::Conflicting.is_outgoing());
        assert!(SyncVerdict::Conflicting.is_incoming());
        assert!(!SyncVerdict::InSync.is_incoming());
        assert_eq!(SyncVerdict::OutgoingChange.to_string(), "outgoing");
    }

    #[test]
    fn test_sync_info_outgoing_change() {
        let tree = Arc::new(MemoryResourceTree::new());
        let path = ResourcePath::parse("/project/a.txt").unwrap();
        tree.add_resource(&path).unwrap();
        let cache = StatusCache::new(tree, SyncKey::default());
        cache.add_status(&status(StatusKind::Modified));

        let repository = Arc::new(RepositoryLocation::new(
            location(),
            Url::parse("https://svn.example.com/repo").unwrap(),
        ));
        let remote = RemoteResource::from_bytes(
            repository,
            Url::parse(URL).unwrap(),
            false,
            b"5",
        )
        .unwrap();

        let info = SyncInfo::compute(
            &path,
            &cache,
            &location(),
            Some(&remote),
            &SyncInfoReconciler::new(),
        );
        assert_eq!(info.verdict, SyncVerdict::OutgoingChange);
        assert_eq!(info.base, info.remote);
        assert!(info.local.is_some());
    }

    #[test]
    fn test_sync_info_incoming_delete() {
        let tree = Arc::new(MemoryResourceTree::new());
        let path = ResourcePath::parse("/project/a.txt").unwrap();
        tree.add_resource(&path).unwrap();
        let cache = StatusCache::new(tree, SyncKey::default());
        cache.add_status(&status(StatusKind::Normal));

        let info = SyncInfo::compute(&path, &cache, &location(), None, &SyncInfoReconciler::new());
        assert_eq!(info.verdict, SyncVerdict::IncomingChange);
        assert!(info.remote.is_none());
    }
}
