//! Local resource status model and its persisted encoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use subsync_common::{Error, RepositoryLocationId, ResourcePath, Result};

use crate::client::RawStatus;
use crate::remote::{RevisionIdentity, RevisionNumber};

/// Leading byte of every persisted status blob.
const FORMAT_VERSION: u8 = 1;

/// Kind of node a status describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    None,
    File,
    Directory,
    Unknown,
}

/// Working-copy status of a node's text or properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// No status reported.
    None,
    Unversioned,
    Normal,
    Added,
    Missing,
    Deleted,
    Replaced,
    Modified,
    Merged,
    Conflicted,
    Obstructed,
    Ignored,
    Incomplete,
    External,
}

impl StatusKind {
    /// Whether this status records a local difference from the base revision.
    pub fn is_change(self) -> bool {
        matches!(
            self,
            StatusKind::Added
                | StatusKind::Missing
                | StatusKind::Deleted
                | StatusKind::Replaced
                | StatusKind::Modified
                | StatusKind::Merged
                | StatusKind::Conflicted
                | StatusKind::Obstructed
        )
    }
}

/// Last known working-copy status of one resource.
///
/// Produced by converting a [`RawStatus`] from the version-control client and
/// persisted by the status cache as an opaque blob (see [`to_bytes`](Self::to_bytes)).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalResourceStatus {
    /// Workspace path the status describes.
    pub path: ResourcePath,
    /// Node kind.
    pub kind: NodeKind,
    /// Status of the node's contents.
    pub text_status: StatusKind,
    /// Status of the node's properties.
    pub prop_status: StatusKind,
    /// Repository URL of the node, if versioned.
    pub url: Option<Url>,
    /// Base revision of the working copy.
    pub revision: Option<RevisionNumber>,
    /// Revision in which the node last changed.
    pub last_changed_revision: Option<RevisionNumber>,
    /// Commit date of `last_changed_revision`.
    pub last_changed_date: Option<DateTime<Utc>>,
    /// Author of `last_changed_revision`.
    pub last_commit_author: Option<String>,
    /// Working-copy administrative lock held on the node.
    pub locked: bool,
    /// Node was added with history.
    pub copied: bool,
    /// Node is the victim of a tree conflict.
    pub tree_conflicted: bool,
}

impl LocalResourceStatus {
    /// Create a status with no repository information.
    pub fn new(path: ResourcePath, kind: NodeKind, text_status: StatusKind) -> Self {
        Self {
            path,
            kind,
            text_status,
            prop_status: StatusKind::None,
            url: None,
            revision: None,
            last_changed_revision: None,
            last_changed_date: None,
            last_commit_author: None,
            locked: false,
            copied: false,
            tree_conflicted: false,
        }
    }

    /// Combined version state derived from text and property statuses.
    ///
    /// A conflict on either side wins; property modifications surface as
    /// `Modified` on an otherwise normal node.
    pub fn version_state(&self) -> StatusKind {
        if self.has_conflict_marker() {
            return StatusKind::Conflicted;
        }
        match (self.text_status, self.prop_status) {
            (StatusKind::Normal, StatusKind::Modified | StatusKind::Merged) => {
                StatusKind::Modified
            }
            (text, _) => text,
        }
    }

    pub fn is_unversioned(&self) -> bool {
        self.text_status == StatusKind::Unversioned
    }

    pub fn is_ignored(&self) -> bool {
        self.text_status == StatusKind::Ignored
    }

    /// Whether the node is under version control.
    pub fn is_versioned(&self) -> bool {
        !matches!(
            self.text_status,
            StatusKind::None | StatusKind::Unversioned | StatusKind::Ignored
        )
    }

    pub fn is_added(&self) -> bool {
        matches!(self.text_status, StatusKind::Added | StatusKind::Replaced)
    }

    pub fn is_deleted(&self) -> bool {
        self.text_status == StatusKind::Deleted
    }

    pub fn is_missing(&self) -> bool {
        self.text_status == StatusKind::Missing
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_text_conflicted(&self) -> bool {
        self.text_status == StatusKind::Conflicted
    }

    pub fn is_prop_conflicted(&self) -> bool {
        self.prop_status == StatusKind::Conflicted
    }

    /// Whether a text, property or tree conflict is recorded on the node.
    pub fn has_conflict_marker(&self) -> bool {
        self.is_text_conflicted() || self.is_prop_conflicted() || self.tree_conflicted
    }

    /// Whether the node differs locally from its base revision.
    ///
    /// Unversioned nodes count as pending additions; ignored nodes do not.
    pub fn has_local_change(&self) -> bool {
        self.is_unversioned() || self.text_status.is_change() || self.prop_status.is_change()
    }

    /// Identity of the base revision the working copy was checked out at.
    ///
    /// Returns `None` for nodes without a repository URL.
    pub fn base_identity(&self, location: &RepositoryLocationId) -> Option<RevisionIdentity> {
        let url = self.url.as_ref()?;
        Some(RevisionIdentity::new(
            location.clone(),
            url.as_str(),
            self.last_changed_revision.or(self.revision),
        ))
    }

    /// Encode into the persisted blob: one format byte followed by JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![FORMAT_VERSION];
        serde_json::to_writer(&mut bytes, self)
            .map_err(|e| Error::Encoding(format!("Failed to encode status: {}", e)))?;
        Ok(bytes)
    }

    /// Decode a blob produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    /// - `Encoding` for empty input, an unknown format byte or a malformed payload
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (version, payload) = bytes
            .split_first()
            .ok_or_else(|| Error::Encoding("Empty status blob".to_string()))?;
        if *version != FORMAT_VERSION {
            return Err(Error::Encoding(format!(
                "Unsupported status format {}",
                version
            )));
        }
        serde_json::from_slice(payload)
            .map_err(|e| Error::Encoding(format!("Failed to decode status: {}", e)))
    }
}

fn revision_from_raw(raw: i64) -> Option<RevisionNumber> {
    u64::try_from(raw).ok().map(RevisionNumber::new)
}

impl From<RawStatus> for LocalResourceStatus {
    fn from(raw: RawStatus) -> Self {
        let url = raw.url.as_deref().and_then(|u| match Url::parse(u) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Ignoring malformed URL {:?} for {}: {}", u, raw.path, e);
                None
            }
        });

        Self {
            url,
            revision: revision_from_raw(raw.revision),
            last_changed_revision: revision_from_raw(raw.last_changed_revision),
            last_changed_date: raw.last_changed_date,
            last_commit_author: raw.last_commit_author,
            kind: raw.node_kind,
            text_status: raw.text_status,
            prop_status: raw.prop_status,
            locked: raw.locked,
            copied: raw.copied,
            tree_conflicted: raw.tree_conflicted,
            path: raw.path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn versioned(path: &str, text: StatusKind) -> LocalResourceStatus {
        let mut status = LocalResourceStatus::new(p(path), NodeKind::File, text);
        status.url = Some(Url::parse("https://svn.example.com/repo/trunk/a.txt").unwrap());
        status.revision = Some(RevisionNumber::new(12));
        status.last_changed_revision = Some(RevisionNumber::new(10));
        status
    }

    #[test]
    fn test_bytes_round_trip() {
        let mut status = versioned("/project/a.txt", StatusKind::Modified);
        status.last_commit_author = Some("alice".to_string());
        status.last_changed_date = Some(Utc::now());

        let bytes = status.to_bytes().unwrap();
        assert_eq!(bytes[0], FORMAT_VERSION);
        assert_eq!(LocalResourceStatus::from_bytes(&bytes).unwrap(), status);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(matches!(
            LocalResourceStatus::from_bytes(&[]),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(
            LocalResourceStatus::from_bytes(&[9, b'{', b'}']),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(
            LocalResourceStatus::from_bytes(&[FORMAT_VERSION, b'n', b'o']),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_version_state() {
        let mut status = versioned("/a", StatusKind::Normal);
        assert_eq!(status.version_state(), StatusKind::Normal);
        assert!(!status.has_local_change());

        status.prop_status = StatusKind::Modified;
        assert_eq!(status.version_state(), StatusKind::Modified);
        assert!(status.has_local_change());

        status.tree_conflicted = true;
        assert_eq!(status.version_state(), StatusKind::Conflicted);
        assert!(status.has_conflict_marker());
    }

    #[test]
    fn test_unversioned_and_ignored() {
        let unversioned = LocalResourceStatus::new(p("/new.txt"), NodeKind::File, StatusKind::Unversioned);
        assert!(unversioned.is_unversioned());
        assert!(!unversioned.is_versioned());
        assert!(unversioned.has_local_change());

        let ignored = LocalResourceStatus::new(p("/target"), NodeKind::Directory, StatusKind::Ignored);
        assert!(!ignored.is_versioned());
        assert!(!ignored.has_local_change());
    }

    #[test]
    fn test_base_identity_prefers_last_changed() {
        let location = RepositoryLocationId::new("main").unwrap();
        let status = versioned("/a", StatusKind::Normal);
        let base = status.base_identity(&location).unwrap();
        assert_eq!(base.revision(), Some(RevisionNumber::new(10)));
        assert_eq!(base.path(), "https://svn.example.com/repo/trunk/a.txt");

        let unversioned = LocalResourceStatus::new(p("/b"), NodeKind::File, StatusKind::Unversioned);
        assert!(unversioned.base_identity(&location).is_none());
    }

    #[test]
    fn test_from_raw_maps_invalid_revisions() {
        let raw = RawStatus {
            path: p("/project/a.txt"),
            node_kind: NodeKind::File,
            text_status: StatusKind::Added,
            prop_status: StatusKind::None,
            url: Some("not a url".to_string()),
            revision: -1,
            last_changed_revision: 7,
            last_changed_date: None,
            last_commit_author: None,
            locked: false,
            copied: true,
            tree_conflicted: false,
        };

        let status = LocalResourceStatus::from(raw);
        assert_eq!(status.revision, None);
        assert_eq!(status.last_changed_revision, Some(RevisionNumber::new(7)));
        assert_eq!(status.url, None);
        assert!(status.copied);
        assert!(status.is_added());
    }
}
