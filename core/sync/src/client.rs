//! Version-control client capability consumed by the sync layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

use subsync_common::{ResourcePath, Result};

use crate::remote::{Revision, RevisionNumber};
use crate::status::{NodeKind, StatusKind};

/// Revision value adapters use for "no revision".
pub const INVALID_REVISION: i64 = -1;

fn invalid_revision() -> i64 {
    INVALID_REVISION
}

/// Status record as reported by a client adapter.
///
/// Revisions are signed; negative values mean the adapter had none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStatus {
    pub path: ResourcePath,
    pub node_kind: NodeKind,
    pub text_status: StatusKind,
    #[serde(default = "default_prop_status")]
    pub prop_status: StatusKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "invalid_revision")]
    pub revision: i64,
    #[serde(default = "invalid_revision")]
    pub last_changed_revision: i64,
    #[serde(default)]
    pub last_changed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_commit_author: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub copied: bool,
    #[serde(default)]
    pub tree_conflicted: bool,
}

fn default_prop_status() -> StatusKind {
    StatusKind::None
}

/// One commit in a resource's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub revision: RevisionNumber,
    pub author: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message: String,
}

impl LogEntry {
    pub fn new(revision: RevisionNumber, author: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            revision,
            author: Some(author.into()),
            date: None,
            message: message.into(),
        }
    }
}

/// One child of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
    pub last_changed_revision: Option<RevisionNumber>,
    pub last_changed_date: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

impl DirEntry {
    pub fn new(
        name: impl Into<String>,
        kind: NodeKind,
        last_changed_revision: Option<RevisionNumber>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            last_changed_revision,
            last_changed_date: None,
            author: None,
        }
    }
}

/// Which version wins when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Leave the conflict in place.
    Postpone,
    /// Use the common ancestor.
    Base,
    /// Take the incoming file entirely.
    TheirsFull,
    /// Keep the local file entirely.
    MineFull,
    /// Take incoming hunks where they conflict.
    TheirsConflict,
    /// Keep local hunks where they conflict.
    MineConflict,
    /// Accept the working copy as merged by the user.
    Merged,
}

impl fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictChoice::Postpone => "postpone",
            ConflictChoice::Base => "base",
            ConflictChoice::TheirsFull => "theirs-full",
            ConflictChoice::MineFull => "mine-full",
            ConflictChoice::TheirsConflict => "theirs-conflict",
            ConflictChoice::MineConflict => "mine-conflict",
            ConflictChoice::Merged => "working",
        };
        write!(f, "{}", name)
    }
}

/// Client command named in notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    Status,
    Log,
    Resolve,
    List,
    Cat,
}

/// Progress event emitted by a client while it works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    /// A command started.
    Command(ClientCommand),
    /// Command line equivalent of the running command.
    CommandLine(String),
    /// Informational message.
    Message(String),
    /// Error reported by the client.
    Error(String),
    /// Revision reached by the command.
    Revision(RevisionNumber),
    /// A command finished.
    Completed(String),
    /// A path was touched.
    Path { path: ResourcePath, kind: NodeKind },
}

/// Fan-out channel for [`NotifyEvent`]s with any number of subscribers.
#[derive(Debug, Clone)]
pub struct NotifyBus {
    sender: broadcast::Sender<NotifyEvent>,
}

impl NotifyBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotifyEvent> {
        self.sender.subscribe()
    }

    /// Publish `event` and return how many subscribers received it.
    pub fn publish(&self, event: NotifyEvent) -> usize {
        // Sending with no receivers fails; that only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotifyBus {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Version-control client used to query and mutate working copies.
///
/// Implementations check `cancel` at their own pace and return
/// `Error::Cancelled` once it fires.
#[async_trait]
pub trait VersionControlClient: Send + Sync {
    /// Adapter name (e.g. "snapshot").
    fn name(&self) -> &str;

    /// Working-copy status of `path`, and of its descendants if `recursive`.
    ///
    /// Unmodified nodes are only reported when `include_unmodified` is set.
    async fn status(
        &self,
        path: &ResourcePath,
        recursive: bool,
        include_unmodified: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawStatus>>;

    /// History of `url` up to `revision`, newest first.
    async fn log_entries(
        &self,
        url: &Url,
        revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogEntry>>;

    /// Mark the conflict on `path` resolved using `choice`.
    async fn resolve(&self, path: &ResourcePath, choice: ConflictChoice) -> Result<()>;

    /// Children of the directory at `url`.
    ///
    /// # Errors
    /// - `NotFound` if nothing exists at `url` in `revision`
    async fn list(
        &self,
        url: &Url,
        revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirEntry>>;

    /// Contents of the file at `url`.
    async fn cat(&self, url: &Url, revision: &Revision, cancel: &CancellationToken)
        -> Result<Vec<u8>>;

    /// Event stream of this client, if it reports progress.
    fn notifications(&self) -> Option<&NotifyBus> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bus_fans_out() {
        let bus = NotifyBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        assert_eq!(bus.publish(NotifyEvent::Command(ClientCommand::Status)), 2);
        assert_eq!(first.recv().await.unwrap(), NotifyEvent::Command(ClientCommand::Status));
        assert_eq!(second.recv().await.unwrap(), NotifyEvent::Command(ClientCommand::Status));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = NotifyBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(NotifyEvent::Message("hello".to_string())), 0);
    }

    #[test]
    fn test_raw_status_defaults() {
        let raw: RawStatus = serde_json::from_str(
            r#"{"path": "/project/a.txt", "node_kind": "file", "text_status": "unversioned"}"#,
        )
        .unwrap();
        assert_eq!(raw.revision, INVALID_REVISION);
        assert_eq!(raw.prop_status, StatusKind::None);
        assert!(raw.url.is_none());
        assert!(!raw.tree_conflicted);
    }

    #[test]
    fn test_conflict_choice_display() {
        assert_eq!(ConflictChoice::Merged.to_string(), "working");
        assert_eq!(ConflictChoice::TheirsFull.to_string(), "theirs-full");
    }
}
