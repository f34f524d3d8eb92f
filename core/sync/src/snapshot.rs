//! In-memory client answering from a recorded working-copy snapshot.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use subsync_common::{Error, ResourcePath, Result};

use crate::client::{
    ClientCommand, ConflictChoice, DirEntry, LogEntry, NotifyBus, NotifyEvent, RawStatus,
    VersionControlClient,
};
use crate::remote::Revision;
use crate::status::StatusKind;

#[derive(Default)]
struct Snapshot {
    records: Vec<RawStatus>,
    listings: HashMap<String, Vec<DirEntry>>,
    contents: HashMap<String, Vec<u8>>,
    logs: HashMap<String, Vec<LogEntry>>,
    failure: Option<String>,
}

/// Version-control client backed by a fixed snapshot.
///
/// Status queries are answered from a list of raw status records, remote
/// queries from listings and contents registered per URL (the revision is
/// ignored). Resolving a conflict rewrites the affected record. Useful for
/// tests and for replaying status captured elsewhere.
pub struct SnapshotClient {
    snapshot: RwLock<Snapshot>,
    calls: Mutex<HashMap<&'static str, usize>>,
    bus: NotifyBus,
}

impl SnapshotClient {
    /// Create an empty client.
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            calls: Mutex::new(HashMap::new()),
            bus: NotifyBus::default(),
        }
    }

    /// Create a client answering status queries from `records`.
    pub fn from_records(records: Vec<RawStatus>) -> Self {
        let client = Self::new();
        if let Ok(mut snapshot) = client.snapshot.write() {
            snapshot.records = records;
        }
        client
    }

    /// Parse a JSON array of raw status records.
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<RawStatus> = serde_json::from_str(json)
            .map_err(|e| Error::Encoding(format!("Invalid status snapshot: {}", e)))?;
        Ok(Self::from_records(records))
    }

    /// Load a JSON snapshot file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Make every status query fail with `message` (or stop failing with `None`).
    pub fn set_failure(&self, message: Option<String>) -> Result<()> {
        self.write()?.failure = message;
        Ok(())
    }

    pub fn add_record(&self, record: RawStatus) -> Result<()> {
        self.write()?.records.push(record);
        Ok(())
    }

    pub fn add_listing(&self, url: Url, entries: Vec<DirEntry>) {
        if let Ok(mut snapshot) = self.write() {
            snapshot.listings.insert(url_key(&url), entries);
        }
    }

    pub fn add_contents(&self, url: Url, bytes: Vec<u8>) {
        if let Ok(mut snapshot) = self.write() {
            snapshot.contents.insert(url_key(&url), bytes);
        }
    }

    pub fn add_log(&self, url: Url, entries: Vec<LogEntry>) {
        if let Ok(mut snapshot) = self.write() {
            snapshot.logs.insert(url_key(&url), entries);
        }
    }

    /// How many times the named trait method was called.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    fn record_call(&self, method: &'static str, cancel: Option<&CancellationToken>) -> Result<()> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method)
            .or_insert(0) += 1;
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Snapshot>> {
        self.snapshot
            .read()
            .map_err(|_| Error::Client("snapshot poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Snapshot>> {
        self.snapshot
            .write()
            .map_err(|_| Error::Client("snapshot poisoned".to_string()))
    }
}

impl Default for SnapshotClient {
    fn default() -> Self {
        Self::new()
    }
}

fn url_key(url: &Url) -> String {
    url.as_str().trim_end_matches('/').to_string()
}

fn is_unmodified(record: &RawStatus) -> bool {
    matches!(record.text_status, StatusKind::Normal | StatusKind::None)
        && matches!(record.prop_status, StatusKind::Normal | StatusKind::None)
        && !record.tree_conflicted
        && !record.locked
}

fn resolved_status(status: StatusKind, choice: ConflictChoice) -> StatusKind {
    if status != StatusKind::Conflicted {
        return status;
    }
    match choice {
        ConflictChoice::Postpone => StatusKind::Conflicted,
        ConflictChoice::Base | ConflictChoice::TheirsFull => StatusKind::Normal,
        ConflictChoice::MineFull
        | ConflictChoice::TheirsConflict
        | ConflictChoice::MineConflict
        | ConflictChoice::Merged => StatusKind::Modified,
    }
}

#[async_trait]
impl VersionControlClient for SnapshotClient {
    fn name(&self) -> &str {
        "snapshot"
    }

    async fn status(
        &self,
        path: &ResourcePath,
        recursive: bool,
        include_unmodified: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<RawStatus>> {
        self.record_call("status", Some(cancel))?;
        self.bus.publish(NotifyEvent::CommandLine(format!(
            "status {}{}{}",
            if recursive { "" } else { "--depth immediates " },
            if include_unmodified { "--verbose " } else { "" },
            path
        )));

        let snapshot = self.read()?;
        if let Some(message) = &snapshot.failure {
            self.bus.publish(NotifyEvent::Error(message.clone()));
            return Err(Error::Client(message.clone()));
        }

        let statuses: Vec<RawStatus> = snapshot
            .records
            .iter()
            .filter(|r| {
                if recursive {
                    path.is_prefix_of(&r.path)
                } else {
                    &r.path == path || r.path.parent().as_ref() == Some(path)
                }
            })
            .filter(|r| include_unmodified || !is_unmodified(r))
            .cloned()
            .collect();

        for status in &statuses {
            self.bus.publish(NotifyEvent::Path {
                path: status.path.clone(),
                kind: status.node_kind,
            });
        }
        debug!("Snapshot status for {}: {} records", path, statuses.len());
        Ok(statuses)
    }

    async fn log_entries(
        &self,
        url: &Url,
        _revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogEntry>> {
        self.record_call("log", Some(cancel))?;
        self.bus.publish(NotifyEvent::Command(ClientCommand::Log));
        Ok(self.read()?.logs.get(&url_key(url)).cloned().unwrap_or_default())
    }

    async fn resolve(&self, path: &ResourcePath, choice: ConflictChoice) -> Result<()> {
        self.record_call("resolve", None)?;
        self.bus.publish(NotifyEvent::Command(ClientCommand::Resolve));

        let mut snapshot = self.write()?;
        let record = snapshot
            .records
            .iter_mut()
            .find(|r| &r.path == path)
            .ok_or_else(|| Error::NotFound(format!("{} is not under version control", path)))?;

        record.text_status = resolved_status(record.text_status, choice);
        record.prop_status = resolved_status(record.prop_status, choice);
        if choice != ConflictChoice::Postpone {
            record.tree_conflicted = false;
        }
        self.bus.publish(NotifyEvent::Completed(format!("resolve {} {}", choice, path)));
        Ok(())
    }

    async fn list(
        &self,
        url: &Url,
        _revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<Vec<DirEntry>> {
        self.record_call("list", Some(cancel))?;
        self.bus.publish(NotifyEvent::Command(ClientCommand::List));
        self.read()?
            .listings
            .get(&url_key(url))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No such directory: {}", url)))
    }

    async fn cat(
        &self,
        url: &Url,
        _revision: &Revision,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.record_call("cat", Some(cancel))?;
        self.bus.publish(NotifyEvent::Command(ClientCommand::Cat));
        self.read()?
            .contents
            .get(&url_key(url))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No such file: {}", url)))
    }

    fn notifications(&self) -> Option<&NotifyBus> {
        Some(&self.bus)
    }
}
