//! SubSync status cache and sync-info reconciliation.
//!
//! This crate keeps the last known version-control status of every workspace
//! resource and classifies resources against their remote counterparts:
//! - Lock-aware status cache with a pending-write overlay
//! - Status fetching through a pluggable version-control client
//! - Three-way reconciliation into sync verdicts
//! - Remote resource model and remote contents cache
//! - Conflict resolution with status refresh

pub mod cache;
pub mod client;
pub mod content;
pub mod fetch;
pub mod manager;
pub mod pending;
pub mod reconcile;
pub mod registry;
pub mod remote;
pub mod resolve;
pub mod snapshot;
pub mod status;

// Re-export main types
pub use cache::StatusCache;
pub use client::{
    ClientCommand, ConflictChoice, DirEntry, LogEntry, NotifyBus, NotifyEvent, RawStatus,
    VersionControlClient,
};
pub use content::RemoteResourceCache;
pub use fetch::StatusFetcher;
pub use manager::{CacheConfig, ShutdownReport, StatusCacheManager};
pub use pending::{PendingValue, PendingWrites};
pub use reconcile::{SyncInfo, SyncInfoReconciler, SyncVerdict};
pub use registry::ClientRegistry;
pub use remote::{
    RemoteFile, RemoteFolder, RemoteResource, RemoteResourceDescriptor, RepositoryLocation,
    Revision, RevisionIdentity, RevisionNumber,
};
pub use resolve::ResolveOperation;
pub use snapshot::SnapshotClient;
pub use status::{LocalResourceStatus, NodeKind, StatusKind};
