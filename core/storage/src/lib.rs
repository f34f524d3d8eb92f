//! Resource-tree sidecar storage for SubSync.
//!
//! The status cache persists its entries in the host workspace's resource tree:
//! a per-resource key/value side table that can be write-locked by unrelated
//! bulk operations. This crate defines that capability and two backends.
//!
//! # Design Principles
//! - The tree is the single source of truth for persisted sync info
//! - Lock state is observable but owned by the host, never cached by callers
//! - Writes are whole-value replacements; readers never see partial values

pub mod local;
pub mod memory;
pub mod tree;

pub use local::LocalResourceTree;
pub use memory::MemoryResourceTree;
pub use tree::{Depth, ResourceTree, SyncKey};
