//! Common types shared by the SubSync crates.
//!
//! Everything that crosses a crate boundary (paths, repository identifiers and
//! the error taxonomy) lives here so the storage and sync layers agree on them.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{RepositoryLocationId, ResourcePath};
