//! Error taxonomy for SubSync.

use thiserror::Error;

/// Top-level error type for SubSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing-store (resource tree sidecar) operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted blob could not be encoded or decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The version-control client reported a failure.
    #[error("Client error: {0}")]
    Client(String),

    /// A status fetch failed; the cache was left untouched.
    #[error("Status fetch failed for {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation not permitted right now (e.g. the resource tree is locked).
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap a client-side failure for the given path into a fetch error.
    pub fn fetch(path: impl Into<String>, source: Error) -> Self {
        Self::Fetch {
            path: path.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error means the target does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error means the store refused a write because it is locked.
    pub fn is_not_permitted(&self) -> bool {
        matches!(self, Self::NotPermitted(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_fetch_error_keeps_cause() {
        let err = Error::fetch("/project/src", Error::Client("connection refused".to_string()));

        assert_eq!(
            err.to_string(),
            "Status fetch failed for /project/src: Client error: connection refused"
        );
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "Client error: connection refused");
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::NotFound("x".to_string()).is_not_found());
        assert!(!Error::Storage("x".to_string()).is_not_found());
        assert!(Error::NotPermitted("locked".to_string()).is_not_permitted());
    }
}
