//! Registry resolving repository locations to their clients.

use std::collections::HashMap;
use std::sync::Arc;

use subsync_common::{Error, RepositoryLocationId, Result};

use crate::client::VersionControlClient;

/// Maps each configured repository location to the client that serves it.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<RepositoryLocationId, Arc<dyn VersionControlClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the client for `location`.
    ///
    /// # Errors
    /// - `InvalidInput` if `location` already has a client
    pub fn register(
        &mut self,
        location: RepositoryLocationId,
        client: Arc<dyn VersionControlClient>,
    ) -> Result<()> {
        if self.clients.contains_key(&location) {
            return Err(Error::InvalidInput(format!(
                "Repository location '{}' already has a client",
                location
            )));
        }
        self.clients.insert(location, client);
        Ok(())
    }

    /// Client serving `location`.
    ///
    /// # Errors
    /// - `NotFound` if nothing is registered for `location`
    pub fn resolve(&self, location: &RepositoryLocationId) -> Result<Arc<dyn VersionControlClient>> {
        self.clients.get(location).cloned().ok_or_else(|| {
            Error::NotFound(format!("No client for repository location '{}'", location))
        })
    }

    pub fn locations(&self) -> Vec<RepositoryLocationId> {
        self.clients.keys().cloned().collect()
    }

    pub fn has_location(&self, location: &RepositoryLocationId) -> bool {
        self.clients.contains_key(location)
    }
}
