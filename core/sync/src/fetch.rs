//! Fetching working-copy status through a client into the status cache.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use subsync_common::{Error, ResourcePath, Result};

use crate::client::{ClientCommand, NotifyEvent};
use crate::manager::StatusCacheManager;
use crate::registry::ClientRegistry;
use crate::remote::RepositoryLocation;
use crate::status::LocalResourceStatus;

/// Queries a repository location's client for status and installs the result.
pub struct StatusFetcher {
    manager: Arc<StatusCacheManager>,
    clients: Arc<ClientRegistry>,
}

impl StatusFetcher {
    pub fn new(manager: Arc<StatusCacheManager>, clients: Arc<ClientRegistry>) -> Self {
        Self { manager, clients }
    }

    pub fn manager(&self) -> &Arc<StatusCacheManager> {
        &self.manager
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    /// Fetch the status of `path` (and its descendants if `recursive`).
    ///
    /// On success every record is converted in the order the client returned
    /// it and installed into the status cache keyed at `path`.
    ///
    /// # Errors
    /// - `Fetch` wrapping the client failure; the cache is left untouched
    /// - `Fetch` wrapping `NotPermitted` if the manager has shut down
    pub async fn fetch(
        &self,
        location: &RepositoryLocation,
        path: &ResourcePath,
        recursive: bool,
        include_unmodified: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<LocalResourceStatus>> {
        let client = self
            .clients
            .resolve(location.id())
            .map_err(|e| Error::fetch(path.to_string_path(), e))?;
        let bus = client.notifications();

        if let Some(bus) = bus {
            bus.publish(NotifyEvent::Command(ClientCommand::Status));
        }
        debug!(
            "Fetching status of {} from {} (recursive: {}, all: {})",
            path,
            location.id(),
            recursive,
            include_unmodified
        );

        let raw = match client
            .status(path, recursive, include_unmodified, cancel)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Status fetch for {} failed: {}", path, e);
                if let Some(bus) = bus {
                    bus.publish(NotifyEvent::Error(e.to_string()));
                }
                return Err(Error::fetch(path.to_string_path(), e));
            }
        };

        let statuses: Vec<LocalResourceStatus> =
            raw.into_iter().map(LocalResourceStatus::from).collect();
        self.manager
            .install_statuses(&statuses, path, recursive)
            .map_err(|e| Error::fetch(path.to_string_path(), e))?;

        if let Some(bus) = bus {
            bus.publish(NotifyEvent::Completed(format!("status {}", path)));
        }
        info!("Fetched {} statuses for {}", statuses.len(), path);
        Ok(statuses)
    }
}
