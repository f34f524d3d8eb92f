//! Marking conflicts resolved and refreshing the affected statuses.

use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use subsync_common::{Error, ResourcePath, Result};

use crate::client::ConflictChoice;
use crate::fetch::StatusFetcher;
use crate::remote::RepositoryLocation;

/// Resolves conflicts on a selection of resources.
pub struct ResolveOperation {
    fetcher: Arc<StatusFetcher>,
}

impl ResolveOperation {
    pub fn new(fetcher: Arc<StatusFetcher>) -> Self {
        Self { fetcher }
    }

    /// Resolve every path in `paths` with `choice` and return the choice used.
    ///
    /// Directories can only be resolved as merged, so a selection containing
    /// one is resolved with [`ConflictChoice::Merged`] throughout. Afterwards
    /// the status of each distinct parent is fetched again, recursively.
    ///
    /// # Errors
    /// - `Cancelled` if `cancel` fires between paths
    /// - the client's error for the first path it fails to resolve
    /// - `Fetch` if a refresh fails
    pub async fn run(
        &self,
        location: &RepositoryLocation,
        paths: &[ResourcePath],
        choice: ConflictChoice,
        cancel: &CancellationToken,
    ) -> Result<ConflictChoice> {
        let cache = self.fetcher.manager().status_cache();
        let has_directory = paths
            .iter()
            .any(|path| cache.get_status(path).is_some_and(|s| s.is_directory()));
        let choice = if has_directory {
            debug!("Selection contains a directory; resolving as merged");
            ConflictChoice::Merged
        } else {
            choice
        };

        let client = self.fetcher.clients().resolve(location.id())?;
        for path in paths {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            client.resolve(path, choice).await?;
            info!("Resolved {} using {}", path, choice);
        }

        let parents: BTreeSet<ResourcePath> = paths
            .iter()
            .map(|path| path.parent().unwrap_or_else(ResourcePath::root))
            .collect();
        for parent in &parents {
            self.fetcher
                .fetch(location, parent, true, true, cancel)
                .await?;
        }
        Ok(choice)
    }
}
