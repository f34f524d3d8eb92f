//! Cache of remote file contents keyed by URL and revision.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::{Blake2b512, Digest};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use subsync_common::Result;

use crate::remote::RevisionNumber;

/// Contents of remote files at specific revisions.
///
/// Holds at most `max_entries` blobs in memory, evicting an arbitrary entry
/// when full. With a spill directory, every blob is also written to disk so it
/// survives eviction and restarts. Disk failures are logged and treated as
/// misses.
pub struct RemoteResourceCache {
    max_entries: usize,
    entries: Mutex<HashMap<String, Vec<u8>>>,
    spill_dir: Option<PathBuf>,
}

impl RemoteResourceCache {
    /// Memory-only cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            entries: Mutex::new(HashMap::new()),
            spill_dir: None,
        }
    }

    /// Cache that also keeps every blob under `dir`.
    ///
    /// # Errors
    /// - I/O error creating `dir`
    pub fn with_spill_dir(max_entries: usize, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            spill_dir: Some(dir),
            ..Self::new(max_entries)
        })
    }

    /// Cache key: `url:revision`.
    pub fn key(url: &Url, revision: RevisionNumber) -> String {
        format!("{}:{}", url, revision)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every in-memory entry. Spilled blobs are kept.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn get(&self, url: &Url, revision: RevisionNumber) -> Option<Vec<u8>> {
        let key = Self::key(url, revision);
        if let Some(bytes) = self.lock().get(&key) {
            return Some(bytes.clone());
        }

        let dir = self.spill_dir.as_ref()?;
        let file = spill_file(dir, &key);
        match fs::read(&file) {
            Ok(bytes) => {
                debug!("Loaded {} from {}", key, file.display());
                self.remember(key, bytes.clone());
                Some(bytes)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read cached contents {}: {}", file.display(), e);
                None
            }
        }
    }

    pub fn put(&self, url: &Url, revision: RevisionNumber, bytes: &[u8]) {
        let key = Self::key(url, revision);
        if let Some(dir) = &self.spill_dir {
            let file = spill_file(dir, &key);
            if let Err(e) = write_atomic(dir, &file, bytes) {
                warn!("Failed to spill {} to {}: {}", key, file.display(), e);
            }
        }
        self.remember(key, bytes.to_vec());
    }

    fn remember(&self, key: String, bytes: Vec<u8>) {
        if self.max_entries == 0 {
            return;
        }
        let mut entries = self.lock();
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            if let Some(victim) = entries.keys().next().cloned() {
                entries.remove(&victim);
            }
        }
        entries.insert(key, bytes);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spill_file(dir: &Path, key: &str) -> PathBuf {
    let digest = Blake2b512::digest(key.as_bytes());
    dir.join(URL_SAFE_NO_PAD.encode(digest))
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
