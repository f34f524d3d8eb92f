//! Remote resource model: revisions, identities and repository descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

use subsync_common::{Error, RepositoryLocationId, Result};

use crate::client::{LogEntry, VersionControlClient};
use crate::content::RemoteResourceCache;
use crate::status::NodeKind;

/// A concrete repository revision number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RevisionNumber(u64);

impl RevisionNumber {
    pub const fn new(number: u64) -> Self {
        Self(number)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RevisionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RevisionNumber {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|e| Error::Encoding(format!("Invalid revision number {:?}: {}", s, e)))
    }
}

/// Revision selector for repository requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Revision {
    /// Latest revision in the repository.
    Head,
    /// Revision the working copy was checked out at.
    Base,
    /// Working copy contents including local edits.
    Working,
    Number(RevisionNumber),
}

impl Revision {
    /// The concrete revision number, if this selector names one.
    pub fn number(&self) -> Option<RevisionNumber> {
        match self {
            Revision::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<RevisionNumber> for Revision {
    fn from(number: RevisionNumber) -> Self {
        Revision::Number(number)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Revision::Head => write!(f, "HEAD"),
            Revision::Base => write!(f, "BASE"),
            Revision::Working => write!(f, "WORKING"),
            Revision::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Identity of one revision of one repository path.
///
/// Equality and hashing use `(path, revision)` only; the repository location
/// is carried along for callers but never compared. A `None` revision stands
/// for head or unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionIdentity {
    repository_location_id: RepositoryLocationId,
    path: String,
    revision: Option<RevisionNumber>,
}

impl RevisionIdentity {
    pub fn new(
        repository_location_id: RepositoryLocationId,
        path: impl Into<String>,
        revision: Option<RevisionNumber>,
    ) -> Self {
        Self {
            repository_location_id,
            path: path.into(),
            revision,
        }
    }

    pub fn repository_location_id(&self) -> &RepositoryLocationId {
        &self.repository_location_id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn revision(&self) -> Option<RevisionNumber> {
        self.revision
    }
}

impl PartialEq for RevisionIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.revision == other.revision
    }
}

impl Eq for RevisionIdentity {}

impl Hash for RevisionIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.revision.hash(state);
    }
}

impl fmt::Display for RevisionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.revision {
            Some(n) => write!(f, "{}@{}", self.path, n),
            None => write!(f, "{}@HEAD", self.path),
        }
    }
}

/// A configured repository root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLocation {
    id: RepositoryLocationId,
    url: Url,
}

impl RepositoryLocation {
    pub fn new(id: RepositoryLocationId, url: Url) -> Self {
        Self { id, url }
    }

    pub fn id(&self) -> &RepositoryLocationId {
        &self.id
    }

    /// Repository root URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Whether `url` is the root itself.
    pub fn is_root(&self, url: &Url) -> bool {
        trimmed(url) == trimmed(&self.url)
    }

    /// Path of `url` relative to the repository root, with a leading `/`.
    ///
    /// Returns `None` if `url` lies outside the repository.
    pub fn relative_path(&self, url: &Url) -> Option<String> {
        let root = trimmed(&self.url);
        let candidate = trimmed(url);
        let rest = candidate.strip_prefix(root)?;
        if rest.is_empty() {
            Some("/".to_string())
        } else if rest.starts_with('/') {
            Some(rest.to_string())
        } else {
            None
        }
    }
}

fn trimmed(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}

fn child_url(parent: &Url, name: &str) -> Result<Url> {
    let mut url = parent.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidInput(format!("URL {} cannot have children", parent)))?
        .pop_if_empty()
        .push(name);
    Ok(url)
}

fn parent_url(url: &Url) -> Result<Url> {
    let mut parent = url.clone();
    parent
        .path_segments_mut()
        .map_err(|_| Error::InvalidInput(format!("URL {} has no parent", url)))?
        .pop_if_empty()
        .pop();
    Ok(parent)
}

/// Immutable description shared by remote files and folders.
#[derive(Debug, Clone)]
pub struct RemoteResourceDescriptor {
    parent: Option<Arc<RemoteFolder>>,
    repository: Arc<RepositoryLocation>,
    url: Url,
    revision: Revision,
    last_changed_revision: Option<RevisionNumber>,
    last_changed_date: Option<DateTime<Utc>>,
    author: Option<String>,
}

impl RemoteResourceDescriptor {
    /// Describe a resource below `parent`.
    ///
    /// # Errors
    /// - `InvalidInput` if `url` is the repository root or lies outside it
    pub fn new(
        parent: Arc<RemoteFolder>,
        url: Url,
        revision: Revision,
        last_changed_revision: Option<RevisionNumber>,
        last_changed_date: Option<DateTime<Utc>>,
        author: Option<String>,
    ) -> Result<Self> {
        let repository = parent.descriptor.repository.clone();
        if repository.is_root(&url) || repository.relative_path(&url).is_none() {
            return Err(Error::InvalidInput(format!(
                "{} is not a resource inside {}",
                url,
                repository.url()
            )));
        }

        Ok(Self {
            parent: Some(parent),
            repository,
            url,
            revision,
            last_changed_revision,
            last_changed_date,
            author,
        })
    }

    /// Folder containing this resource; `None` only for the repository root.
    pub fn parent(&self) -> Option<&Arc<RemoteFolder>> {
        self.parent.as_ref()
    }

    pub fn repository(&self) -> &Arc<RepositoryLocation> {
        &self.repository
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn last_changed_revision(&self) -> Option<RevisionNumber> {
        self.last_changed_revision
    }

    pub fn last_changed_date(&self) -> Option<DateTime<Utc>> {
        self.last_changed_date
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn is_repository_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Last URL segment.
    pub fn name(&self) -> &str {
        self.url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or("")
    }

    /// Path relative to the repository root, with a leading `/`.
    pub fn repository_relative_path(&self) -> String {
        self.repository
            .relative_path(&self.url)
            .unwrap_or_else(|| "/".to_string())
    }

    /// Revision identifying this resource's contents: the last-changed
    /// revision, or the requested revision when that is unknown.
    pub fn content_revision(&self) -> Option<RevisionNumber> {
        self.last_changed_revision.or(self.revision.number())
    }

    /// Decimal string of [`content_revision`](Self::content_revision).
    pub fn content_identifier(&self) -> Option<String> {
        self.content_revision().map(|n| n.to_string())
    }

    /// `url:content_identifier`, the key of this resource's cached contents.
    pub fn cache_path(&self) -> Option<String> {
        self.content_identifier()
            .map(|id| format!("{}:{}", self.url, id))
    }

    /// Minimal persisted form: ASCII digits of the content identifier.
    pub fn as_bytes(&self) -> Option<Vec<u8>> {
        self.content_identifier().map(String::into_bytes)
    }

    pub fn identity(&self) -> RevisionIdentity {
        RevisionIdentity::new(
            self.repository.id().clone(),
            self.url.as_str(),
            self.content_revision(),
        )
    }

    /// Commit history of this resource up to its revision.
    pub async fn log_entries(
        &self,
        client: &dyn VersionControlClient,
        cancel: &CancellationToken,
    ) -> Result<Vec<LogEntry>> {
        client.log_entries(&self.url, &self.revision, cancel).await
    }
}

/// A remote directory.
#[derive(Debug, Clone)]
pub struct RemoteFolder {
    descriptor: RemoteResourceDescriptor,
}

impl RemoteFolder {
    /// The repository root folder at `revision`.
    pub fn repository_root(repository: Arc<RepositoryLocation>, revision: Revision) -> Self {
        let url = repository.url().clone();
        Self {
            descriptor: RemoteResourceDescriptor {
                parent: None,
                repository,
                url,
                revision,
                last_changed_revision: None,
                last_changed_date: None,
                author: None,
            },
        }
    }

    pub fn new(descriptor: RemoteResourceDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &RemoteResourceDescriptor {
        &self.descriptor
    }

    /// Direct children of this folder, at this folder's revision.
    pub async fn members(
        self: &Arc<Self>,
        client: &dyn VersionControlClient,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteResource>> {
        let entries = client
            .list(&self.descriptor.url, &self.descriptor.revision, cancel)
            .await?;

        entries
            .into_iter()
            .map(|entry| {
                let descriptor = RemoteResourceDescriptor::new(
                    Arc::clone(self),
                    child_url(&self.descriptor.url, &entry.name)?,
                    self.descriptor.revision,
                    entry.last_changed_revision,
                    entry.last_changed_date,
                    entry.author,
                )?;
                Ok(match entry.kind {
                    NodeKind::Directory => RemoteResource::Folder(RemoteFolder::new(descriptor)),
                    _ => RemoteResource::File(RemoteFile::new(descriptor)),
                })
            })
            .collect()
    }
}

/// A remote file.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    descriptor: RemoteResourceDescriptor,
}

impl RemoteFile {
    pub fn new(descriptor: RemoteResourceDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &RemoteResourceDescriptor {
        &self.descriptor
    }

    /// File contents, served from `cache` when present.
    pub async fn contents(
        &self,
        client: &dyn VersionControlClient,
        cache: &RemoteResourceCache,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let content_revision = self.descriptor.content_revision();
        if let Some(revision) = content_revision {
            if let Some(bytes) = cache.get(&self.descriptor.url, revision) {
                return Ok(bytes);
            }
        }

        let bytes = client
            .cat(&self.descriptor.url, &self.descriptor.revision, cancel)
            .await?;
        if let Some(revision) = content_revision {
            cache.put(&self.descriptor.url, revision, &bytes);
        }
        Ok(bytes)
    }
}

/// A remote file or folder.
///
/// Two resources are equal when they agree on kind, URL and requested
/// revision; last-changed metadata is not compared.
#[derive(Debug, Clone)]
pub enum RemoteResource {
    File(RemoteFile),
    Folder(RemoteFolder),
}

impl RemoteResource {
    pub fn descriptor(&self) -> &RemoteResourceDescriptor {
        match self {
            RemoteResource::File(file) => &file.descriptor,
            RemoteResource::Folder(folder) => &folder.descriptor,
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self, RemoteResource::Folder(_))
    }

    pub fn url(&self) -> &Url {
        self.descriptor().url()
    }

    pub fn name(&self) -> &str {
        self.descriptor().name()
    }

    pub fn identity(&self) -> RevisionIdentity {
        self.descriptor().identity()
    }

    pub fn as_folder(&self) -> Option<&RemoteFolder> {
        match self {
            RemoteResource::Folder(folder) => Some(folder),
            RemoteResource::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&RemoteFile> {
        match self {
            RemoteResource::File(file) => Some(file),
            RemoteResource::Folder(_) => None,
        }
    }

    /// Rebuild a resource from its minimal persisted form.
    ///
    /// The revision and last-changed revision are both set to the decoded
    /// number; ancestors up to the repository root are synthesized at the same
    /// revision so that only the root lacks a parent.
    ///
    /// # Errors
    /// - `Encoding` if `bytes` are not ASCII digits
    /// - `InvalidInput` if `url` lies outside `repository`
    pub fn from_bytes(
        repository: Arc<RepositoryLocation>,
        url: Url,
        is_container: bool,
        bytes: &[u8],
    ) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Encoding(format!("Remote identity is not UTF-8: {}", e)))?;
        let number: RevisionNumber = text.parse()?;
        let revision = Revision::Number(number);

        if repository.relative_path(&url).is_none() {
            return Err(Error::InvalidInput(format!(
                "{} is outside repository {}",
                url,
                repository.url()
            )));
        }
        if repository.is_root(&url) {
            let mut root = RemoteFolder::repository_root(repository, revision);
            root.descriptor.last_changed_revision = Some(number);
            return Ok(RemoteResource::Folder(root));
        }

        let parent = Arc::new(folder_chain(&repository, &parent_url(&url)?, revision)?);
        let descriptor =
            RemoteResourceDescriptor::new(parent, url, revision, Some(number), None, None)?;
        Ok(if is_container {
            RemoteResource::Folder(RemoteFolder::new(descriptor))
        } else {
            RemoteResource::File(RemoteFile::new(descriptor))
        })
    }

    /// Whether this resource is still present in the repository.
    pub async fn exists(
        &self,
        client: &dyn VersionControlClient,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let descriptor = self.descriptor();
        match descriptor.parent() {
            Some(parent) => {
                let members = parent.members(client, cancel).await?;
                Ok(members.iter().any(|member| member == self))
            }
            None => match client.list(descriptor.url(), &descriptor.revision(), cancel).await {
                Ok(_) => Ok(true),
                Err(e) if e.is_not_found() => Ok(false),
                Err(e) => Err(e),
            },
        }
    }
}

fn folder_chain(
    repository: &Arc<RepositoryLocation>,
    url: &Url,
    revision: Revision,
) -> Result<RemoteFolder> {
    if repository.is_root(url) {
        return Ok(RemoteFolder::repository_root(repository.clone(), revision));
    }
    let parent = Arc::new(folder_chain(repository, &parent_url(url)?, revision)?);
    let descriptor = RemoteResourceDescriptor::new(parent, url.clone(), revision, None, None, None)?;
    Ok(RemoteFolder::new(descriptor))
}

impl PartialEq for RemoteResource {
    fn eq(&self, other: &Self) -> bool {
        self.is_container() == other.is_container()
            && self.url() == other.url()
            && self.descriptor().revision == other.descriptor().revision
    }
}

impl Eq for RemoteResource {}

impl Hash for RemoteResource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.is_container().hash(state);
        self.url().hash(state);
        self.descriptor().revision.hash(state);
    }
}

impl fmt::Display for RemoteResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url(), self.descriptor().revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::DirEntry;
    use crate::snapshot::SnapshotClient;
    use std::collections::HashSet;

    fn location() -> Arc<RepositoryLocation> {
        Arc::new(RepositoryLocation::new(
            RepositoryLocationId::new("main").unwrap(),
            Url::parse("https://svn.example.com/repo").unwrap(),
        ))
    }

    fn url(s: &str) -> Url {
        Url::parse(&format!("https://svn.example.com/repo{}", s)).unwrap()
    }

    fn file_at(path: &str, revision: Revision, last_changed: Option<u64>) -> RemoteResource {
        let root = Arc::new(RemoteFolder::repository_root(location(), revision));
        let descriptor = RemoteResourceDescriptor::new(
            root,
            url(path),
            revision,
            last_changed.map(RevisionNumber::new),
            None,
            None,
        )
        .unwrap();
        RemoteResource::File(RemoteFile::new(descriptor))
    }

    #[test]
    fn test_revision_identity_ignores_location() {
        let a = RevisionIdentity::new(
            RepositoryLocationId::new("one").unwrap(),
            "https://svn.example.com/repo/a",
            Some(RevisionNumber::new(3)),
        );
        let b = RevisionIdentity::new(
            RepositoryLocationId::new("two").unwrap(),
            "https://svn.example.com/repo/a",
            Some(RevisionNumber::new(3)),
        );
        let c = RevisionIdentity::new(
            RepositoryLocationId::new("one").unwrap(),
            "https://svn.example.com/repo/a",
            None,
        );
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<RevisionIdentity> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_remote_equality_uses_kind_url_and_revision() {
        let head = Revision::Head;
        let a = file_at("/trunk/a.txt", head, Some(4));
        let b = file_at("/trunk/a.txt", head, Some(9));
        assert_eq!(a, b);

        let other_rev = file_at("/trunk/a.txt", Revision::Number(RevisionNumber::new(9)), Some(9));
        assert_ne!(a, other_rev);

        let folder = RemoteResource::Folder(RemoteFolder::new(a.descriptor().clone()));
        assert_ne!(a, folder);
    }

    #[test]
    fn test_content_identifier_and_cache_path() {
        let file = file_at("/trunk/a.txt", Revision::Head, Some(42));
        let descriptor = file.descriptor();
        assert_eq!(descriptor.content_identifier().as_deref(), Some("42"));
        assert_eq!(
            descriptor.cache_path().as_deref(),
            Some("https://svn.example.com/repo/trunk/a.txt:42")
        );
        assert_eq!(descriptor.as_bytes(), Some(b"42".to_vec()));
        assert_eq!(descriptor.name(), "a.txt");
        assert_eq!(descriptor.repository_relative_path(), "/trunk/a.txt");

        let unknown = file_at("/trunk/b.txt", Revision::Head, None);
        assert_eq!(unknown.descriptor().content_identifier(), None);
    }

    #[test]
    fn test_only_root_lacks_parent() {
        let root = RemoteFolder::repository_root(location(), Revision::Head);
        assert!(root.descriptor().is_repository_root());
        assert_eq!(root.descriptor().repository_relative_path(), "/");

        let file = file_at("/trunk/a.txt", Revision::Head, Some(1));
        assert!(file.descriptor().parent().is_some());
    }

    #[test]
    fn test_descriptor_rejects_foreign_urls() {
        let root = Arc::new(RemoteFolder::repository_root(location(), Revision::Head));
        let foreign = Url::parse("https://svn.example.com/other/a").unwrap();
        assert!(RemoteResourceDescriptor::new(root.clone(), foreign, Revision::Head, None, None, None).is_err());
        assert!(RemoteResourceDescriptor::new(root, url(""), Revision::Head, None, None, None).is_err());
    }

    #[test]
    fn test_from_bytes_rebuilds_parent_chain() {
        let resource =
            RemoteResource::from_bytes(location(), url("/trunk/src/a.txt"), false, b"17").unwrap();
        assert!(!resource.is_container());
        assert_eq!(resource.descriptor().last_changed_revision(), Some(RevisionNumber::new(17)));

        let mut depth = 0;
        let mut current = resource.descriptor().parent().cloned();
        while let Some(folder) = current {
            assert_eq!(folder.descriptor().revision(), Revision::Number(RevisionNumber::new(17)));
            current = folder.descriptor().parent().cloned();
            depth += 1;
        }
        assert_eq!(depth, 3);

        let root = RemoteResource::from_bytes(location(), url(""), true, b"17").unwrap();
        assert!(root.descriptor().is_repository_root());
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(matches!(
            RemoteResource::from_bytes(location(), url("/a"), false, b"x1"),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(
            RemoteResource::from_bytes(
                location(),
                Url::parse("https://elsewhere.example.com/a").unwrap(),
                false,
                b"1"
            ),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_members_and_exists() {
        let client = SnapshotClient::new();
        client.add_listing(
            url(""),
            vec![
                DirEntry::new("trunk", NodeKind::Directory, Some(RevisionNumber::new(5))),
                DirEntry::new("README", NodeKind::File, Some(RevisionNumber::new(2))),
            ],
        );
        let cancel = CancellationToken::new();

        let root = Arc::new(RemoteFolder::repository_root(location(), Revision::Head));
        let members = root.members(&client, &cancel).await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members[0].is_container());
        assert_eq!(members[0].url(), &url("/trunk"));
        assert_eq!(members[1].descriptor().content_identifier().as_deref(), Some("2"));

        let readme = &members[1];
        assert!(readme.exists(&client, &cancel).await.unwrap());
        let missing = file_at("/gone.txt", Revision::Head, None);
        assert!(!missing.exists(&client, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_contents_use_cache() {
        let client = SnapshotClient::new();
        client.add_contents(url("/trunk/a.txt"), b"hello".to_vec());
        let cache = RemoteResourceCache::new(8);
        let cancel = CancellationToken::new();

        let file = file_at("/trunk/a.txt", Revision::Head, Some(3));
        let file = file.as_file().unwrap();
        assert_eq!(file.contents(&client, &cache, &cancel).await.unwrap(), b"hello");
        assert_eq!(file.contents(&client, &cache, &cancel).await.unwrap(), b"hello");
        assert_eq!(client.call_count("cat"), 1);
        assert_eq!(cache.get(&url("/trunk/a.txt"), RevisionNumber::new(3)), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_log_entries_delegate_to_client() {
        let client = SnapshotClient::new();
        client.add_log(url("/trunk/a.txt"), vec![LogEntry::new(RevisionNumber::new(3), "bob", "fix")]);
        let file = file_at("/trunk/a.txt", Revision::Head, Some(3));

        let entries = file
            .descriptor()
            .log_entries(&client, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].author.as_deref(), Some("bob"));
    }
}
