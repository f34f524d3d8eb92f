//! Local filesystem resource tree.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

use crate::tree::{Depth, ResourceTree, SyncKey};
use subsync_common::{Error, ResourcePath, Result};

/// Name of the file holding the sync info of one resource.
const INFO_FILENAME: &str = "sync.bin";

/// Prefix for directories that mirror a resource path component.
///
/// Keeps component directories from ever colliding with [`INFO_FILENAME`].
const COMPONENT_PREFIX: char = '_';

/// Resource tree backed by a workspace directory and a sidecar state directory.
///
/// Resource existence is answered from the workspace directory. Sync info is
/// stored under the state directory, one file per (key, resource), mirroring
/// the resource hierarchy:
///
/// ```text
/// <state>/<key>/_project/_src/sync.bin   # info for /project/src
/// ```
///
/// Every write goes to a uniquely named temporary file that is then renamed
/// over the target, so a crash leaves either the old or the new value.
pub struct LocalResourceTree {
    workspace: PathBuf,
    state_dir: PathBuf,
    locked: AtomicBool,
}

impl LocalResourceTree {
    /// Create a tree over `workspace`, keeping sync info in `state_dir`.
    ///
    /// # Postconditions
    /// - The state directory exists
    ///
    /// # Errors
    /// - Permission denied creating the state directory
    pub fn new(workspace: impl AsRef<Path>, state_dir: impl AsRef<Path>) -> Result<Self> {
        let workspace = workspace.as_ref().to_path_buf();
        let state_dir = state_dir.as_ref().to_path_buf();

        if !state_dir.exists() {
            fs::create_dir_all(&state_dir)?;
        }

        Ok(Self {
            workspace,
            state_dir,
            locked: AtomicBool::new(false),
        })
    }

    /// Lock or unlock the tree against mutation.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    /// Workspace directory this tree answers existence from.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn to_fs_path(&self, path: &ResourcePath) -> PathBuf {
        let mut fs_path = self.workspace.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn key_dir(&self, key: &SyncKey) -> PathBuf {
        self.state_dir.join(key.as_str().replace(['/', '\\'], "_"))
    }

    fn info_dir(&self, key: &SyncKey, path: &ResourcePath) -> PathBuf {
        let mut dir = self.key_dir(key);
        for component in path.components() {
            dir.push(format!("{}{}", COMPONENT_PREFIX, component));
        }
        dir
    }

    fn info_file(&self, key: &SyncKey, path: &ResourcePath) -> PathBuf {
        self.info_dir(key, path).join(INFO_FILENAME)
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.is_locked() {
            return Err(Error::NotPermitted("resource tree is locked".to_string()));
        }
        Ok(())
    }

    fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
        let dir = target
            .parent()
            .ok_or_else(|| Error::Storage(format!("No parent for {}", target.display())))?;
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        fs::write(&tmp, bytes)?;
        if let Err(e) = fs::rename(&tmp, target) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn remove_if_present(file: &Path) -> Result<()> {
        match fs::remove_file(file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Child resource names mirrored below an info directory.
    fn child_components(dir: &Path) -> Result<Vec<String>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix(COMPONENT_PREFIX))
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Whether an info file exists in `dir` or any directory below it.
    fn has_info(dir: &Path) -> bool {
        if dir.join(INFO_FILENAME).is_file() {
            return true;
        }
        match Self::child_components(dir) {
            Ok(children) => children.iter().any(|child| {
                Self::has_info(&dir.join(format!("{}{}", COMPONENT_PREFIX, child)))
            }),
            Err(_) => false,
        }
    }

    fn collect_paths(
        &self,
        key: &SyncKey,
        path: &ResourcePath,
        remaining: Option<usize>,
        out: &mut Vec<ResourcePath>,
    ) -> Result<()> {
        let dir = self.info_dir(key, path);
        if dir.join(INFO_FILENAME).is_file() {
            out.push(path.clone());
        }
        if remaining == Some(0) {
            return Ok(());
        }
        for child in Self::child_components(&dir)? {
            let child_path = path.join(&child)?;
            self.collect_paths(key, &child_path, remaining.map(|r| r - 1), out)?;
        }
        Ok(())
    }
}

impl ResourceTree for LocalResourceTree {
    fn name(&self) -> &str {
        "local"
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn exists(&self, path: &ResourcePath) -> bool {
        self.to_fs_path(path).exists()
    }

    fn is_phantom(&self, path: &ResourcePath) -> bool {
        if self.exists(path) {
            return false;
        }
        let Ok(keys) = fs::read_dir(&self.state_dir) else {
            return false;
        };
        keys.filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .any(|key| Self::has_info(&self.info_dir(&SyncKey::new(key), path)))
    }

    fn sync_info(&self, key: &SyncKey, path: &ResourcePath) -> Result<Option<Vec<u8>>> {
        match fs::read(self.info_file(key, path)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_sync_info(
        &self,
        key: &SyncKey,
        path: &ResourcePath,
        bytes: Option<&[u8]>,
    ) -> Result<()> {
        self.ensure_unlocked()?;
        let file = self.info_file(key, path);
        match bytes {
            Some(bytes) => Self::write_atomic(&file, bytes),
            None => Self::remove_if_present(&file),
        }
    }

    fn flush_sync_info(&self, key: &SyncKey, root: &ResourcePath, depth: Depth) -> Result<()> {
        if !self.exists(root) && !self.is_phantom(root) {
            return Err(Error::NotFound(format!("Resource not found: {}", root)));
        }
        self.ensure_unlocked()?;

        let dir = self.info_dir(key, root);
        match depth {
            Depth::Zero => Self::remove_if_present(&dir.join(INFO_FILENAME)),
            Depth::One => {
                Self::remove_if_present(&dir.join(INFO_FILENAME))?;
                for child in Self::child_components(&dir)? {
                    let child_dir = dir.join(format!("{}{}", COMPONENT_PREFIX, child));
                    Self::remove_if_present(&child_dir.join(INFO_FILENAME))?;
                }
                Ok(())
            }
            Depth::Infinite => {
                debug!("Removing sync info tree {}", dir.display());
                match fs::remove_dir_all(&dir) {
                    Ok(()) => Ok(()),
                    Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    fn sync_info_paths(
        &self,
        key: &SyncKey,
        root: &ResourcePath,
        depth: Depth,
    ) -> Result<Vec<ResourcePath>> {
        let remaining = match depth {
            Depth::Zero => Some(0),
            Depth::One => Some(1),
            Depth::Infinite => None,
        };
        let mut paths = Vec::new();
        self.collect_paths(key, root, remaining, &mut paths)?;
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn p(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    fn setup() -> (TempDir, LocalResourceTree) {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("workspace");
        fs::create_dir_all(workspace.join("project/src")).unwrap();
        fs::write(workspace.join("project/src/a.txt"), b"a").unwrap();
        let tree = LocalResourceTree::new(&workspace, temp.path().join("state")).unwrap();
        (temp, tree)
    }

    #[test]
    fn test_local_set_get_clear() {
        let (_temp, tree) = setup();
        let key = SyncKey::default();
        let path = p("/project/src/a.txt");

        assert_eq!(tree.sync_info(&key, &path).unwrap(), None);
        tree.set_sync_info(&key, &path, Some(b"status")).unwrap();
        assert_eq!(tree.sync_info(&key, &path).unwrap(), Some(b"status".to_vec()));

        tree.set_sync_info(&key, &path, Some(b"status2")).unwrap();
        assert_eq!(tree.sync_info(&key, &path).unwrap(), Some(b"status2".to_vec()));

        tree.set_sync_info(&key, &path, None).unwrap();
        assert_eq!(tree.sync_info(&key, &path).unwrap(), None);
    }

    #[test]
    fn test_local_no_temp_files_left() {
        let (_temp, tree) = setup();
        let key = SyncKey::default();
        let path = p("/project/src/a.txt");
        tree.set_sync_info(&key, &path, Some(b"x")).unwrap();

        let dir = tree.info_dir(&key, &path);
        let names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![INFO_FILENAME.to_string()]);
    }

    #[test]
    fn test_local_phantom_after_delete() {
        let (_temp, tree) = setup();
        let key = SyncKey::default();
        let path = p("/project/src/a.txt");
        tree.set_sync_info(&key, &path, Some(b"x")).unwrap();

        fs::remove_file(tree.workspace().join("project/src/a.txt")).unwrap();
        assert!(!tree.exists(&path));
        assert!(tree.is_phantom(&path));
    }

    #[test]
    fn test_local_deleted_folder_with_child_info_is_phantom() {
        let (_temp, tree) = setup();
        let key = SyncKey::default();
        let child = p("/project/src/a.txt");
        tree.set_sync_info(&key, &child, Some(b"x")).unwrap();

        fs::remove_dir_all(tree.workspace().join("project/src")).unwrap();
        assert!(tree.is_phantom(&p("/project/src")));
        assert!(!tree.is_phantom(&p("/project")));

        tree.flush_sync_info(&key, &p("/project/src"), Depth::Infinite)
            .unwrap();
        assert_eq!(tree.sync_info(&key, &child).unwrap(), None);
        assert!(!tree.is_phantom(&p("/project/src")));
    }

    #[test]
    fn test_local_cleared_info_is_not_phantom() {
        let (_temp, tree) = setup();
        let key = SyncKey::default();
        let child = p("/project/src/a.txt");
        tree.set_sync_info(&key, &child, Some(b"x")).unwrap();
        tree.set_sync_info(&key, &child, None).unwrap();

        fs::remove_dir_all(tree.workspace().join("project/src")).unwrap();
        assert!(!tree.is_phantom(&p("/project/src")));
    }

    #[test]
    fn test_local_locked_refuses_writes() {
        let (_temp, tree) = setup();
        tree.set_locked(true);
        let err = tree
            .set_sync_info(&SyncKey::default(), &p("/project"), Some(b"x"))
            .unwrap_err();
        assert!(err.is_not_permitted());
    }

    #[test]
    fn test_local_flush_and_list() {
        let (_temp, tree) = setup();
        let key = SyncKey::default();
        for s in ["/project", "/project/src", "/project/src/a.txt"] {
            tree.set_sync_info(&key, &p(s), Some(b"x")).unwrap();
        }

        assert_eq!(
            tree.sync_info_paths(&key, &p("/project"), Depth::One).unwrap(),
            vec![p("/project"), p("/project/src")]
        );

        tree.flush_sync_info(&key, &p("/project/src"), Depth::Infinite)
            .unwrap();
        assert_eq!(
            tree.sync_info_paths(&key, &ResourcePath::root(), Depth::Infinite)
                .unwrap(),
            vec![p("/project")]
        );
    }

    #[test]
    fn test_local_flush_missing_root() {
        let (_temp, tree) = setup();
        let err = tree
            .flush_sync_info(&SyncKey::default(), &p("/nope"), Depth::Zero)
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
