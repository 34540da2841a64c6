use super::FileSystem;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
struct MockEntry {
    content: Option<String>,
    kind: EntryKind,
}

/// In-memory file system rooted at `/mock` unless told otherwise
pub struct MockFileSystem {
    files: RwLock<HashMap<PathBuf, MockEntry>>,
    root: PathBuf,
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::with_root(PathBuf::from("/mock"))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            root,
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: &str) {
        let path = self.normalize_path(path.as_ref());
        let mut files = self.entries_mut();

        if let Some(parent) = path.parent() {
            Self::ensure_parents(&mut files, parent);
        }

        files.insert(
            path,
            MockEntry {
                content: Some(content.to_string()),
                kind: EntryKind::File,
            },
        );
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let path = self.normalize_path(path.as_ref());
        let mut files = self.entries_mut();
        Self::ensure_parents(&mut files, &path);
    }

    /// All file paths currently stored, sorted
    pub fn file_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .entries()
            .iter()
            .filter(|(_, e)| e.kind == EntryKind::File)
            .map(|(p, _)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    fn normalize_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    // A poisoned lock only means another test thread panicked mid-write;
    // the map itself is still usable.
    fn entries(&self) -> RwLockReadGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.read().unwrap_or_else(|e| e.into_inner())
    }

    fn entries_mut(&self) -> RwLockWriteGuard<'_, HashMap<PathBuf, MockEntry>> {
        self.files.write().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_parents(files: &mut HashMap<PathBuf, MockEntry>, path: &Path) {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            files.entry(current.clone()).or_insert(MockEntry {
                content: None,
                kind: EntryKind::Directory,
            });
        }
    }
}

impl Default for MockFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MockFileSystem {
    fn exists(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.entries().contains_key(&path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.entries()
            .get(&path)
            .map(|e| e.kind == EntryKind::Directory)
            .unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        let path = self.normalize_path(path);
        self.entries()
            .get(&path)
            .map(|e| e.kind == EntryKind::File)
            .unwrap_or(false)
    }

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let path = self.normalize_path(path);
        let files = self.entries();
        let entry = files
            .get(&path)
            .ok_or_else(|| anyhow!("File not found: {:?}", path))?;

        entry
            .content
            .clone()
            .ok_or_else(|| anyhow!("Not a file: {:?}", path))
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        let path = self.normalize_path(path);
        let mut files = self.entries_mut();
        if let Some(entry) = files.get(&path) {
            if entry.kind == EntryKind::File {
                return Err(anyhow!("Not a directory: {:?}", path));
            }
        }
        Self::ensure_parents(&mut files, &path);
        Ok(())
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        let path = self.normalize_path(path);
        let mut files = self.entries_mut();
        if files
            .get(&path)
            .is_some_and(|e| e.kind == EntryKind::Directory)
        {
            return Err(anyhow!("Is a directory: {:?}", path));
        }
        if let Some(parent) = path.parent() {
            Self::ensure_parents(&mut files, parent);
        }
        files.insert(
            path,
            MockEntry {
                content: Some(contents.to_string()),
                kind: EntryKind::File,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_file() {
        let fs = MockFileSystem::new();
        fs.add_file("test_bgp.py", "def build_topo(tgen): pass");

        assert!(fs.exists(Path::new("/mock/test_bgp.py")));
        assert!(fs.is_file(Path::new("/mock/test_bgp.py")));
    }

    #[test]
    fn test_add_dir() {
        let fs = MockFileSystem::new();
        fs.add_dir("bgp_basic");

        assert!(fs.exists(Path::new("/mock/bgp_basic")));
        assert!(fs.is_dir(Path::new("/mock/bgp_basic")));
    }

    #[test]
    fn test_read_to_string() {
        let fs = MockFileSystem::new();
        fs.add_file("test.py", "hello world");

        let content = fs.read_to_string(Path::new("/mock/test.py")).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_with_root() {
        let fs = MockFileSystem::with_root(PathBuf::from("/topotests"));
        fs.add_file("bgp/test_bgp.py", "import pytest");

        assert!(fs.exists(Path::new("/topotests/bgp/test_bgp.py")));
        let content = fs
            .read_to_string(Path::new("/topotests/bgp/test_bgp.py"))
            .unwrap();
        assert_eq!(content, "import pytest");
    }

    #[test]
    fn test_parent_directories_created() {
        let fs = MockFileSystem::new();
        fs.add_file("a/b/c/file.py", "content");

        assert!(fs.is_dir(Path::new("/mock/a")));
        assert!(fs.is_dir(Path::new("/mock/a/b")));
        assert!(fs.is_dir(Path::new("/mock/a/b/c")));
        assert!(fs.is_file(Path::new("/mock/a/b/c/file.py")));
    }

    #[test]
    fn test_create_dir_all() {
        let fs = MockFileSystem::new();
        fs.create_dir_all(Path::new("/tmp/topotests_export_logs/r1"))
            .unwrap();

        assert!(fs.is_dir(Path::new("/tmp/topotests_export_logs")));
        assert!(fs.is_dir(Path::new("/tmp/topotests_export_logs/r1")));
        // idempotent
        fs.create_dir_all(Path::new("/tmp/topotests_export_logs/r1"))
            .unwrap();
    }

    #[test]
    fn test_create_dir_all_over_file_fails() {
        let fs = MockFileSystem::new();
        fs.add_file("taken", "x");
        assert!(fs.create_dir_all(Path::new("/mock/taken")).is_err());
    }

    #[test]
    fn test_write_replaces_content() {
        let fs = MockFileSystem::new();
        fs.write(Path::new("out/topo.json"), "{}").unwrap();
        fs.write(Path::new("out/topo.json"), "{\"r1\": []}").unwrap();

        assert!(fs.is_dir(Path::new("/mock/out")));
        assert_eq!(
            fs.read_to_string(Path::new("/mock/out/topo.json")).unwrap(),
            "{\"r1\": []}"
        );
        assert_eq!(fs.file_paths(), vec![PathBuf::from("/mock/out/topo.json")]);
    }

    #[test]
    fn test_write_over_directory_fails() {
        let fs = MockFileSystem::new();
        fs.add_dir("out");
        assert!(fs.write(Path::new("out"), "{}").is_err());
    }
}
