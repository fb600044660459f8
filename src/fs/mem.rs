//! In-Memory `Filesystem`, used by unit and scenario tests so they never touch
//! real disk. Directories are implicit: any path that is a strict prefix of a
//! stored file's path counts as an existing directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::fs::{FileMeta, Filesystem};

#[derive(Debug, Clone)]
struct Entry {
    contents: String,
    modified: SystemTime,
}

/// A fixture filesystem: files are inserted with [`MemFilesystem::add_file`] (and
/// optionally [`MemFilesystem::add_file_at`] for an explicit mtime); everything
/// else derives from the set of stored paths.
#[derive(Debug)]
pub struct MemFilesystem {
    files: Mutex<BTreeMap<PathBuf, Entry>>,
    epoch: SystemTime,
}

impl Default for MemFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFilesystem {
    pub fn new() -> Self {
        Self { files: Mutex::new(BTreeMap::new()), epoch: SystemTime::UNIX_EPOCH }
    }

    /// Adds a file with contents, stamped at a deterministic mtime derived from
    /// insertion order (each call one second after the last), so tests can
    /// exercise staleness comparisons without depending on wall-clock time.
    pub fn add_file(&mut self, path: impl AsRef<Path>, contents: impl Into<String>) {
        let files = self.files.get_mut().expect("mutex poisoned");
        let modified = self.epoch + Duration::from_secs(files.len() as u64);
        files.insert(path.as_ref().to_path_buf(), Entry { contents: contents.into(), modified });
    }

    /// Adds a file with an explicit mtime, for tests that need precise ordering.
    pub fn add_file_at(&mut self, path: impl AsRef<Path>, contents: impl Into<String>, modified: SystemTime) {
        let files = self.files.get_mut().expect("mutex poisoned");
        files.insert(path.as_ref().to_path_buf(), Entry { contents: contents.into(), modified });
    }

    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.get_mut().expect("mutex poisoned").remove(path.as_ref());
    }

    pub fn touch(&mut self, path: impl AsRef<Path>, modified: SystemTime) {
        if let Some(entry) = self.files.get_mut().expect("mutex poisoned").get_mut(path.as_ref()) {
            entry.modified = modified;
        }
    }
}

impl Filesystem for MemFilesystem {
    fn exists(&self, path: &Path) -> bool {
        let files = self.files.lock().expect("mutex poisoned");
        files.contains_key(path) || files.keys().any(|p| p.starts_with(path) && p != path)
    }

    fn is_directory(&self, path: &Path) -> bool {
        let files = self.files.lock().expect("mutex poisoned");
        !files.contains_key(path) && files.keys().any(|p| p.starts_with(path) && p != path)
    }

    fn metadata(&self, path: &Path) -> Option<FileMeta> {
        let files = self.files.lock().expect("mutex poisoned");
        if let Some(entry) = files.get(path) {
            return Some(FileMeta { modified: entry.modified, len: entry.contents.len() as u64, is_dir: false });
        }
        if files.keys().any(|p| p.starts_with(path) && p != path) {
            let modified = files
                .iter()
                .filter(|(p, _)| p.starts_with(path))
                .map(|(_, e)| e.modified)
                .max()
                .unwrap_or(self.epoch);
            return Some(FileMeta { modified, len: 0, is_dir: true });
        }
        None
    }

    fn read_dir(&self, path: &Path) -> Vec<PathBuf> {
        let files = self.files.lock().expect("mutex poisoned");
        let mut children: Vec<PathBuf> = Vec::new();
        for p in files.keys() {
            if p == path {
                continue;
            }
            if let Ok(rest) = p.strip_prefix(path) {
                if let Some(first) = rest.components().next() {
                    children.push(path.join(first));
                }
            }
        }
        children.sort();
        children.dedup();
        children
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        let files = self.files.lock().expect("mutex poisoned");
        files
            .get(path)
            .map(|e| e.contents.clone())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
    }

    fn delete_file(&self, path: &Path) -> std::io::Result<()> {
        let mut files = self.files.lock().expect("mutex poisoned");
        files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn files_and_implicit_directories_exist() {
        let mut fs = MemFilesystem::new();
        fs.add_file("/work/src/main.rs", "fn main() {}");
        assert!(fs.exists(Path::new("/work/src/main.rs")));
        assert!(fs.exists(Path::new("/work/src")));
        assert!(fs.is_directory(Path::new("/work/src")));
        assert!(!fs.is_directory(Path::new("/work/src/main.rs")));
        assert!(!fs.exists(Path::new("/work/other.rs")));
    }

    #[test]
    fn read_dir_lists_immediate_children_only() {
        let mut fs = MemFilesystem::new();
        fs.add_file("/work/a.txt", "a");
        fs.add_file("/work/sub/b.txt", "b");
        let children = fs.read_dir(Path::new("/work"));
        assert_eq!(children, vec![PathBuf::from("/work/a.txt"), PathBuf::from("/work/sub")]);
    }

    #[test]
    fn insertion_order_drives_distinct_mtimes() {
        let mut fs = MemFilesystem::new();
        fs.add_file("/work/a.txt", "a");
        fs.add_file("/work/b.txt", "b");
        let a = fs.metadata(Path::new("/work/a.txt")).unwrap();
        let b = fs.metadata(Path::new("/work/b.txt")).unwrap();
        assert!(b.modified > a.modified);
    }
}
