//! Real-disk `Filesystem`, backing normal (non-test) runs.

use std::path::{Path, PathBuf};

use crate::fs::{FileMeta, Filesystem};

/// Thin wrapper over `std::fs`. Kept as its own type (rather than calling
/// `std::fs` directly from callers) so every filesystem touch in the crate goes
/// through one trait, matching the teacher's `FileSystem` split between a real
/// and an in-memory implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFilesystem;

impl OsFilesystem {
    pub fn new() -> Self {
        Self
    }
}

impl Filesystem for OsFilesystem {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn metadata(&self, path: &Path) -> Option<FileMeta> {
        let meta = std::fs::metadata(path).ok()?;
        let modified = meta.modified().ok()?;
        Some(FileMeta { modified, len: meta.len(), is_dir: meta.is_dir() })
    }

    fn read_dir(&self, path: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(path) else {
            return Vec::new();
        };
        entries.filter_map(|e| e.ok()).map(|e| e.path()).collect()
    }

    fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn delete_file(&self, path: &Path) -> std::io::Result<()> {
        std::fs::remove_file(path)
    }
}
