//! Filesystem Abstraction
//!
//! A synchronous trait over the filesystem operations the value model and
//! dependency graph need: existence/kind checks, mtime/size for staleness
//! comparisons, directory listing, and a recursive walk for `rexists`. Unlike the
//! teacher's virtual, async `FileSystem` (built for its sandboxed interpreter),
//! graph preparation here runs single-threaded and synchronously, so the trait
//! stays sync; only command execution itself (`src/exec`) is async.

pub mod mem;
pub mod os;

use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub use mem::MemFilesystem;
pub use os::OsFilesystem;

/// Metadata needed for staleness comparisons (distilled spec §4.3: an output is
/// stale if its mtime is not newer than any of its inputs', within a 1s tolerance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub modified: SystemTime,
    pub len: u64,
    pub is_dir: bool,
}

/// Abstracts every filesystem call the value model, graph builder, and output
/// index make, so both can run against a real disk (`OsFilesystem`) or an
/// in-memory fixture (`MemFilesystem`) in tests.
pub trait Filesystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn is_directory(&self, path: &Path) -> bool;

    fn metadata(&self, path: &Path) -> Option<FileMeta>;

    /// Direct children of `path` (non-recursive), or an empty vec if `path` is
    /// not a directory.
    fn read_dir(&self, path: &Path) -> Vec<PathBuf>;

    fn read_to_string(&self, path: &Path) -> std::io::Result<String>;

    /// Deletes a file, used by the post-run maintenance pass (distilled spec
    /// §4.6) to remove stale temporaries and incomplete outputs. Not needed by
    /// the (read-only) graph-build phase, but kept on this trait rather than a
    /// second one so both backends stay behind the same abstraction.
    fn delete_file(&self, path: &Path) -> std::io::Result<()>;

    /// Every path reachable under `cwd`, recursively, used by `rexists` to test a
    /// regex against the whole subtree rather than a single candidate path.
    fn walk(&self, cwd: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut pending = vec![cwd.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for child in self.read_dir(&dir) {
                let is_dir = self.is_directory(&child);
                out.push(child.clone());
                if is_dir {
                    pending.push(child);
                }
            }
        }
        out
    }
}
