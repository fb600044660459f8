//! Output Index
//!
//! A persistent record of every file a script has ever produced, used by
//! `exec/complete.rs`'s stale-output pass (distilled spec §4.6 step 5/§4.7)
//! to delete files a script *used to* produce but no longer does. The
//! `OutputIndex` trait keeps the backing store an implementation detail —
//! [`sqlite::SqliteIndex`] is the only implementation, mirroring the way
//! `src/fs::Filesystem` decouples callers from `std::fs`/an in-memory
//! fixture.

pub mod sqlite;

use std::path::Path;

use crate::error::IndexError;

/// One tracked output file's persisted metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub size: u64,
    pub mtime: i64,
    pub flags: u32,
}

/// Persistent store of every output path a script run has produced, keyed by
/// normalised path. See distilled spec §4.7 for the exact contract; `clear()`
/// is equivalent to `close(); unlink; open()` per the original source's
/// `Database::clear`.
pub trait OutputIndex: Send + Sync {
    fn update_file(&self, path: &Path, record: FileRecord) -> Result<(), IndexError>;

    fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, IndexError>;

    fn set_flags(&self, path: &Path, flags: u32) -> Result<(), IndexError>;

    fn add_flags(&self, path: &Path, flags: u32) -> Result<(), IndexError>;

    fn set_all_flags(&self, flags: u32) -> Result<(), IndexError>;

    fn delete_file(&self, path: &Path) -> Result<(), IndexError>;

    /// Deletes every record matching `flags`: an exact `flags == 0` match when
    /// `flags` is zero, else a bitwise-AND match (any record sharing at least
    /// one bit with `flags`).
    fn delete_files_by_flag(&self, flags: u32) -> Result<(), IndexError>;

    /// Visits every tracked path whose flags match `flags` (same matching
    /// rule as [`OutputIndex::delete_files_by_flag`]) in deterministic
    /// (directory, then name) order. `visit` returning `false` stops the scan
    /// early.
    fn for_each_file_by_flag(
        &self,
        flags: u32,
        visit: &mut dyn FnMut(&Path, FileRecord) -> bool,
    ) -> Result<(), IndexError>;

    /// Removes directory rows with no remaining file rows.
    fn clean_up(&self) -> Result<(), IndexError>;

    /// Resets the index to its initial (empty) state.
    fn clear(&self) -> Result<(), IndexError>;
}
