//! SQLite-Backed Output Index
//!
//! Persists the output index described in SPEC_FULL.md §4.8 as two tables —
//! `directory` and `file` — so a file's row can be pruned independently of
//! its directory row, matching the original source's `Database.cpp` split
//! (`getDirectoryIdInternal` / `getFileIdInternal`). Bundled via rusqlite's
//! `bundled` feature so the crate never needs a system SQLite install,
//! mirroring how the original source links `pcf::data::SQLite3` statically.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::IndexError;
use crate::index::{FileRecord, OutputIndex};

const SCHEMA_VERSION: i64 = 1;

/// `rusqlite::Connection` is `!Sync`; every mutating call serialises through
/// this mutex, matching SPEC_FULL.md §4.8's "serialised by a mutex held by
/// the index handle".
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Opens (creating if needed) the index at `path`. If the stored
    /// `schema_version` doesn't match [`SCHEMA_VERSION`], the whole file is
    /// dropped and recreated — `clear()`'s "close; unlink; open" semantics
    /// applied automatically on a layout mismatch.
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        let conn = Connection::open(path)?;
        let index = Self { conn: Mutex::new(conn) };
        index.ensure_schema(path)?;
        Ok(index)
    }

    fn ensure_schema(&self, path: &Path) -> Result<(), IndexError> {
        {
            let conn = self.conn.lock().unwrap();
            let version: Option<i64> = conn
                .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
                .optional()
                .unwrap_or(None);
            if version == Some(SCHEMA_VERSION) {
                return Ok(());
            }
        }
        self.recreate(path)
    }

    fn recreate(&self, path: &Path) -> Result<(), IndexError> {
        {
            let mut guard = self.conn.lock().unwrap();
            *guard = Connection::open_in_memory()?;
        }
        if path != Path::new(":memory:") && path.exists() {
            std::fs::remove_file(path).map_err(|e| IndexError::Path(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS directory (id INTEGER PRIMARY KEY, path TEXT UNIQUE NOT NULL);
             CREATE TABLE IF NOT EXISTS file (
                 id INTEGER PRIMARY KEY,
                 directory_id INTEGER NOT NULL REFERENCES directory(id),
                 name TEXT NOT NULL,
                 size INTEGER NOT NULL,
                 mtime INTEGER NOT NULL,
                 flags INTEGER NOT NULL DEFAULT 0,
                 UNIQUE(directory_id, name)
             );
             CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
        )?;
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
        *self.conn.lock().unwrap() = conn;
        Ok(())
    }

    fn split(path: &Path) -> (String, String) {
        let normalized = normalize(path);
        let buf = PathBuf::from(&normalized);
        let name = buf.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let dir = buf.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        (dir, name)
    }

    fn directory_id(conn: &Connection, dir: &str) -> rusqlite::Result<i64> {
        conn.execute("INSERT OR IGNORE INTO directory (path) VALUES (?1)", params![dir])?;
        conn.query_row("SELECT id FROM directory WHERE path = ?1", params![dir], |row| row.get(0))
    }
}

/// Case-insensitive on Windows, case-sensitive elsewhere, same rule
/// `graph::path_literal` applies to graph identity.
fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    let mut out = String::with_capacity(s.len());
    let mut last_was_slash = false;
    for c in s.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        out.push(c);
    }
    if cfg!(target_os = "windows") {
        out.to_ascii_lowercase()
    } else {
        out
    }
}

impl OutputIndex for SqliteIndex {
    fn update_file(&self, path: &Path, record: FileRecord) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let (dir, name) = Self::split(path);
        let dir_id = Self::directory_id(&conn, &dir)?;
        conn.execute(
            "INSERT INTO file (directory_id, name, size, mtime, flags) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(directory_id, name) DO UPDATE SET size = excluded.size, mtime = excluded.mtime, flags = excluded.flags",
            params![dir_id, name, record.size as i64, record.mtime, record.flags],
        )?;
        Ok(())
    }

    fn get_file(&self, path: &Path) -> Result<Option<FileRecord>, IndexError> {
        let conn = self.conn.lock().unwrap();
        let (dir, name) = Self::split(path);
        let result = conn
            .query_row(
                "SELECT file.size, file.mtime, file.flags FROM file
                 JOIN directory ON directory.id = file.directory_id
                 WHERE directory.path = ?1 AND file.name = ?2",
                params![dir, name],
                |row| {
                    Ok(FileRecord {
                        size: row.get::<_, i64>(0)? as u64,
                        mtime: row.get(1)?,
                        flags: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    fn set_flags(&self, path: &Path, flags: u32) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let (dir, name) = Self::split(path);
        conn.execute(
            "UPDATE file SET flags = ?1 WHERE directory_id = (SELECT id FROM directory WHERE path = ?2) AND name = ?3",
            params![flags, dir, name],
        )?;
        Ok(())
    }

    fn add_flags(&self, path: &Path, flags: u32) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let (dir, name) = Self::split(path);
        conn.execute(
            "UPDATE file SET flags = flags | ?1 WHERE directory_id = (SELECT id FROM directory WHERE path = ?2) AND name = ?3",
            params![flags, dir, name],
        )?;
        Ok(())
    }

    fn set_all_flags(&self, flags: u32) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE file SET flags = ?1", params![flags])?;
        Ok(())
    }

    fn delete_file(&self, path: &Path) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let (dir, name) = Self::split(path);
        conn.execute(
            "DELETE FROM file WHERE directory_id = (SELECT id FROM directory WHERE path = ?1) AND name = ?2",
            params![dir, name],
        )?;
        Ok(())
    }

    fn delete_files_by_flag(&self, flags: u32) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        if flags == 0 {
            conn.execute("DELETE FROM file WHERE flags = 0", [])?;
        } else {
            conn.execute("DELETE FROM file WHERE (flags & ?1) != 0", params![flags])?;
        }
        Ok(())
    }

    fn for_each_file_by_flag(
        &self,
        flags: u32,
        visit: &mut dyn FnMut(&Path, FileRecord) -> bool,
    ) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        let sql = if flags == 0 {
            "SELECT directory.path, file.name, file.size, file.mtime, file.flags FROM file
             JOIN directory ON directory.id = file.directory_id
             WHERE file.flags = 0 ORDER BY directory.path, file.name"
        } else {
            "SELECT directory.path, file.name, file.size, file.mtime, file.flags FROM file
             JOIN directory ON directory.id = file.directory_id
             WHERE (file.flags & ?1) != 0 ORDER BY directory.path, file.name"
        };
        let mut stmt = conn.prepare(sql)?;
        let mut rows = if flags == 0 { stmt.query([])? } else { stmt.query(params![flags])? };
        while let Some(row) = rows.next()? {
            let dir: String = row.get(0)?;
            let name: String = row.get(1)?;
            let record = FileRecord {
                size: row.get::<_, i64>(2)? as u64,
                mtime: row.get(3)?,
                flags: row.get(4)?,
            };
            let full = PathBuf::from(dir).join(name);
            if !visit(&full, record) {
                break;
            }
        }
        Ok(())
    }

    fn clean_up(&self) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM directory WHERE id NOT IN (SELECT DISTINCT directory_id FROM file)", [])?;
        Ok(())
    }

    fn clear(&self) -> Result<(), IndexError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM file", [])?;
        conn.execute("DELETE FROM directory", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrips_a_file_record() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        let index = SqliteIndex::open(&db_path).unwrap();
        let path = dir.path().join("out/build.txt");
        index.update_file(&path, FileRecord { size: 42, mtime: 1000, flags: 0 }).unwrap();

        let record = index.get_file(&path).unwrap().unwrap();
        assert_eq!(record.size, 42);
        assert_eq!(record.mtime, 1000);
    }

    #[test]
    fn delete_files_by_flag_matches_bitwise() {
        let dir = tempdir().unwrap();
        let index = SqliteIndex::open(&dir.path().join("index.db")).unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        index.update_file(&a, FileRecord { size: 1, mtime: 1, flags: 1 }).unwrap();
        index.update_file(&b, FileRecord { size: 1, mtime: 1, flags: 2 }).unwrap();

        index.delete_files_by_flag(1).unwrap();

        assert!(index.get_file(&a).unwrap().is_none());
        assert!(index.get_file(&b).unwrap().is_some());
    }

    #[test]
    fn clean_up_prunes_empty_directories() {
        let dir = tempdir().unwrap();
        let index = SqliteIndex::open(&dir.path().join("index.db")).unwrap();
        let path = dir.path().join("sub/out.txt");
        index.update_file(&path, FileRecord { size: 1, mtime: 1, flags: 0 }).unwrap();
        index.delete_file(&path).unwrap();
        index.clean_up().unwrap();

        let mut seen = 0;
        index.for_each_file_by_flag(0, &mut |_, _| {
            seen += 1;
            true
        }).unwrap();
        assert_eq!(seen, 0);
    }
}
