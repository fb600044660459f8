//! `PathLiteral` & Identity
//!
//! A `StringLiteral` standing for one filesystem path, plus the flag bitset and
//! mtime distilled spec §3 attaches to it. Shared across every `Transition`
//! that mentions the same path: `Rc<RefCell<_>>` while the graph is being built
//! single-threadedly, frozen to `Arc<Mutex<_>>` once execute begins (SPEC_FULL
//! §9 item 1). Map identity is the canonicalized path string (`PathKey`), never
//! pointer identity, matching the distilled spec's "comparison uses identity of
//! the pointed-to value" note.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use bitflags::bitflags;

use crate::value::StringLiteral;

bitflags! {
    /// Flags stored on a `PathLiteral` itself (as opposed to `ReasonFlags`,
    /// computed per-transition at execute time for log output).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PathFlags: u8 {
        const PERMANENT = 0b0000_0001;
        const TEMPORARY = 0b0000_0010;
        const MODIFIED  = 0b0000_0100;
        const FORCED    = 0b0000_1000;
        const EXISTS    = 0b0001_0000;
    }
}

/// Map key for graph lookups: the canonicalized path string. Two `PathLiteral`s
/// that resolve to the same path are the same graph node regardless of which
/// transition constructed them first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathKey(pub String);

impl PathKey {
    pub fn from_path(base: &Path, raw: &str) -> Self {
        let p = Path::new(raw);
        let joined = if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
        Self(normalize(&joined))
    }
}

/// Normalises a path for comparison: forward slashes, no duplicate separators,
/// case folded on Windows (distilled spec §4.7 schema-level invariant, reused
/// here for graph identity too).
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

/// One path known to the dependency graph: its resolved text (a `StringLiteral`
/// so regex captures stay attached), flags, and last-observed mtime.
#[derive(Debug, Clone)]
pub struct PathLiteral {
    pub value: StringLiteral,
    pub flags: PathFlags,
    pub modified: Option<SystemTime>,
}

impl PathLiteral {
    pub fn new(value: StringLiteral) -> Self {
        Self { value, flags: PathFlags::empty(), modified: None }
    }

    pub fn path_string(&self) -> String {
        self.value.get_string()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.path_string())
    }

    pub fn is_temporary(&self) -> bool {
        self.flags.contains(PathFlags::TEMPORARY)
    }

    pub fn is_permanent(&self) -> bool {
        self.flags.contains(PathFlags::PERMANENT)
    }

    /// Marks the path permanent or temporary, enforcing their mutual exclusion
    /// at the single construction site rather than on every later mutation.
    pub fn set_permanence(&mut self, temporary: bool) {
        if temporary {
            self.flags.remove(PathFlags::PERMANENT);
            self.flags.insert(PathFlags::TEMPORARY);
        } else {
            self.flags.remove(PathFlags::TEMPORARY);
            self.flags.insert(PathFlags::PERMANENT);
        }
    }
}

/// Shared handle during the single-threaded prepare phase.
pub type SharedPath = Rc<RefCell<PathLiteral>>;

/// Shared handle during the concurrent execute phase, after the graph is frozen.
pub type FrozenPath = Arc<Mutex<PathLiteral>>;

/// Freezes every `Rc<RefCell<PathLiteral>>` reachable from `paths` into
/// `Arc<Mutex<PathLiteral>>` handles, preserving sharing (two entries pointing
/// at the same `Rc` end up pointing at the same `Arc`).
pub fn freeze_paths(paths: &[SharedPath]) -> Vec<FrozenPath> {
    paths.iter().map(|p| Arc::new(Mutex::new(p.borrow().clone()))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;

    #[test]
    fn normalizes_duplicate_separators_and_backslashes() {
        let key = PathKey::from_path(Path::new("/work"), "a//b\\c");
        assert!(key.0.ends_with("a/b/c"));
    }

    #[test]
    fn permanence_flags_are_mutually_exclusive() {
        let mut p = PathLiteral::new(StringLiteral::literal("x", LineInfo::synthetic()));
        p.set_permanence(true);
        assert!(p.is_temporary());
        assert!(!p.is_permanent());
        p.set_permanence(false);
        assert!(p.is_permanent());
        assert!(!p.is_temporary());
    }
}
