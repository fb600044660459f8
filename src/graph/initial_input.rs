//! Initial Input Resolution
//!
//! Turns a `Chain::Leaf`'s argument list into the starting `PathLiteral` set a
//! process instance's top-level process blocks filter against: either a regex
//! matched against the filesystem, or an `@file` list of paths read line by line.
//! See distilled spec §4.3.1; original `Process::createInitialInputList`.

use std::path::Path;

use regex_lite::Regex;

use crate::error::{GraphError, LineInfo};
use crate::fs::Filesystem;
use crate::graph::path_literal::{PathFlags, PathLiteral, SharedPath};
use crate::value::StringLiteral;

use std::cell::RefCell;
use std::rc::Rc;

/// Resolves every argument in `args` and appends the result to `out`, in
/// declared order. Each skipped `@file` entry (path does not exist on disk)
/// appends a human-readable warning to `warnings`, which the caller (the CLI)
/// logs through its own `Logger` once all targets are resolved.
pub fn resolve_initial_input(
    args: &[StringLiteral],
    fs: &dyn Filesystem,
    cwd: &Path,
    full_recursive_match: bool,
    out: &mut Vec<SharedPath>,
    warnings: &mut Vec<String>,
) -> Result<(), GraphError> {
    for arg in args {
        let text = arg.get_string();
        if let Some(file_list) = text.strip_prefix('@') {
            resolve_from_file(file_list, &arg.line, fs, cwd, out, warnings)?;
        } else {
            resolve_from_regex(&text, &arg.line, fs, cwd, full_recursive_match, out)?;
        }
    }
    Ok(())
}

fn resolve_from_file(
    path: &str,
    line: &LineInfo,
    fs: &dyn Filesystem,
    cwd: &Path,
    out: &mut Vec<SharedPath>,
    warnings: &mut Vec<String>,
) -> Result<(), GraphError> {
    let list_path = resolve(cwd, path);
    let contents = fs.read_to_string(&list_path).map_err(|_| GraphError::FileNotFound {
        path: list_path.clone(),
        line: line.clone(),
    })?;
    for (idx, raw) in contents.lines().enumerate() {
        let entry = raw.trim();
        if entry.is_empty() {
            continue;
        }
        let candidate = resolve(cwd, entry);
        if !fs.exists(&candidate) {
            warnings.push(format!(
                "{}:{}: input file does not exist and will be ignored '{entry}'",
                list_path.display(),
                idx + 1
            ));
            continue;
        }
        out.push(make_path_literal(entry, line.clone(), fs, &candidate));
    }
    Ok(())
}

/// Matches `pattern` against the filesystem element by element: a literal
/// (non-regex) path segment navigates straight into that child, a segment
/// containing regex metacharacters enumerates every entry at that directory
/// level and recurses into matching directories for the remaining segments.
/// This is what lets a pattern like `"src/.*\.txt$"` match nested paths
/// instead of only bare filenames in `cwd` (distilled spec §4.3.1 "match
/// element-by-element"); `full-recursive-match` instead matches the whole
/// relative path against the pattern as one string, recursively.
fn resolve_from_regex(
    pattern: &str,
    line: &LineInfo,
    fs: &dyn Filesystem,
    cwd: &Path,
    full_recursive_match: bool,
    out: &mut Vec<SharedPath>,
) -> Result<(), GraphError> {
    let mut matches = Vec::new();
    if full_recursive_match {
        let re = Regex::new(pattern).map_err(|e| GraphError::Invariant {
            message: format!("invalid input filter regex '{pattern}': {e}"),
            line: line.clone(),
        })?;
        for candidate in fs.walk(cwd) {
            let rel = candidate.strip_prefix(cwd).unwrap_or(&candidate);
            let matched_text = rel.to_string_lossy().replace('\\', "/");
            if full_match(&re, &matched_text) {
                matches.push(candidate);
            }
        }
    } else {
        let segments: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        enumerate_segments(cwd, &segments, fs, line, &mut matches)?;
    }

    for candidate in matches {
        let display = candidate.to_string_lossy().replace('\\', "/");
        out.push(make_path_literal(&display, line.clone(), fs, &candidate));
    }
    Ok(())
}

fn full_match(re: &Regex, text: &str) -> bool {
    re.find(text).map(|m| m.start() == 0 && m.end() == text.len()).unwrap_or(false)
}

fn is_regex_segment(segment: &str) -> bool {
    segment.contains(['.', '[', '{', '(', ')', '*', '+', '?', '|', '^', '$'])
}

fn enumerate_segments(
    base: &Path,
    segments: &[&str],
    fs: &dyn Filesystem,
    line: &LineInfo,
    out: &mut Vec<std::path::PathBuf>,
) -> Result<(), GraphError> {
    let mut current = base.to_path_buf();
    let mut idx = 0;
    while idx < segments.len() && !is_regex_segment(segments[idx]) {
        current = current.join(segments[idx]);
        if !fs.exists(&current) {
            return Ok(());
        }
        idx += 1;
    }
    if idx == segments.len() {
        out.push(current);
        return Ok(());
    }

    let pattern = segments[idx];
    let re = Regex::new(pattern).map_err(|e| GraphError::Invariant {
        message: format!("invalid input filter regex '{pattern}': {e}"),
        line: line.clone(),
    })?;
    let remaining = &segments[idx + 1..];

    for child in fs.read_dir(&current) {
        let name = child.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        if !full_match(&re, &name) {
            continue;
        }
        if remaining.is_empty() {
            out.push(child);
        } else if fs.is_directory(&child) {
            enumerate_segments(&child, remaining, fs, line, out)?;
        }
    }
    Ok(())
}

fn resolve(cwd: &Path, raw: &str) -> std::path::PathBuf {
    let p = Path::new(raw);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

fn make_path_literal(
    text: &str,
    line: LineInfo,
    fs: &dyn Filesystem,
    real_path: &Path,
) -> SharedPath {
    let mut literal = PathLiteral::new(StringLiteral::literal(text, line));
    literal.flags.insert(PathFlags::PERMANENT | PathFlags::EXISTS);
    if let Some(meta) = fs.metadata(real_path) {
        literal.modified = Some(meta.modified);
    }
    Rc::new(RefCell::new(literal))
}
