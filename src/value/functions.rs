//! Function Chain Table
//!
//! Implements each named transform function from distilled spec §4.1. Ordering is
//! preserved by [`Func`]: the caller applies each in declared order (see
//! `value/eval.rs::fold`).

use std::path::Path;

use regex_lite::Regex;

use crate::error::{LineInfo, ValueError};
use crate::fs::Filesystem;
use crate::value::types::Func;

/// Applies a single function to a string value. `fs`/`cwd` are only needed by
/// `exists`/`rexists`; every other function is pure.
pub fn apply(
    func: &Func,
    value: &str,
    fs: Option<&dyn Filesystem>,
    cwd: &Path,
    line: &LineInfo,
) -> Result<String, ValueError> {
    match func {
        Func::Win => Ok(value.replace('/', "\\")),
        Func::Unix => Ok(value.replace('\\', "/")),
        Func::Native => {
            if cfg!(target_family = "windows") {
                Ok(value.replace('/', "\\"))
            } else {
                Ok(value.replace('\\', "/"))
            }
        }
        Func::Esc => {
            let mut out = String::with_capacity(value.len());
            for c in value.chars() {
                if c == '\\' || c == '"' {
                    out.push('\\');
                }
                out.push(c);
            }
            Ok(out)
        }
        Func::Upper => Ok(value.to_uppercase()),
        Func::Lower => Ok(value.to_lowercase()),
        Func::RegexReplace { pattern, replacement, .. } => {
            let re = Regex::new(pattern).map_err(|e| ValueError::InvalidValue {
                func: "$".to_string(),
                message: e.to_string(),
                line: line.clone(),
            })?;
            Ok(re.replace_all(value, replacement.as_str()).into_owned())
        }
        Func::Substr { start, len } => Ok(substr(value, *start, *len)),
        Func::Directory => Ok(split_path(value).0),
        Func::Filename => Ok(split_path(value).1),
        Func::FileStem => Ok(file_stem(&split_path(value).1)),
        Func::Extension => Ok(extension(&split_path(value).1)),
        Func::Exists => {
            let fs = fs.ok_or_else(|| ValueError::InvalidValue {
                func: "exists".to_string(),
                message: "no filesystem available".to_string(),
                line: line.clone(),
            })?;
            let p = resolve(cwd, value);
            Ok(if fs.exists(&p) { "true".to_string() } else { "false".to_string() })
        }
        Func::RegexExists { pattern } => {
            let fs = fs.ok_or_else(|| ValueError::InvalidValue {
                func: "rexists".to_string(),
                message: "no filesystem available".to_string(),
                line: line.clone(),
            })?;
            let re = Regex::new(pattern).map_err(|e| ValueError::InvalidValue {
                func: "rexists".to_string(),
                message: e.to_string(),
                line: line.clone(),
            })?;
            let found = fs
                .walk(cwd)
                .into_iter()
                .any(|p| re.is_match(&p.to_string_lossy()));
            Ok(if found { "true".to_string() } else { "false".to_string() })
        }
    }
}

fn resolve(cwd: &Path, value: &str) -> std::path::PathBuf {
    let p = Path::new(value);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

/// Splits `value` into `(directory, filename)` the way the original source's
/// `Variable.cpp` path helpers do: directory keeps the trailing separator off,
/// filename is everything after the final `/` or `\`.
fn split_path(value: &str) -> (String, String) {
    match value.rfind(['/', '\\']) {
        Some(idx) => (value[..idx].to_string(), value[idx + 1..].to_string()),
        None => (String::new(), value.to_string()),
    }
}

/// Stem: filename without its final extension (the part after the last `.`,
/// provided the `.` isn't the first character — dotfiles have no stem split).
fn file_stem(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename[..idx].to_string(),
        _ => filename.to_string(),
    }
}

/// Extension including its leading dot, or empty string if there is none.
fn extension(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename[idx..].to_string(),
        _ => String::new(),
    }
}

/// Substring extraction with exact edge-case semantics, reproduced from the
/// original source's `StringLiteral::functionSubstr` (see DESIGN.md / SPEC_FULL.md
/// §9 item 7). Operates on Unicode scalar values (`char`), not bytes.
///
/// - 1-arg form (`len` is `None`): `start >= 0` is an absolute index; `start < 0`
///   counts back from the end, clamped to 0 if it would underflow.
/// - 2-arg form: `start, len` with `len < 0` meaning "stop `|len|` characters
///   before where `start + len` would land" (a negative length counts back from
///   `start`); a negative `start` counts from the end first, then `len` is applied.
/// - Any result with `start` out of range or an effective length of zero yields
///   the empty string.
pub fn substr(value: &str, start: i64, len: Option<i64>) -> String {
    let chars: Vec<char> = value.chars().collect();
    let n = chars.len() as i64;

    let (s_start, s_len): (i64, Option<i64>) = match len {
        Some(l) if l < 0 => {
            let n_start = if start < 0 { n + start + l } else { start + l };
            let mut n_len = l;
            let clamped_start = if n_start < 0 {
                n_len -= n_start;
                if n_len > 0 {
                    n_len = 0;
                }
                0
            } else {
                n_start
            };
            (clamped_start, Some(-n_len))
        }
        Some(l) => {
            if start < 0 {
                let n_start = n + start;
                if n_start < 0 {
                    let mut n_len = l + n + start;
                    if n_len < 0 {
                        n_len = 0;
                    }
                    (0, Some(n_len))
                } else {
                    (n_start, Some(l))
                }
            } else {
                (start, Some(l))
            }
        }
        None => {
            if start < 0 {
                if -start > n {
                    (0, None)
                } else {
                    (n + start, None)
                }
            } else {
                (start, None)
            }
        }
    };

    if s_start > n || s_start < 0 {
        return String::new();
    }
    let s_start = s_start as usize;
    match s_len {
        Some(l) if l <= 0 => String::new(),
        Some(l) => {
            let end = std::cmp::min(n as usize, s_start + l as usize);
            chars[s_start..end].iter().collect()
        }
        None => chars[s_start..].iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substr_one_arg_positive() {
        assert_eq!(substr("abcdef", 2, None), "cdef");
    }

    #[test]
    fn substr_one_arg_negative() {
        assert_eq!(substr("abcdef", -2, None), "ef");
    }

    #[test]
    fn substr_one_arg_negative_out_of_range() {
        assert_eq!(substr("abcdef", -20, None), "abcdef");
    }

    #[test]
    fn substr_two_arg_basic() {
        assert_eq!(substr("abcdef", 1, Some(3)), "bcd");
    }

    #[test]
    fn substr_two_arg_negative_start() {
        assert_eq!(substr("abcdef", -3, Some(2)), "de");
    }

    #[test]
    fn substr_two_arg_negative_len() {
        // start=4, len=-2 => stop 2 chars back from (start+len)=2: chars[2..4) = "cd"
        assert_eq!(substr("abcdef", 4, Some(-2)), "cd");
    }

    #[test]
    fn substr_zero_len_negative_start_is_empty() {
        assert_eq!(substr("abcdef", -3, Some(0)), "");
    }

    #[test]
    fn substr_out_of_range_start_is_empty() {
        assert_eq!(substr("abc", 10, Some(2)), "");
    }

    #[test]
    fn win_unix_esc() {
        assert_eq!(apply(&Func::Win, "a/b\\c", None, Path::new("/"), &LineInfo::synthetic()).unwrap(), "a\\b\\c");
        assert_eq!(apply(&Func::Unix, "a/b\\c", None, Path::new("/"), &LineInfo::synthetic()).unwrap(), "a/b/c");
        assert_eq!(apply(&Func::Esc, "a\"b\\c", None, Path::new("/"), &LineInfo::synthetic()).unwrap(), "a\\\"b\\\\c");
    }

    #[test]
    fn directory_filename_stem_extension() {
        assert_eq!(split_path("a/b/c.txt").0, "a/b");
        assert_eq!(split_path("a/b/c.txt").1, "c.txt");
        assert_eq!(file_stem("c.txt"), "c");
        assert_eq!(extension("c.txt"), ".txt");
        assert_eq!(extension(".bashrc"), "");
        assert_eq!(extension("noext"), "");
    }
}
