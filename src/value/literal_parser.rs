//! String Literal Syntax
//!
//! Parses the `{name:func:func:...}` interpolation syntax embedded in a quoted
//! script string into a [`StringLiteral`] AST (distilled spec §3/§4.1). The
//! lexer (`script/lexer.rs`) already resolved `\"`/`\\` escapes; what's left
//! here is splitting `{...}` spans from literal text and parsing each span's
//! variable name and function chain.

use crate::error::{LineInfo, ScriptError};
use crate::value::types::{CaptureGroup, Func, Part, StringLiteral};

/// Parses one already-unescaped string body (the content between the quotes)
/// into a `StringLiteral` with a single (unnamed) capture group. Named/multiple
/// capture groups are attached later, when a filter match overlays its regex
/// captures onto the literal (see `graph::transitions`).
pub fn parse_literal(body: &str, line: LineInfo) -> Result<StringLiteral, ScriptError> {
    let chars: Vec<char> = body.chars().collect();
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '{' => {
                if !text.is_empty() {
                    parts.push(Part::Text(std::mem::take(&mut text)));
                }
                let start = i + 1;
                let mut depth = 1;
                let mut j = start;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                if j >= chars.len() {
                    return Err(ScriptError::Syntax {
                        message: "unterminated '{' in string literal".to_string(),
                        line,
                    });
                }
                let span: String = chars[start..j].iter().collect();
                parts.push(parse_var_span(&span, &line)?);
                i = j + 1;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    if !text.is_empty() {
        parts.push(Part::Text(text));
    }
    Ok(StringLiteral::from_parts(parts, line))
}

fn parse_var_span(span: &str, line: &LineInfo) -> Result<Part, ScriptError> {
    let mut segments = split_chain(span, line)?;
    if segments.is_empty() {
        return Err(ScriptError::Syntax {
            message: "empty '{}' reference in string literal".to_string(),
            line: line.clone(),
        });
    }
    let name = segments.remove(0);
    let mut funcs = Vec::with_capacity(segments.len());
    for seg in segments {
        funcs.push(parse_func(&seg, line)?);
    }
    Ok(Part::Var { name, funcs })
}

/// Splits a `{...}` span on `:`, except inside a `$<sep>...<sep>...<sep>`
/// regex-replace segment, whose separator character is user-chosen and may
/// itself be anything — including `:` — so that segment is recognised and
/// consumed whole before resuming the split.
fn split_chain(span: &str, line: &LineInfo) -> Result<Vec<String>, ScriptError> {
    let chars: Vec<char> = span.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut cur = String::new();
    while i < chars.len() {
        if chars[i] == '$' {
            // Regex-replace segment: $<sep><pattern><sep><replacement><sep>.
            if !cur.is_empty() {
                out.push(std::mem::take(&mut cur));
            }
            let seg_start = i;
            i += 1;
            let Some(&sep) = chars.get(i) else {
                return Err(ScriptError::Syntax {
                    message: "expected separator after '$'".to_string(),
                    line: line.clone(),
                });
            };
            i += 1;
            let mut end_positions = Vec::new();
            while i < chars.len() && end_positions.len() < 2 {
                if chars[i] == sep {
                    end_positions.push(i);
                }
                i += 1;
            }
            if end_positions.len() < 2 {
                return Err(ScriptError::Syntax {
                    message: "malformed regex-replace function".to_string(),
                    line: line.clone(),
                });
            }
            // Trailing separator, if present, just closes the segment.
            if i < chars.len() && chars[i] == sep {
                i += 1;
            }
            out.push(chars[seg_start..i].iter().collect());
            continue;
        }
        if chars[i] == ':' {
            out.push(std::mem::take(&mut cur));
            i += 1;
            continue;
        }
        cur.push(chars[i]);
        i += 1;
    }
    out.push(cur);
    Ok(out)
}

fn parse_func(seg: &str, line: &LineInfo) -> Result<Func, ScriptError> {
    if let Some(rest) = seg.strip_prefix('$') {
        let mut chars = rest.chars();
        let sep = chars.next().ok_or_else(|| ScriptError::Syntax {
            message: "expected separator after '$'".to_string(),
            line: line.clone(),
        })?;
        let body: String = chars.collect();
        let mut pieces = body.splitn(3, sep);
        let pattern = pieces.next().unwrap_or_default().to_string();
        let replacement = pieces.next().unwrap_or_default().to_string();
        return Ok(Func::RegexReplace { pattern, replacement, sep });
    }
    if let Some(rest) = seg.strip_prefix("rexists") {
        if rest.is_empty() {
            return Ok(Func::RegexExists { pattern: String::new() });
        }
        let mut chars = rest.chars();
        let sep = chars.next().unwrap();
        let body: String = chars.collect();
        let pattern = body.trim_end_matches(sep).to_string();
        return Ok(Func::RegexExists { pattern });
    }
    match seg {
        "win" => return Ok(Func::Win),
        "unix" => return Ok(Func::Unix),
        "native" => return Ok(Func::Native),
        "esc" => return Ok(Func::Esc),
        "upper" => return Ok(Func::Upper),
        "lower" => return Ok(Func::Lower),
        "directory" => return Ok(Func::Directory),
        "filename" => return Ok(Func::Filename),
        "file" => return Ok(Func::FileStem),
        "extension" => return Ok(Func::Extension),
        "exists" => return Ok(Func::Exists),
        _ => {}
    }
    // Substring: `<int>` or `<int>,<int>`.
    let mut parts = seg.splitn(2, ',');
    let start_str = parts.next().unwrap_or_default();
    let start: i64 = start_str.trim().parse().map_err(|_| ScriptError::Syntax {
        message: format!("unknown function '{}'", seg),
        line: line.clone(),
    })?;
    let len = match parts.next() {
        Some(l) => Some(l.trim().parse::<i64>().map_err(|_| ScriptError::Syntax {
            message: format!("invalid substring length in '{}'", seg),
            line: line.clone(),
        })?),
        None => None,
    };
    Ok(Func::Substr { start, len })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> LineInfo {
        LineInfo::synthetic()
    }

    #[test]
    fn parses_plain_text() {
        let lit = parse_literal("hello world", line()).unwrap();
        assert_eq!(lit.get_string(), "hello world");
    }

    #[test]
    fn parses_var_with_function_chain() {
        let lit = parse_literal("{?:directory}/{?:file}.out", line()).unwrap();
        assert_eq!(lit.groups[0].parts.len(), 4);
        match &lit.groups[0].parts[0] {
            Part::Var { name, funcs } => {
                assert_eq!(name, "?");
                assert_eq!(funcs, &vec![Func::Directory]);
            }
            _ => panic!("expected var"),
        }
    }

    #[test]
    fn parses_regex_replace_function() {
        let lit = parse_literal("{name:$/a/b/}", line()).unwrap();
        match &lit.groups[0].parts[0] {
            Part::Var { funcs, .. } => {
                assert_eq!(funcs.len(), 1);
                assert!(matches!(&funcs[0], Func::RegexReplace { pattern, replacement, sep }
                    if pattern == "a" && replacement == "b" && *sep == '/'));
            }
            _ => panic!("expected var"),
        }
    }

    #[test]
    fn parses_substring_function() {
        let lit = parse_literal("{x:-3,2}", line()).unwrap();
        match &lit.groups[0].parts[0] {
            Part::Var { funcs, .. } => {
                assert_eq!(funcs, &vec![Func::Substr { start: -3, len: Some(2) }]);
            }
            _ => panic!("expected var"),
        }
    }
}
