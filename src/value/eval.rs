//! Variable Substitution & Folding
//!
//! Implements `replace_vars` and `fold` from distilled spec §4.1. Both are pure
//! functions over an owned [`StringLiteral`]; neither mutates scopes.

use std::path::Path;

use crate::error::{LineInfo, ValueError};
use crate::fs::Filesystem;
use crate::value::functions;
use crate::value::types::{CaptureGroup, DynamicSet, Part, ScopeStack, StringLiteral};

/// How the evaluator should react to a reference to an unknown, non-dynamic
/// variable. Mirrors the `variable-checking` pragma flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableChecking {
    Off,
    Warn,
    Error,
}

/// Result of [`replace_vars`]: the possibly-substituted literal, whether every
/// referenced non-dynamic variable was known, and (if not) the first offending
/// name, so the caller can apply `variable-checking` policy.
pub struct ReplaceResult {
    pub literal: StringLiteral,
    pub ok: bool,
    pub unknown_name: Option<String>,
}

/// Substitutes every `Var` part whose name is not in `dynamic` with its bound
/// value from `scopes`. A single top-level `Var` with no function chain and a
/// non-dynamic name is passthrough-substituted: the *whole* replacement literal
/// (including its regex captures) takes the place of the current one, preserving
/// this literal's own `line` (invariant 2 in distilled spec §8). `fs`/`cwd` are
/// forwarded to every function in a part's chain, so `exists`/`rexists` see the
/// real filesystem instead of silently falling back to a no-op.
pub fn replace_vars(
    lit: &StringLiteral,
    scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: Option<&dyn Filesystem>,
    cwd: &Path,
) -> Result<ReplaceResult, ValueError> {
    // Passthrough case: exactly one group, one part, a bare Var with no funcs.
    if lit.groups.len() == 1 && lit.groups[0].parts.len() == 1 {
        if let Part::Var { name, funcs } = &lit.groups[0].parts[0] {
            if funcs.is_empty() && !dynamic.contains(name) {
                return Ok(match scopes.lookup(name) {
                    Some(bound) => {
                        let mut replacement = bound.clone();
                        replacement.line = lit.line.clone();
                        ReplaceResult { literal: replacement, ok: true, unknown_name: None }
                    }
                    None => ReplaceResult {
                        literal: lit.clone(),
                        ok: false,
                        unknown_name: Some(name.clone()),
                    },
                });
            }
        }
    }

    // General case: splice substituted values into place, part by part.
    let mut out_groups = Vec::with_capacity(lit.groups.len());
    let mut ok = true;
    let mut unknown_name = None;
    for group in &lit.groups {
        let mut out_parts = Vec::with_capacity(group.parts.len());
        for part in &group.parts {
            match part {
                Part::Text(_) => out_parts.push(part.clone()),
                Part::Var { name, funcs } if dynamic.contains(name) => {
                    out_parts.push(Part::Var { name: name.clone(), funcs: funcs.clone() });
                }
                Part::Var { name, funcs } => match scopes.lookup(name) {
                    Some(bound) => {
                        // Splice the resolved text in; a function chain on this
                        // part runs over the substituted text right away, since
                        // `fold` only reduces already-resolved Text parts.
                        let value = bound.get_string();
                        let value = if funcs.is_empty() {
                            value
                        } else {
                            apply_funcs(&value, funcs, fs, cwd, &lit.line)?
                        };
                        out_parts.push(Part::Text(value));
                    }
                    None => {
                        ok = false;
                        if unknown_name.is_none() {
                            unknown_name = Some(name.clone());
                        }
                        out_parts.push(part.clone());
                    }
                },
            }
        }
        out_groups.push(CaptureGroup { names: group.names.clone(), parts: out_parts });
    }

    Ok(ReplaceResult {
        literal: StringLiteral::rebuild(
            out_groups,
            lit.regex_captures.clone(),
            lit.line.clone(),
            lit,
        ),
        ok,
        unknown_name,
    })
}

/// Applies a function chain to already-substituted text, in declared order,
/// against the real `fs`/`cwd` so `exists`/`rexists` resolve correctly instead
/// of reporting "no filesystem available".
fn apply_funcs(
    text: &str,
    funcs: &[crate::value::types::Func],
    fs: Option<&dyn Filesystem>,
    cwd: &Path,
    line: &LineInfo,
) -> Result<String, ValueError> {
    let mut value = text.to_string();
    for f in funcs {
        value = functions::apply(f, &value, fs, cwd, line)?;
    }
    Ok(value)
}

/// Normalises a literal's AST after [`replace_vars`] has already applied every
/// resolvable function chain: adjacent `Text` parts merge; when `final_pass` is
/// true, any remaining `Var` outside `dynamic` is dropped (it could not be
/// resolved and `variable-checking` has already reported it). A dynamic `Var`
/// survives every pass with its function chain intact, since its value (and
/// thus the chain's input) is only known once the caller resolves it per
/// transition. `fs`/`cwd` are accepted for that same reason — a future dynamic
/// resolution step applies the chain itself and needs them — but this pass
/// does no function application of its own.
pub fn fold(
    lit: &StringLiteral,
    final_pass: bool,
    dynamic: &DynamicSet,
    fs: Option<&dyn Filesystem>,
    cwd: &Path,
) -> Result<StringLiteral, ValueError> {
    let mut out_groups = Vec::with_capacity(lit.groups.len());
    for group in &lit.groups {
        let mut merged: Vec<Part> = Vec::new();
        for part in &group.parts {
            match part {
                Part::Text(s) => {
                    if let Some(Part::Text(prev)) = merged.last_mut() {
                        prev.push_str(s);
                    } else {
                        merged.push(Part::Text(s.clone()));
                    }
                }
                Part::Var { name, .. } => {
                    // Dynamic vars never fold away. A non-dynamic Var surviving
                    // to the final pass could not be resolved; drop it from the
                    // final AST (its absence was already reported upstream).
                    if final_pass && !dynamic.contains(name) {
                        continue;
                    }
                    merged.push(part.clone());
                }
            }
        }
        out_groups.push(CaptureGroup { names: group.names.clone(), parts: merged });
    }

    let _ = (fs, cwd); // kept for a future dynamic-variable resolution step; unused here
    Ok(StringLiteral::rebuild(
        out_groups,
        lit.regex_captures.clone(),
        lit.line.clone(),
        lit,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;
    use crate::value::types::Func;

    fn lit(s: &str) -> StringLiteral {
        StringLiteral::literal(s, LineInfo::synthetic())
    }

    #[test]
    fn passthrough_substitution_preserves_captures() {
        let mut scopes = ScopeStack::new();
        let mut bound = lit("hello");
        bound
            .regex_captures
            .insert("stem".to_string(), lit("world"));
        scopes.set("x", bound);

        let dynamic = DynamicSet::with_reserved();
        let reference = StringLiteral::single_var("x", vec![], LineInfo::synthetic());

        let result = replace_vars(&reference, &scopes, &dynamic, None, Path::new(".")).unwrap();
        assert!(result.ok);
        assert_eq!(result.literal.get_string(), "hello");
        assert_eq!(
            result.literal.regex_captures.get("stem").unwrap().get_string(),
            "world"
        );
    }

    #[test]
    fn function_chain_ordering() {
        let mut scopes = ScopeStack::new();
        scopes.set("x", lit("A/B"));
        let dynamic = DynamicSet::with_reserved();
        let reference = StringLiteral::single_var(
            "x",
            vec![Func::Lower, Func::Unix],
            LineInfo::synthetic(),
        );
        let result = replace_vars(&reference, &scopes, &dynamic, None, Path::new(".")).unwrap();
        assert_eq!(result.literal.get_string(), "a/b");
    }

    #[test]
    fn unknown_variable_is_reported() {
        let scopes = ScopeStack::new();
        let dynamic = DynamicSet::with_reserved();
        let reference = StringLiteral::single_var("missing", vec![], LineInfo::synthetic());
        let result = replace_vars(&reference, &scopes, &dynamic, None, Path::new(".")).unwrap();
        assert!(!result.ok);
        assert_eq!(result.unknown_name.as_deref(), Some("missing"));
    }

    #[test]
    fn exists_function_chain_sees_real_filesystem() {
        let mut mem = crate::fs::MemFilesystem::new();
        mem.add_file("/work/out.txt", "x");
        let mut scopes = ScopeStack::new();
        scopes.set("x", lit("out.txt"));
        let dynamic = DynamicSet::with_reserved();
        let reference =
            StringLiteral::single_var("x", vec![Func::Exists], LineInfo::synthetic());

        let result = replace_vars(&reference, &scopes, &dynamic, Some(&mem), Path::new("/work"))
            .unwrap();
        assert_eq!(result.literal.get_string(), "true");
    }

    #[test]
    fn exists_function_without_filesystem_errors() {
        let mut scopes = ScopeStack::new();
        scopes.set("x", lit("out.txt"));
        let dynamic = DynamicSet::with_reserved();
        let reference =
            StringLiteral::single_var("x", vec![Func::Exists], LineInfo::synthetic());

        let err = replace_vars(&reference, &scopes, &dynamic, None, Path::new(".")).unwrap_err();
        assert!(matches!(err, ValueError::InvalidValue { .. }));
    }

    #[test]
    fn fold_merges_adjacent_text() {
        let dynamic = DynamicSet::with_reserved();
        let literal = StringLiteral::from_parts(
            vec![Part::Text("a".into()), Part::Text("b".into())],
            LineInfo::synthetic(),
        );
        let folded = fold(&literal, false, &dynamic, None, Path::new(".")).unwrap();
        assert_eq!(folded.groups[0].parts.len(), 1);
        assert_eq!(folded.get_string(), "ab");
    }

    #[test]
    fn fold_is_idempotent() {
        let dynamic = DynamicSet::with_reserved();
        let literal = lit("hello world");
        let once = fold(&literal, true, &dynamic, None, Path::new(".")).unwrap();
        let twice = fold(&once, true, &dynamic, None, Path::new(".")).unwrap();
        assert_eq!(once.get_string(), twice.get_string());
    }
}
