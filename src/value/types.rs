//! Value Model Types
//!
//! `StringLiteral` is the one value type the whole script language has: an ordered
//! list of capture groups, each a list of [`Part`]s. See distilled spec §3/§4.1.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::LineInfo;

/// A transformation function applied to a substituted variable's value, in
/// declared order. Parsed once at parse time (never re-parsed per substitution).
#[derive(Debug, Clone, PartialEq)]
pub enum Func {
    Win,
    Unix,
    Native,
    Esc,
    Upper,
    Lower,
    RegexReplace { pattern: String, replacement: String, sep: char },
    Substr { start: i64, len: Option<i64> },
    Directory,
    Filename,
    FileStem,
    Extension,
    Exists,
    RegexExists { pattern: String },
}

/// One piece of a capture group: either literal text or a variable reference with
/// its function chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    Var { name: String, funcs: Vec<Func> },
}

/// One capture group: a set of capture names it is known under, plus its ordered
/// parts. Most string literals have exactly one (unnamed) capture group; named
/// groups are added by regex captures flowing in from `foreach`/`all` filters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CaptureGroup {
    pub names: Vec<String>,
    pub parts: Vec<Part>,
}

impl CaptureGroup {
    pub fn text(s: impl Into<String>) -> Self {
        Self { names: Vec::new(), parts: vec![Part::Text(s.into())] }
    }
}

/// A `StringLiteral`: set or unset, made of ordered capture groups, with a
/// side-map of named regex captures associated by a filter match. Two literals
/// compare equal iff their folded AST (post `fold`, see `value/eval.rs`) is equal.
#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub groups: Vec<CaptureGroup>,
    pub regex_captures: HashMap<String, StringLiteral>,
    pub line: LineInfo,
    set: bool,
}

impl StringLiteral {
    pub fn unset(line: LineInfo) -> Self {
        Self { groups: Vec::new(), regex_captures: HashMap::new(), line, set: false }
    }

    /// Constructs a literal from already-built parts, inheriting set/unset-ness
    /// from `like`. Used by the evaluator (`value/eval.rs`) when rebuilding a
    /// literal from its own groups without changing whether it is set.
    pub(crate) fn rebuild(
        groups: Vec<CaptureGroup>,
        regex_captures: HashMap<String, StringLiteral>,
        line: LineInfo,
        like: &StringLiteral,
    ) -> Self {
        Self { groups, regex_captures, line, set: like.set }
    }

    pub fn literal(s: impl Into<String>, line: LineInfo) -> Self {
        Self {
            groups: vec![CaptureGroup::text(s)],
            regex_captures: HashMap::new(),
            line,
            set: true,
        }
    }

    pub fn is_set(&self) -> bool {
        self.set
    }

    pub fn mark_set(&mut self) {
        self.set = true;
    }

    /// True iff any `Var` part survives substitution, i.e. the literal still
    /// contains an unresolved variable reference — either because it names a
    /// dynamic variable (resolved per-transition/per-worker rather than at parse
    /// time) or because substitution has simply not run yet.
    pub fn is_variable(&self, _dynamic: &DynamicSet) -> bool {
        self.groups
            .iter()
            .any(|g| g.parts.iter().any(|p| matches!(p, Part::Var { .. })))
    }

    /// Concatenated literal projection, ignoring unresolved `Var` parts' names
    /// (only valid to call after a `final` fold has removed them, or for display).
    pub fn get_string(&self) -> String {
        let mut out = String::new();
        for g in &self.groups {
            for p in &g.parts {
                match p {
                    Part::Text(s) => out.push_str(s),
                    Part::Var { name, .. } => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
            }
        }
        out
    }

    /// Names under which this literal is reachable as a regex capture (numeric or
    /// named groups collected from a filter match).
    pub fn capture_names(&self) -> Vec<&str> {
        self.groups.iter().flat_map(|g| g.names.iter().map(|s| s.as_str())).collect()
    }

    /// A literal consisting of a single `Var` reference, used by parser code and
    /// by tests that need to build a reference to a variable by hand.
    pub fn single_var(name: impl Into<String>, funcs: Vec<Func>, line: LineInfo) -> Self {
        Self {
            groups: vec![CaptureGroup {
                names: Vec::new(),
                parts: vec![Part::Var { name: name.into(), funcs }],
            }],
            regex_captures: HashMap::new(),
            line,
            set: true,
        }
    }

    /// A literal built from a raw list of parts in a single capture group, used
    /// by the parser and by tests exercising multi-part literals directly.
    pub fn from_parts(parts: Vec<Part>, line: LineInfo) -> Self {
        Self {
            groups: vec![CaptureGroup { names: Vec::new(), parts }],
            regex_captures: HashMap::new(),
            line,
            set: true,
        }
    }

    /// Builder: attaches a named regex capture to this literal.
    pub fn with_capture(mut self, name: impl Into<String>, value: StringLiteral) -> Self {
        self.regex_captures.insert(name.into(), value);
        self
    }
}

impl fmt::Display for StringLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_string())
    }
}

/// A stack of variable scopes, innermost last. Lookup is innermost-first, matching
/// invariant 1 in distilled spec §8: a binding defined in scope S is visible in S
/// and every nested scope, and disappears once S is popped.
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    frames: Vec<HashMap<String, StringLiteral>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { frames: vec![HashMap::new()] }
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: StringLiteral) {
        self.frames
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.into(), value);
    }

    pub fn unset(&mut self, name: &str) {
        for frame in self.frames.iter_mut().rev() {
            if frame.remove(name).is_some() {
                return;
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&StringLiteral> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// The set of names the evaluator never substitutes at parse time: user-declared
/// dynamic variables plus the reserved ones (`?`, `*`, `@*`, `PP_THREAD`).
#[derive(Debug, Clone, Default)]
pub struct DynamicSet {
    names: std::collections::HashSet<String>,
}

impl DynamicSet {
    pub fn with_reserved() -> Self {
        let mut names = std::collections::HashSet::new();
        for n in ["?", "*", "@*", "PP_THREAD"] {
            names.insert(n.to_string());
        }
        Self { names }
    }

    pub fn insert(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

/// Arc-friendly alias used whenever a `StringLiteral` needs to be shared without
/// cloning its whole part list (e.g. destinations referenced by multiple
/// transitions before the graph is frozen).
pub type SharedLiteral = Arc<StringLiteral>;
