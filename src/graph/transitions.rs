//! Transition Construction
//!
//! Turns one process block's `foreach`/`all`/`none` declaration plus a filtered
//! input set into concrete [`Transition`]s: resolved destination/dependency
//! paths, materialised commands, and the flags needed to decide whether the
//! transition must run. See distilled spec §4.3.2; original
//! `ProcessBlock::createTransitions` / `Process::createDependencyList`.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use bitflags::bitflags;
use regex_lite::Regex;

use crate::error::{GraphError, LineInfo, ValueError};
use crate::fs::Filesystem;
use crate::graph::path_literal::{PathFlags, PathLiteral, SharedPath};
use crate::script::{BlockKind, Command, Configuration, Process, ProcessBlock};
use crate::value::{fold, replace_vars, DynamicSet, ScopeStack, StringLiteral};

bitflags! {
    /// Per-transition reason bits driving the `[F--]`/`[-M-]`/`[--C]` log tag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReasonFlags: u8 {
        const FORCED  = 0b001;
        const MISSING = 0b010;
        const CHANGED = 0b100;
    }
}

/// One instance of a process block's work: its filtered input, the additional
/// dependency files, the destination files it produces, and the commands
/// needed to produce them.
#[derive(Debug, Clone)]
pub struct Transition {
    pub input: Vec<SharedPath>,
    pub dependency: Vec<SharedPath>,
    pub output: Vec<SharedPath>,
    pub commands: Vec<Command>,
    pub missing_input: Vec<String>,
    pub line: LineInfo,
}

/// Runtime state of a process across its transitions, separate from the static
/// `script::Process` declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Running,
    Finished,
    Failed,
}

/// The realised transitions for one `execution` leaf's process, plus its
/// runtime state.
#[derive(Debug, Clone)]
pub struct ProcessInstance {
    pub process_id: String,
    pub transitions: Vec<Transition>,
    pub state: ProcessState,
}

impl ProcessInstance {
    pub fn all_outputs(&self) -> Vec<SharedPath> {
        self.transitions.iter().flat_map(|t| t.output.iter().cloned()).collect()
    }
}

/// Decides whether `transition` needs to run, per distilled spec §4.3.2.
pub fn must_build(transition: &Transition, config: &Configuration) -> (bool, ReasonFlags) {
    let mut flags = ReasonFlags::empty();
    if config.build {
        flags.insert(ReasonFlags::FORCED);
        return (true, flags);
    }
    if transition.output.is_empty() {
        flags.insert(ReasonFlags::MISSING);
        return (true, flags);
    }
    for literal in transition.dependency.iter().chain(transition.output.iter()) {
        let l = literal.borrow();
        if l.flags.contains(PathFlags::MODIFIED) {
            flags.insert(ReasonFlags::CHANGED);
        }
        if !(l.flags.contains(PathFlags::EXISTS) || l.flags.contains(PathFlags::TEMPORARY)) {
            flags.insert(ReasonFlags::MISSING);
        }
        if l.flags.contains(PathFlags::FORCED) {
            flags.insert(ReasonFlags::FORCED);
        }
        if !flags.is_empty() {
            return (true, flags);
        }
    }
    (false, flags)
}

/// Builds every transition for `process` from its already-resolved `input`,
/// filling `process_scopes`-derived variables at each step. Mirrors
/// `Process::createDependencyList`.
pub fn create_dependency_list(
    process: &Process,
    input: &[SharedPath],
    global_scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: &dyn Filesystem,
    cwd: &Path,
    config: &Configuration,
) -> Result<ProcessInstance, GraphError> {
    let mut transitions = Vec::new();
    for block in &process.blocks {
        let built = create_transitions(block, input, global_scopes, dynamic, fs, cwd, config)?;
        transitions.extend(built);
    }
    Ok(ProcessInstance { process_id: process.id.clone(), transitions, state: ProcessState::Idle })
}

fn filter_input(block: &ProcessBlock, input: &[SharedPath]) -> Vec<SharedPath> {
    let filter = match &block.filter {
        Some(f) => f,
        None => return input.to_vec(),
    };
    let re = match Regex::new(&filter.pattern) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    let names: Vec<&str> = re.capture_names().flatten().collect();
    input
        .iter()
        .filter(|p| {
            let text = p.borrow().path_string();
            match re.captures(&text) {
                Some(caps) => {
                    let full = caps.get(0).map(|m| m.start() == 0 && m.end() == text.len()).unwrap_or(false);
                    if full && !filter.inverted && !names.is_empty() {
                        attach_captures(p, &caps, &names);
                    }
                    full != filter.inverted
                }
                None => filter.inverted,
            }
        })
        .cloned()
        .collect()
}

/// Overlays a filter match's named capture groups onto the matched literal,
/// so `{name}` resolves from the block scope (see `build_scope`).
fn attach_captures(p: &SharedPath, caps: &regex_lite::Captures, names: &[&str]) {
    let mut guard = p.borrow_mut();
    let line = guard.value.line.clone();
    let mut value = std::mem::replace(&mut guard.value, StringLiteral::unset(line.clone()));
    for name in names {
        if let Some(m) = caps.name(name) {
            value = value.with_capture(*name, StringLiteral::literal(m.as_str(), line.clone()));
        }
    }
    guard.value = value;
}

/// Builds transitions for one `foreach`/`all`/`none` block. A simplified but
/// semantically equivalent rendition of `ProcessBlock::createTransitions`: the
/// `outputDependsOnAll` dynamic-variable special case from the original is
/// folded into always checking whether a command references `*`/`@*` before
/// deciding a `foreach` transition's dependency set.
pub fn create_transitions(
    block: &ProcessBlock,
    input: &[SharedPath],
    global_scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: &dyn Filesystem,
    cwd: &Path,
    config: &Configuration,
) -> Result<Vec<Transition>, GraphError> {
    let filtered = filter_input(block, input);
    let depends_on_all = block
        .commands
        .iter()
        .any(|c| c.command.get_string().contains("{*}") || c.command.get_string().contains("{@*}"));

    match block.kind {
        BlockKind::None => {
            let scopes = build_scope(global_scopes, block, &[], config)?;
            let t = build_single_transition(block, &[], &scopes, dynamic, fs, cwd, config)?;
            Ok(vec![t])
        }
        BlockKind::All => {
            let scopes = build_scope(global_scopes, block, &filtered, config)?;
            let t = build_single_transition(block, &filtered, &scopes, dynamic, fs, cwd, config)?;
            Ok(vec![t])
        }
        BlockKind::Foreach => {
            let mut out = Vec::with_capacity(filtered.len());
            for literal in &filtered {
                let deps: Vec<SharedPath> = if depends_on_all { filtered.clone() } else { vec![literal.clone()] };
                let scopes = build_scope(global_scopes, block, std::slice::from_ref(literal), config)?;
                let mut t = build_single_transition(block, &deps, &scopes, dynamic, fs, cwd, config)?;
                t.input = vec![literal.clone()];
                out.push(t);
            }
            Ok(out)
        }
    }
}

/// Installs the block's captured scope, destinations, and dependencies into a
/// child scope derived from `global_scopes`, plus `?`/`*`/`@*` for the given
/// (already-filtered) input set.
fn build_scope(
    global_scopes: &ScopeStack,
    block: &ProcessBlock,
    literals: &[SharedPath],
    _config: &Configuration,
) -> Result<ScopeStack, GraphError> {
    let mut scopes = global_scopes.clone();
    scopes.push();
    for (name, value) in &block.captured_scope {
        scopes.set(name.clone(), value.clone());
    }
    if let Some(first) = literals.first() {
        let question = first.borrow().value.clone();
        for (name, value) in &question.regex_captures {
            scopes.set(name.clone(), value.clone());
        }
        scopes.set("?", question);
    }
    let joined = literals.iter().map(|p| p.borrow().path_string()).collect::<Vec<_>>().join(" ");
    let quoted = literals
        .iter()
        .map(|p| format!("\"{}\"", p.borrow().path_string().replace('\\', "\\\\").replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" ");
    scopes.set("*", StringLiteral::literal(joined, LineInfo::synthetic()));
    scopes.set("@*", StringLiteral::literal(quoted, LineInfo::synthetic()));
    Ok(scopes)
}

fn resolve_text(
    lit: &StringLiteral,
    scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: &dyn Filesystem,
    cwd: &Path,
) -> Result<String, ValueError> {
    let replaced = replace_vars(lit, scopes, dynamic, Some(fs), cwd)?;
    let folded = fold(&replaced.literal, true, dynamic, Some(fs), cwd)?;
    Ok(folded.get_string())
}

fn build_single_transition(
    block: &ProcessBlock,
    dependency_input: &[SharedPath],
    scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: &dyn Filesystem,
    cwd: &Path,
    config: &Configuration,
) -> Result<Transition, GraphError> {
    let mut scopes = scopes.clone();

    let mut dependency = dependency_input.to_vec();
    for (name, dep_lit) in &block.dependencies {
        let text = resolve_text(dep_lit, &scopes, dynamic, fs, cwd).map_err(|e| to_graph_error(e))?;
        let p = Path::new(&text);
        let resolved = if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };
        let mut literal = PathLiteral::new(StringLiteral::literal(text.clone(), block.line.clone()));
        if fs.exists(&resolved) {
            literal.flags.insert(PathFlags::PERMANENT | PathFlags::EXISTS);
            if let Some(meta) = fs.metadata(&resolved) {
                literal.modified = Some(meta.modified);
            }
        } else {
            return Err(GraphError::Invariant {
                message: format!("dependency file not found '{text}'"),
                line: block.line.clone(),
            });
        }
        let shared = Rc::new(RefCell::new(literal));
        let var_name = if name.is_empty() { "dependency" } else { name.as_str() };
        scopes.set(var_name, StringLiteral::literal(text, block.line.clone()));
        dependency.push(shared);
    }

    let mut output = Vec::new();
    for (name, dest) in &block.destinations {
        let text = resolve_text(&dest.literal, &scopes, dynamic, fs, cwd).map_err(|e| to_graph_error(e))?;
        let var_name = if name.is_empty() { "destination" } else { name.as_str() };
        scopes.set(var_name, StringLiteral::literal(text.clone(), block.line.clone()));
        let p = Path::new(&text);
        let resolved = if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };
        let mut literal = PathLiteral::new(StringLiteral::literal(text, block.line.clone()));
        literal.set_permanence(dest.temporary);
        if fs.exists(&resolved) {
            literal.flags.insert(PathFlags::EXISTS);
            if let Some(meta) = fs.metadata(&resolved) {
                literal.modified = Some(meta.modified);
            }
        }
        if !literal.flags.contains(PathFlags::EXISTS) || config.build {
            literal.flags.insert(PathFlags::MODIFIED);
            if config.build {
                literal.flags.insert(PathFlags::FORCED);
            }
        }
        output.push(Rc::new(RefCell::new(literal)));
    }

    // Invariant 10's mtime tolerance: an existing output is stale (and so
    // marked MODIFIED, same as a missing one) if any dependency is at least
    // one second newer than it.
    const STALE_TOLERANCE: std::time::Duration = std::time::Duration::from_secs(1);
    for out_lit in &output {
        let out_mtime = {
            let out_ref = out_lit.borrow();
            if !out_ref.flags.contains(PathFlags::EXISTS) {
                continue;
            }
            out_ref.modified
        };
        let Some(out_mtime) = out_mtime else { continue };
        let stale = dependency.iter().any(|dep| {
            dep.borrow().modified.map(|m| m >= out_mtime + STALE_TOLERANCE).unwrap_or(false)
        });
        if stale {
            out_lit.borrow_mut().flags.insert(PathFlags::MODIFIED);
        }
    }

    let mut commands = Vec::with_capacity(block.commands.len());
    for cmd in &block.commands {
        let text = resolve_text(&cmd.command, &scopes, dynamic, fs, cwd).map_err(|e| to_graph_error(e))?;
        let mut c = Command::new(cmd.shell.clone(), StringLiteral::literal(text, cmd.command.line.clone()));
        c.state = cmd.state;
        commands.push(c);
    }

    Ok(Transition { input: dependency_input.to_vec(), dependency, output, commands, missing_input: Vec::new(), line: block.line.clone() })
}

fn to_graph_error(e: ValueError) -> GraphError {
    match e {
        ValueError::UnknownVariable { name, line } => {
            GraphError::Invariant { message: format!("unknown variable '{name}'"), line }
        }
        ValueError::InvalidValue { func, message, line } => {
            GraphError::Invariant { message: format!("invalid value for '{func}': {message}"), line }
        }
        ValueError::OutOfRange { message, line } => GraphError::Invariant { message, line },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{BlockKind, Destination, Filter};

    fn path(text: &str) -> SharedPath {
        let mut lit = PathLiteral::new(StringLiteral::literal(text, LineInfo::synthetic()));
        lit.flags.insert(PathFlags::PERMANENT | PathFlags::EXISTS);
        Rc::new(RefCell::new(lit))
    }

    #[test]
    fn none_block_produces_single_transition_with_destination() {
        let mut block = ProcessBlock::new(BlockKind::None, None, LineInfo::synthetic());
        block.destinations.insert(
            "out".to_string(),
            Destination { literal: StringLiteral::literal("out.txt", LineInfo::synthetic()), temporary: false },
        );
        let fs = crate::fs::MemFilesystem::new();
        let scopes = ScopeStack::new();
        let dynamic = DynamicSet::with_reserved();
        let config = Configuration::default();
        let transitions =
            create_transitions(&block, &[], &scopes, &dynamic, &fs, Path::new("/work"), &config).unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].output.len(), 1);
        assert_eq!(transitions[0].output[0].borrow().path_string(), "out.txt");
    }

    #[test]
    fn foreach_block_creates_one_transition_per_input() {
        let block = ProcessBlock::new(
            BlockKind::Foreach,
            Some(Filter { pattern: r".*\.rs".to_string(), inverted: false }),
            LineInfo::synthetic(),
        );
        let input = vec![path("a.rs"), path("b.rs"), path("c.txt")];
        let fs = crate::fs::MemFilesystem::new();
        let scopes = ScopeStack::new();
        let dynamic = DynamicSet::with_reserved();
        let config = Configuration::default();
        let transitions =
            create_transitions(&block, &input, &scopes, &dynamic, &fs, Path::new("/work"), &config).unwrap();
        assert_eq!(transitions.len(), 2);
    }

    #[test]
    fn foreach_named_capture_resolves_as_scope_variable() {
        let mut block = ProcessBlock::new(
            BlockKind::Foreach,
            Some(Filter { pattern: r"(?<stem>.*)\.bak".to_string(), inverted: false }),
            LineInfo::synthetic(),
        );
        block.destinations.insert(
            String::new(),
            Destination {
                literal: StringLiteral::single_var("stem", vec![], LineInfo::synthetic()),
                temporary: false,
            },
        );
        let input = vec![path("note.bak")];
        let fs = crate::fs::MemFilesystem::new();
        let scopes = ScopeStack::new();
        let dynamic = DynamicSet::with_reserved();
        let config = Configuration::default();
        let transitions =
            create_transitions(&block, &input, &scopes, &dynamic, &fs, Path::new("/work"), &config).unwrap();
        assert_eq!(transitions.len(), 1);
        assert_eq!(transitions[0].output[0].borrow().path_string(), "note");
    }

    #[test]
    fn bare_destination_assignment_binds_destination_variable() {
        let mut block = ProcessBlock::new(BlockKind::None, None, LineInfo::synthetic());
        block.destinations.insert(
            String::new(),
            Destination { literal: StringLiteral::literal("out.txt", LineInfo::synthetic()), temporary: false },
        );
        block.commands.push(Command::new(
            "default".to_string(),
            StringLiteral::single_var("destination", vec![], LineInfo::synthetic()),
        ));
        let fs = crate::fs::MemFilesystem::new();
        let scopes = ScopeStack::new();
        let dynamic = DynamicSet::with_reserved();
        let config = Configuration::default();
        let transitions =
            create_transitions(&block, &[], &scopes, &dynamic, &fs, Path::new("/work"), &config).unwrap();
        assert_eq!(transitions[0].commands[0].command.get_string(), "out.txt");
    }

    #[test]
    fn must_build_flags_missing_output() {
        let t = Transition {
            input: Vec::new(),
            dependency: Vec::new(),
            output: Vec::new(),
            commands: Vec::new(),
            missing_input: Vec::new(),
            line: LineInfo::synthetic(),
        };
        let (needs, flags) = must_build(&t, &Configuration::default());
        assert!(needs);
        assert!(flags.contains(ReasonFlags::MISSING));
    }
}
