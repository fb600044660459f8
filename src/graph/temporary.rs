//! Temporary File Propagation
//!
//! Two passes over every transition in an execution tree: bottom-up to learn
//! what a temporary file's *real* (non-temporary) inputs are and whether they
//! changed, top-down for its real outputs, then forced-flag propagation.
//! Mirrors `Execution::createTemporaryInputFileInfoMap` /
//! `createTemporaryOutputFileInfoMap` / `updateTemporaryCreationFlags` and
//! `Process::propagateForcedFlag` in the original source.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::graph::path_literal::{PathFlags, PathKey};
use crate::graph::transitions::Transition;

#[derive(Debug, Clone, Default)]
pub struct TemporaryFileInfo {
    pub all_input_exists: bool,
    pub input_was_modified: bool,
    pub most_recent_input_change: Option<SystemTime>,
    pub all_output_exists: bool,
    pub output_will_be_modified: bool,
    pub oldest_output_change: Option<SystemTime>,
}

/// Bottom-up: for every temporary output, collect its real (non-temporary)
/// input info, following through any temporary inputs that are themselves
/// outputs of an earlier transition. A fixed number of passes (bounded by the
/// transition count) is enough because the temporary dependency graph is
/// acyclic — it is a build graph, not a general graph.
pub fn build_input_info(transitions: &[Transition]) -> HashMap<PathKey, TemporaryFileInfo> {
    let mut map: HashMap<PathKey, TemporaryFileInfo> = HashMap::new();
    for _ in 0..transitions.len().max(1) {
        for t in transitions {
            for output in &t.output {
                let out_ref = output.borrow();
                if !out_ref.is_temporary() {
                    continue;
                }
                let key = PathKey(out_ref.path_string());
                drop(out_ref);
                let mut info = map.remove(&key).unwrap_or_default();
                info.all_input_exists = true;
                for input in &t.dependency {
                    let in_ref = input.borrow();
                    if in_ref.is_temporary() {
                        let ikey = PathKey(in_ref.path_string());
                        drop(in_ref);
                        if let Some(upstream) = map.get(&ikey).cloned() {
                            info.all_input_exists &= upstream.all_input_exists;
                            info.input_was_modified |= upstream.input_was_modified;
                            info.most_recent_input_change =
                                max_opt(info.most_recent_input_change, upstream.most_recent_input_change);
                        }
                    } else {
                        info.all_input_exists &= in_ref.flags.contains(PathFlags::EXISTS);
                        info.input_was_modified |= in_ref.flags.contains(PathFlags::MODIFIED);
                        if let Some(m) = in_ref.modified {
                            info.most_recent_input_change = max_opt(info.most_recent_input_change, Some(m));
                        }
                    }
                }
                map.insert(key, info);
            }
        }
    }
    map
}

/// Top-down counterpart: for every temporary input, collect its real outputs
/// downstream, following through chains of temporaries the other direction.
pub fn build_output_info(transitions: &[Transition]) -> HashMap<PathKey, TemporaryFileInfo> {
    let mut map: HashMap<PathKey, TemporaryFileInfo> = HashMap::new();
    for _ in 0..transitions.len().max(1) {
        for t in transitions.iter().rev() {
            for input in &t.dependency {
                let in_ref = input.borrow();
                if !in_ref.is_temporary() {
                    continue;
                }
                let key = PathKey(in_ref.path_string());
                drop(in_ref);
                let mut info = map.remove(&key).unwrap_or_default();
                info.all_output_exists = true;
                for output in &t.output {
                    let out_ref = output.borrow();
                    if out_ref.is_temporary() {
                        let okey = PathKey(out_ref.path_string());
                        drop(out_ref);
                        if let Some(downstream) = map.get(&okey).cloned() {
                            info.all_output_exists &= downstream.all_output_exists;
                            info.output_will_be_modified |= downstream.output_will_be_modified;
                            info.oldest_output_change = min_opt(info.oldest_output_change, downstream.oldest_output_change);
                        }
                    } else {
                        info.all_output_exists &= out_ref.flags.contains(PathFlags::EXISTS);
                        info.output_will_be_modified |=
                            out_ref.flags.contains(PathFlags::MODIFIED) || out_ref.flags.contains(PathFlags::FORCED);
                        if let Some(m) = out_ref.modified {
                            info.oldest_output_change = min_opt(info.oldest_output_change, Some(m));
                        }
                    }
                }
                map.insert(key, info);
            }
        }
    }
    map
}

/// Propagates the `FORCED` flag from any forced dependency onto all of that
/// transition's outputs, repeated until the temporary chain is fully covered.
pub fn propagate_forced_flag(transitions: &[Transition]) {
    for _ in 0..transitions.len().max(1) {
        for t in transitions {
            let has_forced_input = t.dependency.iter().any(|d| d.borrow().flags.contains(PathFlags::FORCED));
            if has_forced_input {
                for output in &t.output {
                    output.borrow_mut().flags.insert(PathFlags::FORCED);
                }
            }
        }
    }
}

fn max_opt(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

fn min_opt(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;
    use crate::graph::path_literal::PathLiteral;
    use crate::value::StringLiteral;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn permanent(text: &str, exists: bool) -> Rc<RefCell<PathLiteral>> {
        let mut lit = PathLiteral::new(StringLiteral::literal(text, LineInfo::synthetic()));
        lit.set_permanence(false);
        if exists {
            lit.flags.insert(PathFlags::EXISTS);
        }
        Rc::new(RefCell::new(lit))
    }

    fn temporary(text: &str) -> Rc<RefCell<PathLiteral>> {
        let mut lit = PathLiteral::new(StringLiteral::literal(text, LineInfo::synthetic()));
        lit.set_permanence(true);
        Rc::new(RefCell::new(lit))
    }

    #[test]
    fn forced_flag_propagates_to_output() {
        let mut input = PathLiteral::new(StringLiteral::literal("in", LineInfo::synthetic()));
        input.flags.insert(PathFlags::FORCED);
        let input = Rc::new(RefCell::new(input));
        let output = permanent("out", false);
        let t = Transition {
            input: vec![],
            dependency: vec![input],
            output: vec![output.clone()],
            commands: vec![],
            missing_input: vec![],
            line: LineInfo::synthetic(),
        };
        propagate_forced_flag(std::slice::from_ref(&t));
        assert!(output.borrow().flags.contains(PathFlags::FORCED));
    }

    #[test]
    fn input_info_tracks_existence_through_temporary_chain() {
        let real_in = permanent("real.txt", true);
        let temp_mid = temporary("mid.tmp");
        let t1 = Transition {
            input: vec![],
            dependency: vec![real_in],
            output: vec![temp_mid.clone()],
            commands: vec![],
            missing_input: vec![],
            line: LineInfo::synthetic(),
        };
        let final_out = permanent("final.txt", false);
        let t2 = Transition {
            input: vec![],
            dependency: vec![temp_mid],
            output: vec![final_out],
            commands: vec![],
            missing_input: vec![],
            line: LineInfo::synthetic(),
        };
        let transitions = vec![t1, t2];
        let info = build_input_info(&transitions);
        let mid_key = PathKey("mid.tmp".to_string());
        assert!(info.get(&mid_key).unwrap().all_input_exists);
    }
}
