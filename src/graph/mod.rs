//! Dependency Graph
//!
//! Builds the per-execution dependency tree from a parsed `Script`: resolves
//! each leaf's initial input, walks the chain building transitions in
//! dependency order, then checks the whole tree for duplicate outputs and
//! propagates forced-build flags through temporary chains. See distilled spec
//! §4.3/§4.4.

pub mod duplicates;
pub mod initial_input;
pub mod node;
pub mod path_literal;
pub mod temporary;
pub mod transitions;

pub use node::{ProcessElement, ProcessNode};
pub use path_literal::{freeze_paths, FrozenPath, PathFlags, PathKey, PathLiteral, SharedPath};
pub use transitions::{must_build, ProcessInstance, ProcessState, ReasonFlags, Transition};

use std::path::Path;

use crate::error::{GraphError, LineInfo};
use crate::fs::Filesystem;
use crate::script::{Chain, Script};
use crate::value::{DynamicSet, ScopeStack};

/// Builds the dependency tree for one named execution: resolves every leaf's
/// initial input, materialises transitions along the chain (a leaf only
/// builds once its upstream's output is known), then validates the result.
/// Returns, alongside the tree, every warning raised while resolving initial
/// input (distilled spec §4.3.1: a skipped `@file` entry warns rather than
/// aborting) for the caller to log.
pub fn build_execution_graph(
    script: &Script,
    execution_id: &str,
    scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: &dyn Filesystem,
    cwd: &Path,
) -> Result<(ProcessNode, Vec<String>), GraphError> {
    let execution = script.executions.get(execution_id).ok_or_else(|| GraphError::Invariant {
        message: format!("unknown execution '{execution_id}'"),
        line: LineInfo::synthetic(),
    })?;

    let mut warnings = Vec::new();
    let mut node = build_node(
        &execution.chain,
        script,
        fs,
        cwd,
        script.config.full_recursive_match,
        &mut warnings,
    )?;

    node.resolve_dependencies(&[], &mut |elem: &mut ProcessElement, input: &[SharedPath]| -> Result<(), GraphError> {
        let process = script.processes.get(&elem.process_id).ok_or_else(|| GraphError::Invariant {
            message: format!("unknown process '{}'", elem.process_id),
            line: elem.line.clone(),
        })?;
        let instance =
            transitions::create_dependency_list(process, input, scopes, dynamic, fs, cwd, &script.config)?;
        elem.instance = Some(instance);
        Ok(())
    })?;

    let mut all = Vec::new();
    node.traverse_bottom_up(0, &mut |elem, _| {
        if let Some(instance) = &elem.instance {
            all.extend(instance.transitions.iter().cloned());
        }
    });
    temporary::propagate_forced_flag(&all);
    duplicates::check_no_duplicate_outputs(&all)?;

    Ok((node, warnings))
}

fn build_node(
    chain: &Chain,
    script: &Script,
    fs: &dyn Filesystem,
    cwd: &Path,
    full_recursive_match: bool,
    warnings: &mut Vec<String>,
) -> Result<ProcessNode, GraphError> {
    match chain {
        Chain::Leaf { name, args, forced } => {
            if !script.processes.contains_key(name) {
                return Err(GraphError::Invariant {
                    message: format!("execution chain references unknown process '{name}'"),
                    line: LineInfo::synthetic(),
                });
            }
            let mut elem = ProcessElement::new(name.clone(), LineInfo::synthetic());
            elem.forced = *forced;
            elem.initial_input_args = args.clone();
            initial_input::resolve_initial_input(
                args,
                fs,
                cwd,
                full_recursive_match,
                &mut elem.input,
                warnings,
            )?;
            Ok(ProcessNode::Leaf(elem))
        }
        Chain::Dependency(left, right) => {
            let l = build_node(left, script, fs, cwd, full_recursive_match, warnings)?;
            let r = build_node(right, script, fs, cwd, full_recursive_match, warnings)?;
            Ok(ProcessNode::Dependency(Box::new(l), Box::new(r)))
        }
        Chain::Parallel(nodes) => {
            let built: Result<Vec<_>, _> = nodes
                .iter()
                .map(|n| build_node(n, script, fs, cwd, full_recursive_match, warnings))
                .collect();
            Ok(ProcessNode::Parallel(built?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFilesystem;
    use crate::script::{BlockKind, Destination, Process, ProcessBlock};
    use indexmap::IndexMap;

    fn script_with_one_process() -> Script {
        let mut script = Script::new();
        let mut block = ProcessBlock::new(BlockKind::None, None, LineInfo::synthetic());
        block.destinations.insert(
            "out".to_string(),
            Destination { literal: crate::value::StringLiteral::literal("out.txt", LineInfo::synthetic()), temporary: false },
        );
        let process = Process { id: "build".to_string(), line: LineInfo::synthetic(), blocks: vec![block] };
        script.processes.insert("build".to_string(), process);
        let mut executions = IndexMap::new();
        executions.insert(
            "default".to_string(),
            crate::script::Execution {
                id: "default".to_string(),
                line: LineInfo::synthetic(),
                chain: Chain::Leaf { name: "build".to_string(), args: Vec::new(), forced: false },
            },
        );
        script.executions = executions;
        script
    }

    #[test]
    fn builds_single_leaf_execution_graph() {
        let script = script_with_one_process();
        let fs = MemFilesystem::new();
        let scopes = ScopeStack::new();
        let dynamic = DynamicSet::with_reserved();
        let (node, warnings) =
            build_execution_graph(&script, "default", &scopes, &dynamic, &fs, Path::new("/work")).unwrap();
        assert!(warnings.is_empty());
        let mut outputs = Vec::new();
        node.traverse_bottom_up(0, &mut |elem, _| outputs.extend(elem.output()));
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].borrow().path_string(), "out.txt");
    }
}
