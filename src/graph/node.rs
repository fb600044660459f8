//! Dependency Tree
//!
//! `ProcessNode` mirrors the shape `script::Chain` already gives an execution's
//! body (`Leaf`/`Dependency`/`Parallel`), carrying the per-process build state
//! needed to run and report on it. Traversal order follows original
//! `ProcessNode.hpp`: dependency links run left-before-right (the left side's
//! output feeds the right side's input), parallel siblings share the same
//! upstream input and run independently.

use crate::error::LineInfo;
use crate::graph::path_literal::SharedPath;
use crate::graph::transitions::ProcessInstance;
use crate::value::StringLiteral;

/// One leaf of the dependency tree: a reference to a declared process, its
/// resolved initial input, and (once built) the transitions it will run.
#[derive(Debug, Clone)]
pub struct ProcessElement {
    pub process_id: String,
    pub line: LineInfo,
    /// Raw `execution: id { process_name(args) }` arguments, unresolved.
    pub initial_input_args: Vec<StringLiteral>,
    /// True if this leaf also accepts upstream dependency output in addition to
    /// (or instead of, if `initial_input_args` is empty) its own resolved input.
    pub add_initial_input: bool,
    /// Input files, filled in two steps: resolved `initial_input_args` first
    /// (`graph::initial_input`), then upstream dependency output appended by
    /// `ProcessNode::resolve_dependencies`.
    pub input: Vec<SharedPath>,
    /// Filled in once `graph::transitions::create_dependency_list` runs.
    pub instance: Option<ProcessInstance>,
    pub forced: bool,
}

impl ProcessElement {
    pub fn new(process_id: impl Into<String>, line: LineInfo) -> Self {
        Self {
            process_id: process_id.into(),
            line,
            initial_input_args: Vec::new(),
            add_initial_input: false,
            input: Vec::new(),
            instance: None,
            forced: false,
        }
    }

    /// Output of this leaf's process instance, for feeding a downstream leaf.
    pub fn output(&self) -> Vec<SharedPath> {
        self.instance.as_ref().map(ProcessInstance::all_outputs).unwrap_or_default()
    }
}

/// The dependency/parallel tree built from one `execution: id { ... }` chain.
#[derive(Debug, Clone)]
pub enum ProcessNode {
    Leaf(ProcessElement),
    /// `left > right`: `right` runs only after `left` finishes, consuming its output.
    Dependency(Box<ProcessNode>, Box<ProcessNode>),
    /// `a | b | c`: every child runs concurrently against the same upstream input.
    Parallel(Vec<ProcessNode>),
}

impl ProcessNode {
    /// Depth-first pre-order traversal (declared order): used for printing and
    /// for dry-run listings, matching `traverseTopDown` in the original source.
    pub fn traverse_top_down(&self, level: usize, visit: &mut dyn FnMut(&ProcessElement, usize)) {
        match self {
            ProcessNode::Leaf(elem) => visit(elem, level),
            ProcessNode::Dependency(left, right) => {
                left.traverse_top_down(level + 1, visit);
                right.traverse_top_down(level + 1, visit);
            }
            ProcessNode::Parallel(nodes) => {
                for n in nodes {
                    n.traverse_top_down(level + 1, visit);
                }
            }
        }
    }

    /// Depth-first post-order (dependencies resolved before dependents), the
    /// traversal order `exec/scheduler.rs` runs: every node's children finish
    /// before `visit` is called on the node's own leaves.
    pub fn traverse_bottom_up(&self, level: usize, visit: &mut dyn FnMut(&ProcessElement, usize)) {
        match self {
            ProcessNode::Leaf(elem) => visit(elem, level),
            ProcessNode::Dependency(left, right) => {
                left.traverse_bottom_up(level + 1, visit);
                right.traverse_bottom_up(level + 1, visit);
            }
            ProcessNode::Parallel(nodes) => {
                for n in nodes {
                    n.traverse_bottom_up(level + 1, visit);
                }
            }
        }
    }

    pub fn traverse_top_down_mut(&mut self, level: usize, visit: &mut dyn FnMut(&mut ProcessElement, usize)) {
        match self {
            ProcessNode::Leaf(elem) => visit(elem, level),
            ProcessNode::Dependency(left, right) => {
                left.traverse_top_down_mut(level + 1, visit);
                right.traverse_top_down_mut(level + 1, visit);
            }
            ProcessNode::Parallel(nodes) => {
                for n in nodes {
                    n.traverse_top_down_mut(level + 1, visit);
                }
            }
        }
    }

    /// Seeds every leaf's `input` with the output produced by the dependency
    /// chain preceding it, running `build` on each leaf as soon as its final
    /// input set is known (so a later leaf can consume the transitions `build`
    /// just materialised). Returns this node's aggregate output, i.e. whichever
    /// of its leaves are the "last" ones reached by following the chain, for
    /// the caller to feed into whatever follows this node.
    ///
    /// Matches `traverseDependencies` in the original source, specialised to
    /// the binary `Dependency`/`Parallel` shape `script::Chain` already gives us
    /// instead of the flat dependency/parallel vectors the original walks.
    pub fn resolve_dependencies<E>(
        &mut self,
        upstream: &[SharedPath],
        build: &mut dyn FnMut(&mut ProcessElement, &[SharedPath]) -> Result<(), E>,
    ) -> Result<Vec<SharedPath>, E> {
        match self {
            ProcessNode::Leaf(elem) => {
                if elem.input.is_empty() || elem.add_initial_input {
                    elem.input.extend(upstream.iter().cloned());
                }
                build(elem, &elem.input.clone())?;
                Ok(elem.output())
            }
            ProcessNode::Dependency(left, right) => {
                let left_out = left.resolve_dependencies(upstream, build)?;
                right.resolve_dependencies(&left_out, build)
            }
            ProcessNode::Parallel(nodes) => {
                let mut combined = Vec::new();
                for n in nodes {
                    combined.extend(n.resolve_dependencies(upstream, build)?);
                }
                Ok(combined)
            }
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, ProcessNode::Leaf(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> ProcessNode {
        ProcessNode::Leaf(ProcessElement::new(id, LineInfo::synthetic()))
    }

    #[test]
    fn top_down_visits_dependency_in_declared_order() {
        let tree = ProcessNode::Dependency(Box::new(leaf("a")), Box::new(leaf("b")));
        let mut order = Vec::new();
        tree.traverse_top_down(0, &mut |elem, _| order.push(elem.process_id.clone()));
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn parallel_children_all_visited() {
        let tree = ProcessNode::Parallel(vec![leaf("a"), leaf("b"), leaf("c")]);
        let mut order = Vec::new();
        tree.traverse_top_down(0, &mut |elem, _| order.push(elem.process_id.clone()));
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn resolve_dependencies_propagates_empty_input_leaves() {
        let mut tree = ProcessNode::Dependency(Box::new(leaf("a")), Box::new(leaf("b")));
        let seen: std::cell::RefCell<Vec<String>> = std::cell::RefCell::new(Vec::new());
        let result: Result<Vec<SharedPath>, ()> = tree.resolve_dependencies(&[], &mut |elem, _input| {
            seen.borrow_mut().push(elem.process_id.clone());
            Ok(())
        });
        result.unwrap();
        assert_eq!(*seen.borrow(), vec!["a", "b"]);
    }
}
