//! Duplicate Output Detection
//!
//! Scans every transition's output paths across an execution tree and reports
//! any path produced by more than one transition, matching distilled spec
//! §4.3 item 3 / invariant 6.

use std::collections::HashMap;

use crate::error::{GraphError, LineInfo};
use crate::graph::path_literal::PathKey;
use crate::graph::transitions::Transition;

/// Returns `Ok(())` if every output path across `transitions` is produced by
/// exactly one transition, else the first `GraphError::DuplicateOutput` found
/// (with every offending transition's location, not just the first two).
pub fn check_no_duplicate_outputs(transitions: &[Transition]) -> Result<(), GraphError> {
    let mut producers: HashMap<PathKey, Vec<LineInfo>> = HashMap::new();
    for t in transitions {
        for output in &t.output {
            let key = PathKey(output.borrow().path_string());
            producers.entry(key).or_default().push(t.line.clone());
        }
    }
    for (key, locations) in producers {
        if locations.len() > 1 {
            return Err(GraphError::DuplicateOutput { path: key.0, locations });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::path_literal::PathLiteral;
    use crate::value::StringLiteral;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn transition_with_output(text: &str, line: u32) -> Transition {
        let li = LineInfo::new(std::sync::Arc::from("s.parallel"), line, 1);
        let output = Rc::new(RefCell::new(PathLiteral::new(StringLiteral::literal(text, li.clone()))));
        Transition { input: vec![], dependency: vec![], output: vec![output], commands: vec![], missing_input: vec![], line: li }
    }

    #[test]
    fn detects_duplicate_output_across_transitions() {
        let transitions = vec![transition_with_output("out.txt", 1), transition_with_output("out.txt", 5)];
        let err = check_no_duplicate_outputs(&transitions).unwrap_err();
        match err {
            GraphError::DuplicateOutput { path, locations } => {
                assert_eq!(path, "out.txt");
                assert_eq!(locations.len(), 2);
            }
            _ => panic!("expected DuplicateOutput"),
        }
    }

    #[test]
    fn unique_outputs_pass() {
        let transitions = vec![transition_with_output("a.txt", 1), transition_with_output("b.txt", 2)];
        assert!(check_no_duplicate_outputs(&transitions).is_ok());
    }
}
