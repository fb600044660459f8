//! Configuration & Pre-Defined Variables
//!
//! Builds the outermost scope the parser starts from: the `PP_*` pre-defined
//! variables installed by the host before parsing begins (distilled spec §4.2,
//! SPEC_FULL.md §4.11).

use crate::error::LineInfo;
use crate::value::{DynamicSet, ScopeStack, StringLiteral};

/// Inputs the host (CLI front end) gathers before handing control to the parser.
pub struct PreludeInputs {
    pub script_path: String,
    pub targets: Vec<String>,
    pub threads: usize,
    pub extra_vars: Vec<(String, String)>,
}

fn os_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else {
        "unix"
    }
}

/// Installs `PP_PATH`, `PP_VERSION`, `PP_OS`, `PP_TIME`, `PP_DATE`, `PP_THREADS`,
/// `PP_TARGETS`, `PP_SCRIPT` into the outermost scope frame, and any
/// `KEY=VALUE` extras from the command line. `PP_TIME`/`PP_DATE` are sourced
/// once, at process start, from `chrono::Local::now()` — never re-evaluated per
/// transition (only `PP_THREAD` is dynamic).
pub fn prelude_scope(inputs: &PreludeInputs) -> ScopeStack {
    let mut scopes = ScopeStack::new();
    let line = LineInfo::synthetic();
    let now = chrono::Local::now();

    scopes.set("PP_PATH", StringLiteral::literal(inputs.script_path.clone(), line.clone()));
    scopes.set("PP_VERSION", StringLiteral::literal(env!("CARGO_PKG_VERSION"), line.clone()));
    scopes.set("PP_OS", StringLiteral::literal(os_name(), line.clone()));
    scopes.set("PP_TIME", StringLiteral::literal(now.format("%H:%M:%S").to_string(), line.clone()));
    scopes.set("PP_DATE", StringLiteral::literal(now.format("%Y-%m-%d").to_string(), line.clone()));
    scopes.set("PP_THREADS", StringLiteral::literal(inputs.threads.to_string(), line.clone()));
    scopes.set("PP_TARGETS", StringLiteral::literal(inputs.targets.join(" "), line.clone()));
    scopes.set("PP_SCRIPT", StringLiteral::literal(inputs.script_path.clone(), line.clone()));

    for (k, v) in &inputs.extra_vars {
        scopes.set(k.clone(), StringLiteral::literal(v.clone(), line.clone()));
    }

    scopes
}

/// The reserved dynamic names that are never substituted at parse time:
/// `?`, `*`, `@*`, `PP_THREAD`, plus any names declared dynamic in the script.
pub fn default_dynamic_set() -> DynamicSet {
    DynamicSet::with_reserved()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_installs_pp_variables() {
        let inputs = PreludeInputs {
            script_path: "process.parallel".to_string(),
            targets: vec!["default".to_string()],
            threads: 4,
            extra_vars: vec![("FOO".to_string(), "bar".to_string())],
        };
        let scopes = prelude_scope(&inputs);
        assert_eq!(scopes.lookup("PP_THREADS").unwrap().get_string(), "4");
        assert_eq!(scopes.lookup("PP_TARGETS").unwrap().get_string(), "default");
        assert_eq!(scopes.lookup("FOO").unwrap().get_string(), "bar");
    }
}
