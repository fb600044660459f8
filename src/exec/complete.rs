//! Post-Run Maintenance
//!
//! Runs synchronously on the calling thread once the scheduler's future
//! resolves, matching the original source's `Execution::complete` and the
//! distilled spec §4.6's five-step sequence. Log writing (step 1) is owned by
//! `logging.rs` instead, since it needs neither `Filesystem` nor
//! `OutputIndex` — the CLI front end calls it before these four steps run.
//!
//! Step 2/3 are grounded on `Process::createFlatDependentMap` /
//! `updateFlatDependentMap` in the original source's `Process.hpp`, but
//! simplified: the original tracks, per temporary output, the exact set of
//! dependency paths that produced it and erases them one at a time as their
//! owning transition finishes. Since every dependency path in that set
//! belongs to exactly one transition (the one that declared it), the set
//! becomes empty in a single step the moment that transition finishes
//! successfully and its output exists on disk — so this rendition tracks
//! only that boolean directly, without the intermediate per-dependency set.

use std::path::{Path, PathBuf};

use crate::exec::scheduler::{ExecutionReport, TransitionReport};
use crate::fs::Filesystem;
use crate::graph::PathFlags;
use crate::index::{FileRecord, OutputIndex};
use crate::script::{CommandState, Configuration};

/// What the maintenance pass actually did, for the CLI to fold into its exit
/// summary / debug log.
#[derive(Debug, Default)]
pub struct CompletionSummary {
    pub deleted_temporaries: Vec<PathBuf>,
    pub deleted_incompletes: Vec<PathBuf>,
    pub deleted_stale: Vec<PathBuf>,
}

fn transition_finished_ok(t: &TransitionReport) -> bool {
    t.ran && !t.commands.is_empty() && t.commands.iter().all(|c| c.state == CommandState::Finished)
}

/// Steps 2–4 of the distilled spec's post-run maintenance: delete settled
/// temporaries, then (if `clean_up_incompletes` is enabled) delete outputs
/// left behind by transitions that needed to run but didn't finish cleanly.
pub fn clean_up_local(
    report: &ExecutionReport,
    fs: &dyn Filesystem,
    config: &Configuration,
) -> CompletionSummary {
    let mut summary = CompletionSummary::default();

    if config.remove_temporaries {
        for t in &report.transitions {
            if !transition_finished_ok(t) {
                continue;
            }
            for output in &t.output {
                let guard = output.lock().unwrap();
                if !guard.is_temporary() {
                    continue;
                }
                let path = guard.to_path_buf();
                drop(guard);
                if fs.exists(&path) && fs.delete_file(&path).is_ok() {
                    summary.deleted_temporaries.push(path);
                }
            }
        }
    }

    if config.clean_up_incompletes {
        for t in &report.transitions {
            if !t.ran || transition_finished_ok(t) {
                continue;
            }
            for output in &t.output {
                let path = output.lock().unwrap().to_path_buf();
                if fs.exists(&path) && fs.delete_file(&path).is_ok() {
                    output.lock().unwrap().flags.remove(PathFlags::EXISTS);
                    summary.deleted_incompletes.push(path);
                }
            }
        }
    }

    summary
}

/// Step 5: reconcile the persistent output index against what this run
/// actually produced. Every record is marked stale (`flags = 1`), every
/// output this run produced is cleared (`flags = 0`), anything still marked
/// stale afterwards is a file the script used to produce but no longer does
/// and is deleted from disk and the index, then dangling directory rows are
/// pruned.
pub fn reconcile_index(
    report: &ExecutionReport,
    fs: &dyn Filesystem,
    index: &dyn OutputIndex,
    summary: &mut CompletionSummary,
) -> Result<(), crate::error::IndexError> {
    const STALE: u32 = 1;

    index.set_all_flags(STALE)?;

    for t in &report.transitions {
        for output in &t.output {
            let path = output.lock().unwrap().to_path_buf();
            let record = fs.metadata(&path).map(|m| FileRecord {
                size: m.len,
                mtime: m.modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0),
                flags: 0,
            });
            match record {
                Some(record) => index.update_file(&path, record)?,
                None => index.delete_file(&path)?,
            }
        }
    }

    let mut stale_paths: Vec<PathBuf> = Vec::new();
    index.for_each_file_by_flag(STALE, &mut |path: &Path, _record| {
        stale_paths.push(path.to_path_buf());
        true
    })?;

    for path in stale_paths {
        if fs.exists(&path) && fs.delete_file(&path).is_ok() {
            summary.deleted_stale.push(path.clone());
        }
        index.delete_file(&path)?;
    }

    index.clean_up()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;
    use crate::exec::scheduler::CommandReport;
    use crate::graph::PathLiteral;
    use crate::value::StringLiteral;
    use std::sync::{Arc, Mutex as StdMutex};

    fn frozen_temp(path: &str) -> Arc<StdMutex<PathLiteral>> {
        let mut lit = PathLiteral::new(StringLiteral::literal(path, LineInfo::synthetic()));
        lit.set_permanence(true);
        lit.flags.insert(PathFlags::EXISTS);
        Arc::new(StdMutex::new(lit))
    }

    fn finished_transition(process_id: &str, output: Arc<StdMutex<PathLiteral>>) -> TransitionReport {
        TransitionReport {
            process_id: process_id.to_string(),
            ran: true,
            reason: crate::graph::ReasonFlags::empty(),
            commands: vec![CommandReport {
                shell: "default".to_string(),
                command_text: "echo hi".to_string(),
                output: String::new(),
                exit_code: 0,
                state: CommandState::Finished,
                start: chrono::Local::now(),
                end: chrono::Local::now(),
            }],
            dependency: Vec::new(),
            output: vec![output],
            line: LineInfo::synthetic(),
        }
    }

    #[test]
    fn deletes_settled_temporary_output() {
        let mut mem = crate::fs::MemFilesystem::new();
        mem.add_file("/work/mid.tmp", "x");
        let output = frozen_temp("/work/mid.tmp");
        let report = ExecutionReport { transitions: vec![finished_transition("build", output)] };
        let mut config = Configuration::default();
        config.remove_temporaries = true;

        let summary = clean_up_local(&report, &mem, &config);
        assert_eq!(summary.deleted_temporaries.len(), 1);
        assert!(!mem.exists(Path::new("/work/mid.tmp")));
    }

    #[test]
    fn leaves_temporary_when_flag_disabled() {
        let mut mem = crate::fs::MemFilesystem::new();
        mem.add_file("/work/mid.tmp", "x");
        let output = frozen_temp("/work/mid.tmp");
        let report = ExecutionReport { transitions: vec![finished_transition("build", output)] };
        let config = Configuration::default();

        let summary = clean_up_local(&report, &mem, &config);
        assert!(summary.deleted_temporaries.is_empty());
        assert!(mem.exists(Path::new("/work/mid.tmp")));
    }

    #[test]
    fn cleans_up_incomplete_output_when_enabled() {
        let mut mem = crate::fs::MemFilesystem::new();
        mem.add_file("/work/out.txt", "partial");
        let mut lit = PathLiteral::new(StringLiteral::literal("/work/out.txt", LineInfo::synthetic()));
        lit.set_permanence(false);
        lit.flags.insert(PathFlags::EXISTS);
        let output = Arc::new(StdMutex::new(lit));
        let failing = TransitionReport {
            process_id: "build".to_string(),
            ran: true,
            reason: crate::graph::ReasonFlags::empty(),
            commands: vec![CommandReport {
                shell: "default".to_string(),
                command_text: "false".to_string(),
                output: String::new(),
                exit_code: 1,
                state: CommandState::Failed,
                start: chrono::Local::now(),
                end: chrono::Local::now(),
            }],
            dependency: Vec::new(),
            output: vec![output],
            line: LineInfo::synthetic(),
        };
        let report = ExecutionReport { transitions: vec![failing] };
        let mut config = Configuration::default();
        config.clean_up_incompletes = true;

        let summary = clean_up_local(&report, &mem, &config);
        assert_eq!(summary.deleted_incompletes.len(), 1);
        assert!(!mem.exists(Path::new("/work/out.txt")));
    }
}
