//! Run Output
//!
//! Writes the distilled spec's §6 log block format and progress-line template.
//! This is domain-specified output framing, not a generic logging framework —
//! hand-written the way the teacher writes its own `ExecResult` output, rather
//! than built on `tracing`/`log` (SPEC_FULL.md §4.9).

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use crate::exec::{ExecutionReport, TransitionReport};
use crate::graph::ReasonFlags;
use crate::script::{CommandState, Verbosity};

/// Internal diagnostics and user-facing run output share this one event type,
/// leveled so a single sink (`Logger`) decides what actually gets written
/// instead of a second ambient logging layer sitting on top of it.
#[derive(Debug, Clone)]
pub enum RunEvent {
    Debug(String),
    Info(String),
    Warn(String),
    Error(String),
}

impl RunEvent {
    fn level(&self) -> Verbosity {
        match self {
            RunEvent::Debug(_) => Verbosity::Debug,
            RunEvent::Info(_) => Verbosity::Info,
            RunEvent::Warn(_) => Verbosity::Warn,
            RunEvent::Error(_) => Verbosity::Error,
        }
    }

    fn message(&self) -> &str {
        match self {
            RunEvent::Debug(m) | RunEvent::Info(m) | RunEvent::Warn(m) | RunEvent::Error(m) => m,
        }
    }
}

/// Where log and progress output is written, per `--verbosity`'s destination
/// (distilled spec §6: stdout, stderr, or a named file).
pub enum Destination {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Writes log blocks and progress lines to one destination, gated by
/// `verbosity`. Higher verbosity is a superset: `Debug` sees everything,
/// `Error` sees only `RunEvent::Error`.
pub struct Logger {
    verbosity: Verbosity,
    sink: Box<dyn Write + Send>,
}

impl Logger {
    pub fn new(destination: Destination, verbosity: Verbosity) -> io::Result<Self> {
        let sink: Box<dyn Write + Send> = match destination {
            Destination::Stdout => Box::new(io::stdout()),
            Destination::Stderr => Box::new(io::stderr()),
            Destination::File(path) => Box::new(File::create(path)?),
        };
        Ok(Self { verbosity, sink })
    }

    /// Emits a leveled diagnostic if it meets the configured verbosity.
    pub fn event(&mut self, event: &RunEvent) {
        if event.level() > self.verbosity {
            return;
        }
        let _ = writeln!(self.sink, "{}", event.message());
    }

    /// Writes one target's full log block: `process : <id> { ... }` containing
    /// every transition that leaf ran or skipped, in report order.
    pub fn write_process_block(&mut self, process_id: &str, transitions: &[&TransitionReport]) {
        if transitions.is_empty() {
            return;
        }
        let _ = writeln!(self.sink, "process : {process_id} {{");
        for t in transitions {
            self.write_transition(t);
        }
        let _ = writeln!(self.sink, "}}");
    }

    /// Step 1 of post-run maintenance (distilled spec §4.6): log every
    /// transition grouped by the process that owns it.
    pub fn log_report(&mut self, report: &ExecutionReport) {
        let mut by_process: Vec<(&str, Vec<&TransitionReport>)> = Vec::new();
        for t in &report.transitions {
            match by_process.iter_mut().find(|(id, _)| *id == t.process_id) {
                Some((_, list)) => list.push(t),
                None => by_process.push((&t.process_id, vec![t])),
            }
        }
        for (process_id, transitions) in by_process {
            self.write_process_block(process_id, &transitions);
        }
    }

    fn write_transition(&mut self, t: &TransitionReport) {
        if !t.ran {
            let missing: Vec<String> =
                t.dependency.iter().map(|p| p.lock().unwrap().path_string()).collect();
            let _ = writeln!(
                self.sink,
                "  [{}] skipped (missing: {})",
                reason_tag(t.reason),
                if missing.is_empty() { "none".to_string() } else { missing.join(", ") }
            );
            continue_if_missing_outputs(self, t);
            return;
        }
        self.write_commands_and_outputs(t);
    }

    fn write_commands_and_outputs(&mut self, t: &TransitionReport) {
        for c in &t.commands {
            let _ = writeln!(self.sink, "  [{}] {}", reason_tag(t.reason), c.command_text);
            for line in strip_cr_lines(&c.output) {
                let _ = writeln!(self.sink, "  | {line}");
            }
            let _ = writeln!(
                self.sink,
                "  -- start {} exit {} elapsed {:.2}s{}",
                c.start.format("%H:%M:%S"),
                c.exit_code,
                c.elapsed_secs(),
                if c.state == CommandState::Failed { " FAILED" } else { "" }
            );
        }
        continue_if_missing_outputs(self, t);
    }

    /// Writes a progress line if `bump_done` decided to report one.
    pub fn progress_line(&mut self, line: Option<String>) {
        if let Some(line) = line {
            let _ = writeln!(self.sink, "{line}");
        }
    }
}

fn continue_if_missing_outputs(logger: &mut Logger, t: &TransitionReport) {
    let missing: Vec<String> = t
        .output
        .iter()
        .filter(|p| {
            let guard = p.lock().unwrap();
            !guard.flags.contains(crate::graph::PathFlags::EXISTS)
        })
        .map(|p| p.lock().unwrap().path_string())
        .collect();
    if !missing.is_empty() {
        let _ = writeln!(logger.sink, "  expected but missing: {}", missing.join(", "));
    }
}

fn reason_tag(reason: ReasonFlags) -> String {
    let mut tag = String::new();
    if reason.contains(ReasonFlags::FORCED) {
        tag.push('F');
    }
    if reason.contains(ReasonFlags::MISSING) {
        tag.push('M');
    }
    if reason.contains(ReasonFlags::CHANGED) {
        tag.push('C');
    }
    tag
}

fn strip_cr_lines(output: &str) -> Vec<String> {
    crate::exec::command::strip_cr_for_log(output).lines().map(|l| l.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;
    use crate::graph::PathLiteral;
    use crate::value::StringLiteral;
    use std::sync::{Arc, Mutex};

    fn ran_transition() -> TransitionReport {
        let mut lit = PathLiteral::new(StringLiteral::literal("/work/out.txt", LineInfo::synthetic()));
        lit.flags.insert(crate::graph::PathFlags::EXISTS);
        TransitionReport {
            process_id: "build".to_string(),
            ran: true,
            reason: ReasonFlags::MISSING,
            commands: vec![crate::exec::scheduler::CommandReport {
                shell: "default".to_string(),
                command_text: "echo hi".to_string(),
                output: "hi\r\n".to_string(),
                exit_code: 0,
                state: CommandState::Finished,
                start: chrono::Local::now(),
                end: chrono::Local::now(),
            }],
            dependency: Vec::new(),
            output: vec![Arc::new(Mutex::new(lit))],
            line: LineInfo::synthetic(),
        }
    }

    #[test]
    fn reason_tag_orders_f_m_c() {
        let all = ReasonFlags::FORCED | ReasonFlags::MISSING | ReasonFlags::CHANGED;
        assert_eq!(reason_tag(all), "FMC");
        assert_eq!(reason_tag(ReasonFlags::MISSING), "M");
    }

    #[test]
    fn event_respects_verbosity_gate() {
        let mut logger = Logger::new(Destination::Stdout, Verbosity::Error).unwrap();
        logger.event(&RunEvent::Debug("should not print".to_string()));
        logger.event(&RunEvent::Error("should print".to_string()));
    }

    #[test]
    fn log_report_groups_by_process_id() {
        let report = ExecutionReport { transitions: vec![ran_transition()] };
        let mut logger = Logger::new(Destination::Stdout, Verbosity::Debug).unwrap();
        logger.log_report(&report);
    }
}
