//! Execution Scheduler
//!
//! Walks a built `ProcessNode` tree and runs its transitions concurrently,
//! translating the original source's `ProcessNode::executeChain` /
//! `executeDependency` / `executeParallel` / `executeSelf` continuation chain
//! into `async fn` recursion over a frozen, `Send`-safe copy of the tree.
//!
//! The graph builder works with `Rc<RefCell<PathLiteral>>` because it runs
//! single-threaded (distilled spec §5: "graph preparation is single-threaded,
//! execution is concurrent"). Before execution starts the tree is frozen via
//! [`crate::graph::freeze_paths`] into `Arc<Mutex<PathLiteral>>`-backed nodes
//! that tokio tasks can actually share.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use indexmap::IndexMap;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::error::LineInfo;
use crate::exec::command::{build_command, decode_output};
use crate::exec::progress::ProgressReporter;
use crate::exec::spawner::Spawner;
use crate::graph::{FrozenPath, PathFlags, ProcessElement, ProcessNode, ReasonFlags};
use crate::logging::Logger;
use crate::script::{Command, CommandState, Configuration, Shell};

/// A transition with its paths frozen for concurrent access, ready to run.
#[derive(Debug, Clone)]
pub struct FrozenTransition {
    pub dependency: Vec<FrozenPath>,
    pub output: Vec<FrozenPath>,
    pub commands: Vec<Command>,
    pub line: LineInfo,
}

/// One leaf's frozen transitions, tagged with the process it belongs to for
/// logging.
#[derive(Debug, Clone)]
pub struct ExecLeaf {
    pub process_id: String,
    pub transitions: Vec<FrozenTransition>,
}

/// `Send`-safe counterpart of [`ProcessNode`], built once by [`freeze`] before
/// the scheduler starts. Dependency/parallel children are `Arc`-owned so a
/// subtree can be handed to `tokio::spawn` without borrowing the parent.
#[derive(Debug, Clone)]
pub enum ExecNode {
    Leaf(ExecLeaf),
    Dependency(Arc<ExecNode>, Arc<ExecNode>),
    Parallel(Vec<Arc<ExecNode>>),
}

/// Freezes a built dependency tree into the `Arc`/`Mutex`-backed shape the
/// scheduler runs. Leaves with no resolved instance (shouldn't happen once
/// `build_execution_graph` has run, but defensively) freeze to an empty
/// transition list.
pub fn freeze(node: &ProcessNode) -> Arc<ExecNode> {
    Arc::new(match node {
        ProcessNode::Leaf(elem) => ExecNode::Leaf(freeze_leaf(elem)),
        ProcessNode::Dependency(left, right) => {
            ExecNode::Dependency(freeze(left), freeze(right))
        }
        ProcessNode::Parallel(nodes) => ExecNode::Parallel(nodes.iter().map(freeze).collect()),
    })
}

fn freeze_leaf(elem: &ProcessElement) -> ExecLeaf {
    let transitions = elem
        .instance
        .as_ref()
        .map(|instance| {
            instance
                .transitions
                .iter()
                .map(|t| FrozenTransition {
                    dependency: crate::graph::freeze_paths(&t.dependency),
                    output: crate::graph::freeze_paths(&t.output),
                    commands: t.commands.clone(),
                    line: t.line.clone(),
                })
                .collect()
        })
        .unwrap_or_default();
    ExecLeaf { process_id: elem.process_id.clone(), transitions }
}

/// Cooperative cancellation: set once by a signal handler, observed by every
/// worker between commands. `notify` wakes anything parked waiting on it
/// (nothing currently does, but it mirrors the distilled spec's
/// interruptible-wait framing and gives `cancel_and_wait` a hook).
pub struct CancelFlag {
    flag: AtomicBool,
    notify: Notify,
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self { flag: AtomicBool::new(false), notify: Notify::new() }
    }
}

impl CancelFlag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn signal(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Spawns the platform signal listeners that call [`CancelFlag::signal`] on
/// Ctrl-C (all platforms) and `SIGTERM` (Unix only), matching invariant 12 in
/// the distilled spec's §8.
pub fn install_signal_handlers(cancel: Arc<CancelFlag>) {
    let c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            c.signal();
        }
    });
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            if let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                if term.recv().await.is_some() {
                    cancel.signal();
                }
            }
        });
    }
}

/// Outcome of running one command within a transition.
#[derive(Debug, Clone)]
pub struct CommandReport {
    pub shell: String,
    pub command_text: String,
    pub output: String,
    pub exit_code: i32,
    pub state: CommandState,
    pub start: chrono::DateTime<chrono::Local>,
    pub end: chrono::DateTime<chrono::Local>,
}

impl CommandReport {
    pub fn elapsed_secs(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0
    }
}

/// Outcome of running (or skipping) one transition.
#[derive(Debug, Clone)]
pub struct TransitionReport {
    pub process_id: String,
    pub ran: bool,
    pub reason: ReasonFlags,
    pub commands: Vec<CommandReport>,
    pub dependency: Vec<FrozenPath>,
    pub output: Vec<FrozenPath>,
    pub line: LineInfo,
}

impl TransitionReport {
    pub fn succeeded(&self) -> bool {
        self.commands.iter().all(|c| c.exit_code == 0)
    }
}

/// Everything the scheduler observed while running one execution, handed to
/// `exec/complete.rs` and `logging.rs` afterwards.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub transitions: Vec<TransitionReport>,
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Ctx {
    shells: IndexMap<String, Shell>,
    config: Configuration,
    spawner: Arc<dyn Spawner>,
    progress: Arc<ProgressReporter>,
    logger: Arc<Mutex<Logger>>,
    cancel: Arc<CancelFlag>,
    cwd: std::path::PathBuf,
    out: Mutex<Vec<TransitionReport>>,
}

impl Ctx {
    /// Bumps the shared progress counter by one completed command and, if the
    /// 1 Hz gate allows it, writes the rendered line through the shared
    /// logger right away instead of waiting for the whole run to finish.
    fn report_command_done(&self) {
        if let Some(line) = self.progress.bump_done() {
            self.logger.lock().unwrap().progress_line(Some(line));
        }
    }
}

/// Runs every transition reachable from `root`, respecting dependency order
/// (sequential) and parallel siblings (concurrent), and returns every
/// transition's outcome in the order its leaf was visited. `progress`'s
/// `total` must already be the sum of command counts across every transition
/// in `root` (distilled spec §4.4), not the transition count, since `done` is
/// bumped once per completed command, streamed through `logger` as it runs.
pub async fn execute_tree(
    root: Arc<ExecNode>,
    shells: IndexMap<String, Shell>,
    config: Configuration,
    spawner: Arc<dyn Spawner>,
    progress: Arc<ProgressReporter>,
    logger: Arc<Mutex<Logger>>,
    cancel: Arc<CancelFlag>,
    cwd: std::path::PathBuf,
) -> ExecutionReport {
    let ctx =
        Arc::new(Ctx { shells, config, spawner, progress, logger, cancel, cwd, out: Mutex::new(Vec::new()) });
    execute_chain(root, ctx.clone()).await;
    ExecutionReport { transitions: ctx.out.lock().unwrap().drain(..).collect() }
}

fn execute_chain(node: Arc<ExecNode>, ctx: Arc<Ctx>) -> BoxFuture {
    Box::pin(async move {
        match &*node {
            ExecNode::Leaf(leaf) => execute_leaf(leaf, &ctx).await,
            ExecNode::Dependency(left, right) => {
                execute_chain(left.clone(), ctx.clone()).await;
                execute_chain(right.clone(), ctx).await;
            }
            ExecNode::Parallel(children) => {
                let mut set: JoinSet<()> = JoinSet::new();
                for child in children {
                    let child = child.clone();
                    let ctx = ctx.clone();
                    set.spawn(async move { execute_chain(child, ctx).await });
                }
                while set.join_next().await.is_some() {}
            }
        }
    })
}

async fn execute_leaf(leaf: &ExecLeaf, ctx: &Arc<Ctx>) {
    let mut set: JoinSet<TransitionReport> = JoinSet::new();
    for transition in leaf.transitions.clone() {
        let ctx = ctx.clone();
        let process_id = leaf.process_id.clone();
        set.spawn(async move { run_transition(process_id, transition, &ctx).await });
    }
    while let Some(joined) = set.join_next().await {
        if let Ok(report) = joined {
            ctx.out.lock().unwrap().push(report);
        }
    }
}

async fn run_transition(process_id: String, transition: FrozenTransition, ctx: &Ctx) -> TransitionReport {
    let (should_run, reason) = must_build_frozen(&transition, &ctx.config);
    if !should_run {
        // Nothing to run, but these commands were already counted into
        // `progress`'s total, so they need to count as done too.
        for _ in 0..transition.commands.len() {
            ctx.report_command_done();
        }
        return TransitionReport {
            process_id,
            ran: false,
            reason,
            commands: Vec::new(),
            dependency: transition.dependency,
            output: transition.output,
            line: transition.line,
        };
    }

    let mut reports = Vec::with_capacity(transition.commands.len());
    let mut stop = false;
    for command in &transition.commands {
        let start = chrono::Local::now();
        if stop || ctx.cancel.is_set() {
            reports.push(CommandReport {
                shell: command.shell.clone(),
                command_text: command.command.get_string(),
                output: String::new(),
                exit_code: -1,
                state: CommandState::Failed,
                start,
                end: start,
            });
            ctx.report_command_done();
            continue;
        }

        let shell = ctx.shells.get(&command.shell);
        let Some(shell) = shell else {
            reports.push(CommandReport {
                shell: command.shell.clone(),
                command_text: command.command.get_string(),
                output: String::new(),
                exit_code: -1,
                state: CommandState::Failed,
                start,
                end: start,
            });
            stop = true;
            ctx.report_command_done();
            continue;
        };

        let built = build_command(shell, &command.command.get_string());
        let result = ctx.spawner.run(&built.exe, &built.raw_cmdline, &ctx.cwd).await;
        let end = chrono::Local::now();
        match result {
            Ok(out) => {
                let text = decode_output(&out.stdout, shell.output_encoding);
                let state = if out.exit_code == 0 { CommandState::Finished } else { CommandState::Failed };
                if out.exit_code != 0 {
                    stop = true;
                }
                reports.push(CommandReport {
                    shell: command.shell.clone(),
                    command_text: command.command.get_string(),
                    output: text,
                    exit_code: out.exit_code,
                    state,
                    start,
                    end,
                });
            }
            Err(e) => {
                reports.push(CommandReport {
                    shell: command.shell.clone(),
                    command_text: command.command.get_string(),
                    output: e.to_string(),
                    exit_code: -1,
                    state: CommandState::Failed,
                    start,
                    end,
                });
                stop = true;
            }
        }
        ctx.report_command_done();
    }

    TransitionReport {
        process_id,
        ran: true,
        reason,
        commands: reports,
        dependency: transition.dependency,
        output: transition.output,
        line: transition.line,
    }
}

/// Frozen-path counterpart of [`crate::graph::must_build`]: same decision
/// (forced config, empty output, or any changed/missing/forced dependency or
/// output), reading through `Mutex` instead of `RefCell`.
fn must_build_frozen(transition: &FrozenTransition, config: &Configuration) -> (bool, ReasonFlags) {
    if config.build {
        return (true, ReasonFlags::FORCED);
    }
    if transition.output.is_empty() {
        return (true, ReasonFlags::MISSING);
    }
    let mut flags = ReasonFlags::empty();
    for path in transition.dependency.iter().chain(transition.output.iter()) {
        let guard = path.lock().unwrap();
        if guard.flags.contains(PathFlags::MODIFIED) {
            flags.insert(ReasonFlags::CHANGED);
        }
        if !(guard.flags.contains(PathFlags::EXISTS) || guard.flags.contains(PathFlags::TEMPORARY)) {
            flags.insert(ReasonFlags::MISSING);
        }
        if guard.flags.contains(PathFlags::FORCED) {
            flags.insert(ReasonFlags::FORCED);
        }
        if !flags.is_empty() {
            return (true, flags);
        }
    }
    (false, flags)
}

/// Current wall-clock time, used by the post-run maintenance pass to compare
/// against recorded mtimes. Kept here (rather than called inline via
/// `SystemTime::now()` everywhere) so tests can see the one call site.
pub fn now() -> SystemTime {
    SystemTime::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LineInfo;
    use crate::exec::spawner::RecordingSpawner;
    use crate::graph::PathLiteral;
    use crate::logging::Destination;
    use crate::value::StringLiteral;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn shells_with_default() -> IndexMap<String, Shell> {
        let mut shells = IndexMap::new();
        shells.insert("default".to_string(), Shell::default_unix(LineInfo::synthetic()));
        shells
    }

    fn test_logger() -> Arc<Mutex<Logger>> {
        Arc::new(Mutex::new(Logger::new(Destination::Stdout, crate::script::Verbosity::Debug).unwrap()))
    }

    fn leaf_with_one_command(output_exists: bool) -> Arc<ExecNode> {
        let mut output = PathLiteral::new(StringLiteral::literal("out.txt", LineInfo::synthetic()));
        if output_exists {
            output.flags.insert(PathFlags::EXISTS);
        }
        let shared: Rc<RefCell<PathLiteral>> = Rc::new(RefCell::new(output));
        let frozen = crate::graph::freeze_paths(std::slice::from_ref(&shared));
        let command = Command::new("default", StringLiteral::literal("echo hi", LineInfo::synthetic()));
        let transition = FrozenTransition {
            dependency: Vec::new(),
            output: frozen,
            commands: vec![command],
            line: LineInfo::synthetic(),
        };
        Arc::new(ExecNode::Leaf(ExecLeaf { process_id: "build".to_string(), transitions: vec![transition] }))
    }

    #[tokio::test]
    async fn runs_transition_when_output_missing() {
        let root = leaf_with_one_command(false);
        let spawner: Arc<dyn Spawner> = Arc::new(RecordingSpawner::new());
        let progress = Arc::new(ProgressReporter::new(1));
        let cancel = CancelFlag::new();
        let report = execute_tree(
            root,
            shells_with_default(),
            Configuration::default(),
            spawner,
            progress,
            test_logger(),
            cancel,
            std::path::PathBuf::from("/work"),
        )
        .await;
        assert_eq!(report.transitions.len(), 1);
        assert!(report.transitions[0].ran);
    }

    #[tokio::test]
    async fn skips_transition_when_output_already_fresh() {
        let root = leaf_with_one_command(true);
        let spawner: Arc<dyn Spawner> = Arc::new(RecordingSpawner::new());
        let progress = Arc::new(ProgressReporter::new(1));
        let cancel = CancelFlag::new();
        let report = execute_tree(
            root,
            shells_with_default(),
            Configuration::default(),
            spawner,
            progress,
            test_logger(),
            cancel,
            std::path::PathBuf::from("/work"),
        )
        .await;
        assert!(!report.transitions[0].ran);
    }

    fn leaf_with_two_commands() -> Arc<ExecNode> {
        let output = PathLiteral::new(StringLiteral::literal("out.txt", LineInfo::synthetic()));
        let shared: Rc<RefCell<PathLiteral>> = Rc::new(RefCell::new(output));
        let frozen = crate::graph::freeze_paths(std::slice::from_ref(&shared));
        let transition = FrozenTransition {
            dependency: Vec::new(),
            output: frozen,
            commands: vec![
                Command::new("default", StringLiteral::literal("echo one", LineInfo::synthetic())),
                Command::new("default", StringLiteral::literal("echo two", LineInfo::synthetic())),
            ],
            line: LineInfo::synthetic(),
        };
        Arc::new(ExecNode::Leaf(ExecLeaf { process_id: "build".to_string(), transitions: vec![transition] }))
    }

    #[tokio::test]
    async fn progress_total_counts_commands_not_transitions() {
        let root = leaf_with_two_commands();
        let spawner: Arc<dyn Spawner> = Arc::new(RecordingSpawner::new());
        let progress = Arc::new(ProgressReporter::new(2));
        let cancel = CancelFlag::new();
        execute_tree(
            root,
            shells_with_default(),
            Configuration::default(),
            spawner,
            progress.clone(),
            test_logger(),
            cancel,
            std::path::PathBuf::from("/work"),
        )
        .await;
        assert_eq!(progress.done(), 2);
        assert_eq!(progress.total(), 2);
    }

    #[tokio::test]
    async fn skipped_transition_still_counts_its_commands_done() {
        let root = leaf_with_two_commands();
        let spawner: Arc<dyn Spawner> = Arc::new(RecordingSpawner::new());
        let progress = Arc::new(ProgressReporter::new(2));
        let cancel = CancelFlag::new();
        let mut config = Configuration::default();
        // With a fresh, existing output and no dependencies, must_build_frozen
        // decides the transition needs no work.
        if let ExecNode::Leaf(leaf) = &*root {
            for t in &leaf.transitions {
                for output in &t.output {
                    output.lock().unwrap().flags.insert(PathFlags::EXISTS);
                }
            }
        }
        config.build = false;
        execute_tree(
            root,
            shells_with_default(),
            config,
            spawner,
            progress.clone(),
            test_logger(),
            cancel,
            std::path::PathBuf::from("/work"),
        )
        .await;
        assert_eq!(progress.done(), 2);
    }
}
