//! CLI Front End
//!
//! Argument parsing and run orchestration: reads the script, resolves each
//! target into a dependency tree, schedules it, logs the result, and performs
//! post-run maintenance. See distilled spec §6; SPEC_FULL.md §4.9.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;

use crate::error::{ExecError, PpError};
use crate::exec::command::build_command;
use crate::exec::complete::{self, CompletionSummary};
use crate::exec::progress::ProgressReporter;
use crate::exec::scheduler::{self, execute_tree, CancelFlag};
use crate::exec::spawner::ChildSpawner;
use crate::fs::OsFilesystem;
use crate::graph::{build_execution_graph, ProcessNode};
use crate::index::sqlite::SqliteIndex;
use crate::logging::{Destination, Logger, RunEvent};
use crate::script::{self, config::PreludeInputs, Script, Verbosity};
use crate::value::ScopeStack;

const LICENSE: &str = "parr: MIT OR Apache-2.0. See LICENSE for the full text.";

/// A parallel build runner driven by a small process/execution script.
#[derive(Parser, Debug)]
#[command(name = "parr")]
#[command(about = "A parallel build runner driven by a small process/execution script")]
pub struct Cli {
    /// Execution targets to run, and/or `KEY=VALUE` pairs added as script variables.
    args: Vec<String>,

    /// Force every transition to be treated as stale.
    #[arg(short = 'b', long = "build")]
    build: bool,

    /// Run as if invoked from this directory.
    #[arg(short = 'C', long = "change-directory", value_name = "DIR")]
    change_directory: Option<PathBuf>,

    /// Script file to read (`-` reads stdin).
    #[arg(short = 'f', long = "file", default_value = "process.parallel")]
    file: String,

    /// Worker count: an absolute number or `N%` of logical CPUs.
    #[arg(short = 'j', long = "jobs", value_name = "N")]
    jobs: Option<String>,

    /// Print the resolved command lines instead of running them.
    #[arg(short = 'n', long = "print-only")]
    print_only: bool,

    /// Log verbosity (default WARN; locks out any `@verbosity` pragma in the script).
    #[arg(short = 'v', long = "verbosity", value_name = "ERROR|WARN|INFO|DEBUG")]
    verbosity: Option<String>,

    /// Print license information and exit.
    #[arg(long = "license")]
    license: bool,
}

impl Cli {
    /// Splits `args` into execution target names and `KEY=VALUE` script variables.
    fn targets_and_vars(&self) -> (Vec<String>, Vec<(String, String)>) {
        let mut targets = Vec::new();
        let mut vars = Vec::new();
        for arg in &self.args {
            match arg.split_once('=') {
                Some((k, v)) => vars.push((k.to_string(), v.to_string())),
                None => targets.push(arg.clone()),
            }
        }
        if targets.is_empty() {
            targets.push("default".to_string());
        }
        (targets, vars)
    }
}

/// Resolves `--jobs` (absolute count or `N%` of logical CPUs) to a worker count,
/// falling back to all logical CPUs when unset or unparsable.
fn resolve_jobs(jobs: Option<&str>) -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    match jobs {
        None => cpus,
        Some(spec) => match spec.strip_suffix('%') {
            Some(pct) => pct
                .parse::<f64>()
                .map(|p| ((cpus as f64) * p / 100.0).round().max(1.0) as usize)
                .unwrap_or(cpus),
            None => spec.parse::<usize>().unwrap_or(cpus),
        },
    }
}

/// Reads the script text: `-` reads stdin, anything else goes through the real
/// filesystem (script reading happens before a `Filesystem` fixture could ever
/// matter, so this bypasses the trait rather than threading a fixture through
/// the CLI).
fn read_script(file: &str) -> std::io::Result<String> {
    if file == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(file)
    }
}

fn db_path(file: &str, scopes: &ScopeStack, cwd: &Path) -> PathBuf {
    match scopes.lookup("db") {
        Some(lit) if lit.is_set() => cwd.join(lit.get_string()),
        _ => cwd.join(format!("{file}.db")),
    }
}

/// Sums the command count across every transition in the tree: what the
/// scheduler's progress reporting treats as "done" once every command has run
/// (distilled spec §4.4 -- `total` is the sum of command counts, not a count
/// of transitions).
fn count_commands(node: &ProcessNode) -> u64 {
    let mut total = 0u64;
    node.traverse_bottom_up(0, &mut |elem, _| {
        if let Some(instance) = &elem.instance {
            total += instance.transitions.iter().map(|t| t.commands.len() as u64).sum::<u64>();
        }
    });
    total
}

/// Prints every transition's resolved command line without running it
/// (`--print-only`).
fn print_only_run(node: &ProcessNode, script: &Script) {
    node.traverse_bottom_up(0, &mut |elem, _| {
        let Some(instance) = &elem.instance else { return };
        for t in &instance.transitions {
            for command in &t.commands {
                let Some(shell) = script.shells.get(&command.shell) else { continue };
                let built = build_command(shell, &command.command.get_string());
                println!("{}: {} {}", elem.process_id, built.exe.display(), built.raw_cmdline);
            }
        }
    });
}

/// Entry point for `src/bin/parr.rs`: parses arguments, builds a tokio runtime
/// sized to `--jobs` (the distilled spec's "fixed worker pool of `jobs` OS
/// threads", §5), and runs every requested target on it. Returns the process
/// exit code.
pub fn main() -> i32 {
    let cli = Cli::parse();

    if cli.license {
        println!("{LICENSE}");
        return 0;
    }

    let threads = resolve_jobs(cli.jobs.as_deref());
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return 1;
        }
    };

    match runtime.block_on(run_targets(cli, threads)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

async fn run_targets(cli: Cli, threads: usize) -> Result<i32, PpError> {
    let cwd = match &cli.change_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    let (targets, extra_vars) = cli.targets_and_vars();

    let content = read_script(&cli.file).map_err(|e| {
        crate::error::ScriptError::Io { path: PathBuf::from(cli.file.clone()), message: e.to_string() }
    })?;

    let prelude = PreludeInputs {
        script_path: cli.file.clone(),
        targets: targets.clone(),
        threads,
        extra_vars,
    };
    let scopes = script::prelude_scope(&prelude);
    let dynamic = script::default_dynamic_set();
    let fs = OsFilesystem::new();

    let (mut parsed, scopes) =
        script::parse(&content, cli.file.clone(), &fs, &cwd, scopes, dynamic)?;

    if cli.build {
        parsed.config.build = true;
    }
    parsed.config.print_only = cli.print_only;
    if let Some(level) = cli.verbosity.as_deref() {
        if let Some(level) = Verbosity::parse(level) {
            parsed.config.locked_verbosity = true;
            parsed.config.verbosity = level;
        }
    }

    let logger = Arc::new(Mutex::new(
        Logger::new(Destination::Stderr, parsed.config.verbosity).map_err(ExecError::Spawn)?,
    ));
    let dynamic = script::default_dynamic_set();

    let mut any_command_failed = false;
    for target in &targets {
        let (node, warnings) = build_execution_graph(&parsed, target, &scopes, &dynamic, &fs, &cwd)?;
        for warning in &warnings {
            logger.lock().unwrap().event(&RunEvent::Warn(warning.clone()));
        }

        if parsed.config.print_only {
            print_only_run(&node, &parsed);
            continue;
        }

        let total = count_commands(&node);
        let frozen = scheduler::freeze(&node);
        let spawner: Arc<dyn crate::exec::Spawner> = Arc::new(ChildSpawner);
        let progress = Arc::new(ProgressReporter::new(total));
        let cancel = CancelFlag::new();
        scheduler::install_signal_handlers(cancel.clone());

        let report = execute_tree(
            frozen,
            parsed.shells.clone(),
            parsed.config.clone(),
            spawner,
            progress.clone(),
            logger.clone(),
            cancel,
            cwd.clone(),
        )
        .await;
        logger.lock().unwrap().progress_line(Some(progress.render_now()));

        if parsed.config.command_checking
            && report.transitions.iter().any(|t| t.ran && !t.succeeded())
        {
            any_command_failed = true;
        }

        logger.lock().unwrap().log_report(&report);

        let mut summary: CompletionSummary = complete::clean_up_local(&report, &fs, &parsed.config);
        if parsed.config.remove_remains {
            let index = SqliteIndex::open(&db_path(&cli.file, &scopes, &cwd))?;
            complete::reconcile_index(&report, &fs, &index, &mut summary)?;
        }
    }

    Ok(if any_command_failed { 1 } else { 0 })
}
