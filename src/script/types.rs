//! Script Data Model
//!
//! The in-memory representation the parser builds and the graph builder reads:
//! shells, commands, process blocks, processes, and execution chains. See
//! distilled spec §3/§4.2; original `Shell.hpp`/`Process.hpp`/`ProcessBlock.hpp`.

use indexmap::IndexMap;

use crate::error::LineInfo;
use crate::value::StringLiteral;

/// Output encoding a shell's captured child output is assumed to be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEncoding {
    Utf8,
    Utf16,
}

/// One `<sep><regex><sep><repl><sep>` replacement rule, applied in declared
/// order to the substituted command text before it is spliced into the shell's
/// `cmdline` template.
#[derive(Debug, Clone)]
pub struct ReplaceRule {
    pub pattern: String,
    pub replacement: String,
}

/// A named shell: how a process block's commands are turned into an invocable
/// executable + argument string. `@shell <id> { ... }` declares one; a default
/// is installed per platform before parsing (§4.2).
#[derive(Debug, Clone)]
pub struct Shell {
    pub id: String,
    pub path: StringLiteral,
    pub cmdline: StringLiteral,
    pub replacements: Vec<ReplaceRule>,
    pub output_encoding: OutputEncoding,
    pub raw_cmdline: bool,
}

impl Shell {
    /// The POSIX default: `/bin/sh -c '{?}'`, UTF-8 output, quoted argv.
    pub fn default_unix(line: LineInfo) -> Self {
        Self {
            id: "default".to_string(),
            path: StringLiteral::literal("/bin/sh", line.clone()),
            cmdline: StringLiteral::literal("-c {?}", line.clone()),
            replacements: Vec::new(),
            output_encoding: OutputEncoding::Utf8,
            raw_cmdline: false,
        }
    }

    /// The Windows default: `cmd /C {?}` with `\`/`"` escaping rules, matching
    /// the original source's platform split in `path/Utility.cpp`.
    pub fn default_windows(line: LineInfo) -> Self {
        Self {
            id: "default".to_string(),
            path: StringLiteral::literal("cmd.exe", line.clone()),
            cmdline: StringLiteral::literal("/C {?}", line.clone()),
            replacements: vec![
                ReplaceRule { pattern: "\\\\".to_string(), replacement: "\\\\\\\\".to_string() },
                ReplaceRule { pattern: "\"".to_string(), replacement: "\\\"".to_string() },
            ],
            output_encoding: OutputEncoding::Utf8,
            raw_cmdline: true,
        }
    }

    #[cfg(target_family = "windows")]
    pub fn platform_default(line: LineInfo) -> Self {
        Self::default_windows(line)
    }

    #[cfg(not(target_family = "windows"))]
    pub fn platform_default(line: LineInfo) -> Self {
        Self::default_unix(line)
    }
}

/// Execution state of one command within a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    Running,
    Finished,
    Failed,
}

/// One shell-command line belonging to a process block, materialised once per
/// transition at prepare time, then mutated (state/output/exit_code) during
/// execute.
#[derive(Debug, Clone)]
pub struct Command {
    pub shell: String,
    pub command: StringLiteral,
    pub state: CommandState,
    pub start: Option<chrono::DateTime<chrono::Local>>,
    pub end: Option<chrono::DateTime<chrono::Local>>,
    pub output: String,
    pub exit_code: i32,
}

impl Command {
    pub fn new(shell: impl Into<String>, command: StringLiteral) -> Self {
        Self {
            shell: shell.into(),
            command,
            state: CommandState::Idle,
            start: None,
            end: None,
            output: String::new(),
            exit_code: 0,
        }
    }
}

/// What a `ProcessBlock` matches its filtered inputs against.
#[derive(Debug, Clone)]
pub enum BlockKind {
    /// `foreach "regex"` — one transition per matching input.
    Foreach,
    /// `all "regex"` — one transition for the whole matching set.
    All,
    /// `none` — a single transition with no inputs at all.
    None,
}

/// A compiled, optionally-inverted input filter (`foreach`/`all`).
#[derive(Debug, Clone)]
pub struct Filter {
    pub pattern: String,
    pub inverted: bool,
}

/// A declared output, carrying whether it was written with a leading `~`
/// (temporary, subject to `remove-temporaries`).
#[derive(Debug, Clone)]
pub struct Destination {
    pub literal: StringLiteral,
    pub temporary: bool,
}

/// One `foreach { ... }` / `all { ... }` / `none { ... }` block inside a
/// `process: id { ... }`.
#[derive(Debug, Clone)]
pub struct ProcessBlock {
    pub kind: BlockKind,
    pub filter: Option<Filter>,
    pub captured_scope: IndexMap<String, StringLiteral>,
    pub destinations: IndexMap<String, Destination>,
    pub dependencies: IndexMap<String, StringLiteral>,
    pub commands: Vec<Command>,
    pub line: LineInfo,
}

impl ProcessBlock {
    pub fn new(kind: BlockKind, filter: Option<Filter>, line: LineInfo) -> Self {
        Self {
            kind,
            filter,
            captured_scope: IndexMap::new(),
            destinations: IndexMap::new(),
            dependencies: IndexMap::new(),
            commands: Vec::new(),
            line,
        }
    }
}

/// A named `process: id { block* }` declaration.
#[derive(Debug, Clone)]
pub struct Process {
    pub id: String,
    pub line: LineInfo,
    pub blocks: Vec<ProcessBlock>,
}

/// One leaf or composition node of an `execution: id { chain }` body, before the
/// dependency graph is built. `Dependency(left, right)`: `right` depends on
/// `left` (`left > right`); stored this way (not pre-reversed) so
/// `graph::node` can build the reverse-order dependency list the way the
/// original source does when it walks the chain.
#[derive(Debug, Clone)]
pub enum Chain {
    Leaf { name: String, args: Vec<StringLiteral>, forced: bool },
    Dependency(Box<Chain>, Box<Chain>),
    Parallel(Vec<Chain>),
}

/// A named `execution: id { chain }` declaration.
#[derive(Debug, Clone)]
pub struct Execution {
    pub id: String,
    pub line: LineInfo,
    pub chain: Chain,
}

/// Log verbosity, set by `@verbosity` or `--verbosity`/`-v` and consulted by
/// `src/logging.rs`. Ordered low to high so `>=` comparisons pick the right
/// events to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
}

impl Verbosity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ERROR" => Some(Self::Error),
            "WARN" => Some(Self::Warn),
            "INFO" => Some(Self::Info),
            "DEBUG" => Some(Self::Debug),
            _ => None,
        }
    }
}

/// Every flag settable with `@enable`/`@disable`, per distilled spec §4.2.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub environment_variables: bool,
    pub variable_checking: bool,
    pub command_checking: bool,
    pub nested_variables: bool,
    pub full_recursive_match: bool,
    pub remove_temporaries: bool,
    pub clean_up_incompletes: bool,
    pub remove_remains: bool,
    /// Forces every transition to be treated as stale (`--build`/`-b`).
    pub build: bool,
    /// `@shell <id>` default override, if the script names one instead of using
    /// whichever shell each command declares.
    pub shell: Option<String>,
    pub verbosity: Verbosity,
    /// Set once `--verbosity` is given on the command line, so a later
    /// `@verbosity` pragma in the script does not override the user's choice
    /// (distilled spec §6: "overridden only if user did not set it").
    pub locked_verbosity: bool,
    /// `--print-only`/`-n`: print the resolved command lines instead of running them.
    pub print_only: bool,
}

impl Configuration {
    pub fn set_flag(&mut self, name: &str, value: bool) -> bool {
        match name {
            "environment-variables" => self.environment_variables = value,
            "variable-checking" => self.variable_checking = value,
            "command-checking" => self.command_checking = value,
            "nested-variables" => self.nested_variables = value,
            "full-recursive-match" => self.full_recursive_match = value,
            "remove-temporaries" => self.remove_temporaries = value,
            "clean-up-incompletes" => self.clean_up_incompletes = value,
            "remove-remains" => self.remove_remains = value,
            _ => return false,
        }
        true
    }

    /// Applies an `@verbosity` pragma, unless the CLI already locked it via
    /// `--verbosity`.
    pub fn set_verbosity(&mut self, level: Verbosity) {
        if !self.locked_verbosity {
            self.verbosity = level;
        }
    }
}

/// Everything the parser assembles from one or more script files: shells,
/// processes, executions, and the configuration flags in effect. Immutable once
/// parsing finishes (§5: "script model is immutable after parse; shared
/// read-only").
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub shells: IndexMap<String, Shell>,
    pub processes: IndexMap<String, Process>,
    pub executions: IndexMap<String, Execution>,
    pub config: Configuration,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }
}
