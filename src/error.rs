//! Error Model
//!
//! A single aggregate error type for the whole crate, following the distilled
//! specification's error-kind list in §7. Each component has its own focused enum;
//! [`PpError`] folds them together with `#[from]` so callers can use `?` freely
//! while the CLI front end still gets one type to pattern-match on for exit codes.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Source position attached to most parsed values and most errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineInfo {
    pub file: std::sync::Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl LineInfo {
    pub fn new(file: std::sync::Arc<str>, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// A placeholder location for values synthesized at runtime (e.g. pre-defined
    /// variables) rather than parsed from a script.
    pub fn synthetic() -> Self {
        Self { file: std::sync::Arc::from("<internal>"), line: 0, column: 0 }
    }
}

impl fmt::Display for LineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Errors raised by the value model (`src/value`).
#[derive(Debug, Error, Clone)]
pub enum ValueError {
    #[error("{line}: unknown variable '{name}'")]
    UnknownVariable { name: String, line: LineInfo },

    #[error("{line}: invalid value for function '{func}': {message}")]
    InvalidValue { func: String, message: String, line: LineInfo },

    #[error("{line}: index out of range: {message}")]
    OutOfRange { message: String, line: LineInfo },
}

/// Errors raised while lexing/parsing a script (`src/script`).
#[derive(Debug, Error, Clone)]
pub enum ScriptError {
    #[error("{line}: syntax error: {message}")]
    Syntax { message: String, line: LineInfo },

    #[error("cannot read '{path}': {message}")]
    Io { path: PathBuf, message: String },

    #[error("{line}: unknown symbol '{name}'")]
    SymbolUnknown { name: String, line: LineInfo },

    #[error("script error: {message}")]
    UserScript { message: String, line: LineInfo },
}

/// Errors raised while building the dependency graph (`src/graph`).
#[derive(Debug, Error, Clone)]
pub enum GraphError {
    #[error(
        "duplicate output path '{path}' produced by {} distinct transitions: {}",
        locations.len(),
        render_locations(locations)
    )]
    DuplicateOutput { path: String, locations: Vec<LineInfo> },

    #[error("{line}: internal dependency tree is broken: {message}")]
    Invariant { message: String, line: LineInfo },

    #[error("{line}: input file list file does not exist '{path}'")]
    FileNotFound { path: PathBuf, line: LineInfo },
}

fn render_locations(locations: &[LineInfo]) -> String {
    locations
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while executing or cleaning up after a run (`src/exec`).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("filesystem error at '{path}': {message}")]
    Filesystem { path: PathBuf, message: String },
}

/// Errors raised by the persistent output index (`src/index`).
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database path error: {0}")]
    Path(String),
}

/// Top-level error type returned from the library's public entry points.
#[derive(Debug, Error)]
pub enum PpError {
    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl PpError {
    /// Maps an error to the process exit code described in the distilled
    /// specification §6: non-zero on parse error, preparation error, or a failing
    /// command under `command-checking`. Command-level failures are not represented
    /// as `PpError` (they surface as a non-zero `Command::exit_code` instead), so
    /// every variant reaching this point is a parse/preparation/system failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            PpError::Script(ScriptError::Syntax { .. }) => 2,
            PpError::Script(_) => 2,
            PpError::Graph(_) => 3,
            PpError::Value(_) => 4,
            PpError::Exec(_) => 5,
            PpError::Index(_) => 6,
        }
    }
}
