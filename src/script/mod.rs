//! Script Language
//!
//! Lexing, parsing, and the in-memory data model for the process/execution
//! script described in distilled spec §4.2: shells, processes, executions, and
//! the configuration flags in effect. `config.rs` builds the pre-defined
//! variable scope the parser starts from.

pub mod config;
pub mod lexer;
pub mod parser;
pub mod types;

pub use config::{default_dynamic_set, prelude_scope, PreludeInputs};
pub use parser::parse;
pub use types::{
    BlockKind, Chain, Command, CommandState, Configuration, Destination, Execution, Filter,
    OutputEncoding, Process, ProcessBlock, ReplaceRule, Script, Shell, Verbosity,
};
