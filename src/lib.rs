//! parr - a parallel build runner driven by a small process/execution script
//!
//! The library is organised the way the distilled design describes it: a value
//! model (`value`) shared by the script language and the dependency graph, a
//! filesystem abstraction (`fs`), the script lexer/parser (`script`), the
//! dependency graph builder (`graph`), the concurrent executor (`exec`), the
//! persistent output index (`index`), structured logging (`logging`), and the
//! CLI front end (`cli`) that wires all of the above into a single run.

pub mod cli;
pub mod error;
pub mod exec;
pub mod fs;
pub mod graph;
pub mod index;
pub mod logging;
pub mod script;
pub mod value;

pub use error::{ExecError, GraphError, IndexError, LineInfo, PpError, ScriptError, ValueError};
pub use fs::{Filesystem, MemFilesystem, OsFilesystem};
