//! Value Model
//!
//! The string-literal value model shared by the script parser, dependency graph,
//! and executor: [`types`] defines the AST and scoping, [`functions`] the
//! transformation-function table, [`eval`] substitution and folding, and
//! [`bool_expr`] the `@if` condition grammar built on top of all three.

pub mod bool_expr;
pub mod eval;
pub mod functions;
pub mod literal_parser;
pub mod types;

pub use bool_expr::{parse as parse_condition, Condition};
pub use eval::{fold, replace_vars, ReplaceResult, VariableChecking};
pub use literal_parser::parse_literal;
pub use types::{CaptureGroup, DynamicSet, Func, Part, ScopeStack, SharedLiteral, StringLiteral};
