//! Script Recursive-Descent Parser
//!
//! One function per grammar production (`parse_item`, `parse_process`,
//! `parse_process_block`, `parse_execution`, `parse_chain`, `parse_shell_decl`),
//! mirroring the teacher's `parser/parser.rs` + `compound_parser.rs` split
//! between top-level and compound-construct parsing (distilled spec §4.2).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{LineInfo, ScriptError};
use crate::fs::Filesystem;
use crate::script::lexer::{lex, Spanned, Token};
use crate::script::types::{
    BlockKind, Chain, Command, Configuration, Destination, Execution, Filter, OutputEncoding,
    Process, ProcessBlock, ReplaceRule, Script, Shell, Verbosity,
};
use crate::value::literal_parser::parse_literal;
use crate::value::{parse_condition, Condition, DynamicSet, ScopeStack, StringLiteral};

/// A fully-parsed top-level construct, used both for ordinary top-level parsing
/// and for the body of an `@if`/`@else if`/`@else` branch (which is re-applied
/// only if that branch's condition won at parse time).
#[derive(Debug, Clone)]
pub enum TopLevelItem {
    Assign { name: String, value: StringLiteral },
    Unset(Vec<String>),
    Flag { name: String, value: bool },
    Verbosity(String),
    Shell(Shell),
    Process(Process),
    Execution(Execution),
}

pub struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    fs: &'a dyn Filesystem,
    base_dir: PathBuf,
    imported: HashSet<PathBuf>,
    pub script: Script,
    pub scopes: ScopeStack,
    pub dynamic: DynamicSet,
}

impl<'a> Parser<'a> {
    pub fn new(fs: &'a dyn Filesystem, base_dir: PathBuf, scopes: ScopeStack, dynamic: DynamicSet) -> Self {
        Self {
            tokens: Vec::new(),
            pos: 0,
            fs,
            base_dir,
            imported: HashSet::new(),
            script: Script::new(),
            scopes,
            dynamic,
        }
    }

    /// Parses `src` (from `file`) as a complete script, applying every top-level
    /// item into `self.script`/`self.scopes` as it goes. Safe to call again
    /// (recursively, via `@include`/`@import`) — each call tokenizes and
    /// consumes its own stream, then control returns to the caller's stream.
    pub fn parse_source(&mut self, src: &str, file: Arc<str>) -> Result<(), ScriptError> {
        let saved_tokens = std::mem::replace(&mut self.tokens, lex(src, file)?);
        let saved_pos = std::mem::replace(&mut self.pos, 0);
        let result = self.parse_items_until_eof();
        self.tokens = saved_tokens;
        self.pos = saved_pos;
        result
    }

    fn parse_items_until_eof(&mut self) -> Result<(), ScriptError> {
        while !self.at_eof() {
            let item = self.parse_item()?;
            self.apply_item(item);
        }
        Ok(())
    }

    fn apply_item(&mut self, item: TopLevelItem) {
        match item {
            TopLevelItem::Assign { name, value } => self.scopes.set(name, value),
            TopLevelItem::Unset(names) => {
                for n in names {
                    self.scopes.unset(&n);
                }
            }
            TopLevelItem::Flag { name, value } => {
                self.script.config.set_flag(&name, value);
            }
            TopLevelItem::Verbosity(level) => {
                if let Some(level) = Verbosity::parse(&level) {
                    self.script.config.set_verbosity(level);
                }
            }
            TopLevelItem::Shell(shell) => {
                self.script.shells.insert(shell.id.clone(), shell);
            }
            TopLevelItem::Process(p) => {
                self.script.processes.insert(p.id.clone(), p);
            }
            TopLevelItem::Execution(e) => {
                self.script.executions.insert(e.id.clone(), e);
            }
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.tokens.get(self.pos).map(|s| &s.token), Some(Token::Eof) | None)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map(|s| &s.token).unwrap_or(&Token::Eof)
    }

    fn peek_line(&self) -> LineInfo {
        self.tokens
            .get(self.pos)
            .map(|s| s.line.clone())
            .unwrap_or_else(LineInfo::synthetic)
    }

    fn bump(&mut self) -> Spanned {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Spanned {
            token: Token::Eof,
            line: self.peek_line(),
        });
        self.pos += 1;
        t
    }

    fn expect_symbol(&mut self, c: char) -> Result<(), ScriptError> {
        if self.peek() == &Token::Symbol(c) {
            self.bump();
            Ok(())
        } else {
            Err(ScriptError::Syntax { message: format!("expected '{}'", c), line: self.peek_line() })
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.bump().token {
            Token::Ident(s) => Ok(s),
            other => Err(ScriptError::Syntax {
                message: format!("expected {}, found {:?}", what, other),
                line: self.peek_line(),
            }),
        }
    }

    fn expect_str(&mut self, what: &str) -> Result<(String, LineInfo), ScriptError> {
        let line = self.peek_line();
        match self.bump().token {
            Token::Str(s) => Ok((s, line)),
            other => Err(ScriptError::Syntax {
                message: format!("expected {}, found {:?}", what, other),
                line,
            }),
        }
    }

    fn parse_string_literal(&mut self) -> Result<StringLiteral, ScriptError> {
        let (body, line) = self.expect_str("string literal")?;
        parse_literal(&body, line)
    }

    fn parse_item(&mut self) -> Result<TopLevelItem, ScriptError> {
        match self.peek().clone() {
            Token::At(word) => self.parse_pragma(&word),
            Token::Ident(ref id) if id == "process" => self.parse_process_decl().map(TopLevelItem::Process),
            Token::Ident(ref id) if id == "execution" => self.parse_execution_decl().map(TopLevelItem::Execution),
            Token::Ident(ref id) if id == "unset" => self.parse_unset(),
            Token::Ident(_) => self.parse_assignment(),
            other => Err(ScriptError::Syntax {
                message: format!("unexpected token {:?}", other),
                line: self.peek_line(),
            }),
        }
    }

    fn parse_assignment(&mut self) -> Result<TopLevelItem, ScriptError> {
        let name = self.expect_ident("variable name")?;
        self.expect_symbol('=')?;
        let value = self.parse_string_literal()?;
        self.skip_semicolon();
        Ok(TopLevelItem::Assign { name, value })
    }

    fn parse_unset(&mut self) -> Result<TopLevelItem, ScriptError> {
        self.bump(); // 'unset'
        let mut names = vec![self.expect_ident("variable name")?];
        while self.peek() == &Token::Symbol(',') {
            self.bump();
            names.push(self.expect_ident("variable name")?);
        }
        self.skip_semicolon();
        Ok(TopLevelItem::Unset(names))
    }

    fn skip_semicolon(&mut self) {
        if self.peek() == &Token::Symbol(';') {
            self.bump();
        }
    }

    fn parse_pragma(&mut self, word: &str) -> Result<TopLevelItem, ScriptError> {
        let line = self.peek_line();
        self.bump(); // the @word token
        match word {
            "enable" | "disable" => {
                let name = self.expect_ident("flag name")?;
                self.skip_semicolon();
                Ok(TopLevelItem::Flag { name, value: word == "enable" })
            }
            "verbosity" => {
                let level = self.expect_ident("verbosity level")?;
                self.skip_semicolon();
                Ok(TopLevelItem::Verbosity(level))
            }
            "shell" => self.parse_shell_decl().map(TopLevelItem::Shell),
            "include" => {
                let (path, _) = self.expect_str("include path")?;
                self.skip_semicolon();
                self.include_file(&path)?;
                // The included file's items were already applied; return a
                // harmless no-op by re-entering the item loop at the caller.
                self.parse_item_or_retry(line)
            }
            "import" => {
                let (path, _) = self.expect_str("import path")?;
                self.skip_semicolon();
                let full = self.base_dir.join(&path);
                let canon = full.canonicalize().unwrap_or(full);
                if self.imported.insert(canon.clone()) {
                    self.include_file(&path)?;
                }
                self.parse_item_or_retry(line)
            }
            "if" => self.parse_if_pragma(),
            other => Err(ScriptError::Syntax { message: format!("unknown pragma '@{}'", other), line }),
        }
    }

    /// `@include`/`@import` apply their contents immediately rather than
    /// returning a `TopLevelItem`; if more input follows in the current
    /// stream, parse and apply the next real item so the caller's loop always
    /// receives something to apply (a second pass of the same pragma handling
    /// would double-apply). If the stream is exhausted, re-emit a harmless
    /// empty unset as a terminal no-op.
    fn parse_item_or_retry(&mut self, _line: LineInfo) -> Result<TopLevelItem, ScriptError> {
        if self.at_eof() {
            Ok(TopLevelItem::Unset(Vec::new()))
        } else {
            self.parse_item()
        }
    }

    fn include_file(&mut self, path: &str) -> Result<(), ScriptError> {
        let full = self.base_dir.join(path);
        let contents = self.fs.read_to_string(&full).map_err(|e| ScriptError::Io {
            path: full.clone(),
            message: e.to_string(),
        })?;
        let file: Arc<str> = Arc::from(full.to_string_lossy().into_owned());
        self.parse_source(&contents, file)
    }

    fn parse_if_pragma(&mut self) -> Result<TopLevelItem, ScriptError> {
        // Evaluate each branch's condition eagerly (scripts have no forward
        // references across `@if` into later conditions) and apply only the
        // winning branch's items, matching the distilled spec's S3 scenario.
        // Every applicable item is applied right here (via `parse_branch_body`)
        // as it is parsed, so the item returned to the caller is a no-op —
        // the caller's own `apply_item` call on it must not re-apply anything.
        let mut taken = false;

        loop {
            let cond_line = self.peek_line();
            let cond_tokens_start = self.pos;
            let cond_src = self.collect_condition_tokens()?;
            let cond = parse_condition(&cond_src, &cond_line).map_err(|e| ScriptError::Syntax {
                message: e.to_string(),
                line: cond_line.clone(),
            })?;
            let _ = cond_tokens_start;
            let matched = !taken && self.eval_condition(&cond)?;
            if matched {
                taken = true;
            }
            self.parse_branch_body(matched)?;
            match self.peek().clone() {
                Token::At(ref w) if w == "else" => {
                    self.bump();
                    if self.peek() == &Token::Ident("if".to_string()) {
                        self.bump();
                        continue;
                    }
                    let matched = !taken;
                    if matched {
                        taken = true;
                    }
                    self.parse_branch_body(matched)?;
                    self.expect_pragma("end")?;
                    break;
                }
                Token::At(ref w) if w == "end" => {
                    self.bump();
                    break;
                }
                other => {
                    return Err(ScriptError::Syntax {
                        message: format!("expected '@else'/'@end', found {:?}", other),
                        line: self.peek_line(),
                    });
                }
            }
        }

        Ok(TopLevelItem::Unset(Vec::new()))
    }

    fn expect_pragma(&mut self, word: &str) -> Result<(), ScriptError> {
        match self.peek().clone() {
            Token::At(ref w) if w == word => {
                self.bump();
                Ok(())
            }
            other => Err(ScriptError::Syntax {
                message: format!("expected '@{}', found {:?}", word, other),
                line: self.peek_line(),
            }),
        }
    }

    /// Reads tokens up to (but not including) the `@then` pragma that opens the
    /// branch body, reconstituting them into a flat condition-expression
    /// string for the boolean-expression tokenizer in `value::bool_expr`.
    fn collect_condition_tokens(&mut self) -> Result<String, ScriptError> {
        let mut out = String::new();
        loop {
            match self.peek().clone() {
                Token::At(ref w) if w == "then" => break,
                Token::Eof => {
                    return Err(ScriptError::Syntax {
                        message: "unterminated @if condition (expected '@then')".to_string(),
                        line: self.peek_line(),
                    });
                }
                _ => {
                    let spanned = self.bump();
                    render_token_into(&mut out, &spanned.token);
                    out.push(' ');
                }
            }
        }
        self.expect_pragma("then")?;
        Ok(out)
    }

    /// Parses top-level items until the next `@else`/`@end` pragma. Bodies are
    /// not wrapped in braces — each item's own grammar (process/execution
    /// blocks, assignments, etc.) self-terminates.
    fn parse_branch_body(&mut self, apply: bool) -> Result<(), ScriptError> {
        loop {
            match self.peek().clone() {
                Token::At(ref w) if w == "else" || w == "end" => break,
                Token::Eof => {
                    return Err(ScriptError::Syntax {
                        message: "unterminated @if (expected '@else'/'@end')".to_string(),
                        line: self.peek_line(),
                    });
                }
                _ => {
                    let item = self.parse_item()?;
                    if apply {
                        self.apply_item(item);
                    }
                }
            }
        }
        Ok(())
    }

    fn eval_condition(&self, cond: &Condition) -> Result<bool, ScriptError> {
        cond.eval(&self.scopes, &self.dynamic, Some(self.fs), &self.base_dir)
            .map_err(|e| ScriptError::Syntax { message: e.to_string(), line: self.peek_line() })
    }

    fn parse_shell_decl(&mut self) -> Result<Shell, ScriptError> {
        let id = self.expect_ident("shell id")?;
        let mut shell = Shell::platform_default(self.peek_line());
        shell.id = id;
        if self.peek() == &Token::Symbol('{') {
            self.bump();
            let mut idx_replacements: IndexMap<i64, ReplaceRule> = IndexMap::new();
            while self.peek() != &Token::Symbol('}') {
                let key = self.expect_ident("shell key")?;
                match key.as_str() {
                    "path" => {
                        self.expect_symbol('=')?;
                        shell.path = self.parse_string_literal()?;
                    }
                    "commandLine" => {
                        self.expect_symbol('=')?;
                        shell.cmdline = self.parse_string_literal()?;
                    }
                    "outputEncoding" => {
                        self.expect_symbol('=')?;
                        let (enc, line) = self.expect_str("encoding")?;
                        shell.output_encoding = match enc.to_ascii_lowercase().as_str() {
                            "utf8" | "utf-8" => OutputEncoding::Utf8,
                            "utf16" | "utf-16" => OutputEncoding::Utf16,
                            other => {
                                return Err(ScriptError::Syntax {
                                    message: format!("unknown outputEncoding '{}'", other),
                                    line,
                                });
                            }
                        };
                    }
                    "raw" => {
                        self.expect_symbol('=')?;
                        let (val, _) = self.expect_str("raw")?;
                        shell.raw_cmdline = val == "true";
                    }
                    "replace" => {
                        let idx = if self.peek() == &Token::Symbol('[') {
                            self.bump();
                            let (idx_str, _) = self.expect_str("replace index")?;
                            self.expect_symbol(']')?;
                            idx_str.parse().unwrap_or(idx_replacements.len() as i64)
                        } else {
                            idx_replacements.len() as i64
                        };
                        self.expect_symbol('=')?;
                        let (spec, line) = self.expect_str("replace rule")?;
                        idx_replacements.insert(idx, parse_replace_rule(&spec, &line)?);
                    }
                    other => {
                        return Err(ScriptError::Syntax {
                            message: format!("unknown shell key '{}'", other),
                            line: self.peek_line(),
                        });
                    }
                }
                self.skip_semicolon();
            }
            self.expect_symbol('}')?;
            if !idx_replacements.is_empty() {
                idx_replacements.sort_keys();
                shell.replacements = idx_replacements.into_values().collect();
            }
        } else {
            self.skip_semicolon();
        }
        Ok(shell)
    }

    fn parse_process_decl(&mut self) -> Result<Process, ScriptError> {
        self.bump(); // 'process'
        self.expect_symbol(':')?;
        let id = self.expect_ident("process id")?;
        let line = self.peek_line();
        self.expect_symbol('{')?;
        let mut blocks = Vec::new();
        while self.peek() != &Token::Symbol('}') {
            if let Token::At(w) = self.peek().clone() {
                if w == "include" {
                    self.bump();
                    let (other_id, _) = self.expect_str("process id")?;
                    self.skip_semicolon();
                    if let Some(other) = self.script.processes.get(&other_id).cloned() {
                        blocks.extend(other.blocks);
                    }
                    continue;
                }
            }
            blocks.push(self.parse_process_block()?);
        }
        self.expect_symbol('}')?;
        Ok(Process { id, line, blocks })
    }

    fn parse_process_block(&mut self) -> Result<ProcessBlock, ScriptError> {
        let line = self.peek_line();
        let kw = self.expect_ident("foreach/all/none")?;
        let (kind, filter) = match kw.as_str() {
            "foreach" | "all" => {
                let inverted = if self.peek() == &Token::Symbol('!') {
                    self.bump();
                    true
                } else {
                    false
                };
                let (pattern, _) = self.expect_str("filter regex")?;
                let kind = if kw == "foreach" { BlockKind::Foreach } else { BlockKind::All };
                (kind, Some(Filter { pattern, inverted }))
            }
            "none" => (BlockKind::None, None),
            other => {
                return Err(ScriptError::Syntax {
                    message: format!("expected foreach/all/none, found '{}'", other),
                    line,
                });
            }
        };
        let mut block = ProcessBlock::new(kind, filter, line);
        self.expect_symbol('{')?;
        while self.peek() != &Token::Symbol('}') {
            self.parse_process_block_item(&mut block)?;
        }
        self.expect_symbol('}')?;
        Ok(block)
    }

    fn parse_process_block_item(&mut self, block: &mut ProcessBlock) -> Result<(), ScriptError> {
        match self.peek().clone() {
            Token::Symbol('~') => {
                self.bump();
                let (name, literal) = self.parse_indexed_assignment("destination")?;
                block.destinations.insert(name, Destination { literal, temporary: true });
                Ok(())
            }
            Token::Ident(ref kw) if kw == "destination" => {
                let (name, literal) = self.parse_indexed_assignment("destination")?;
                block.destinations.insert(name, Destination { literal, temporary: false });
                Ok(())
            }
            Token::Ident(ref kw) if kw == "dependency" => {
                let (name, literal) = self.parse_indexed_assignment("dependency")?;
                block.dependencies.insert(name, literal);
                Ok(())
            }
            Token::Ident(id) => {
                // Could be a free assignment (`name = "..."`) or a bare shell
                // command line (`cp "{?}" "{destination}"`).
                if self.tokens.get(self.pos + 1).map(|s| &s.token) == Some(&Token::Symbol('=')) {
                    self.bump();
                    self.expect_symbol('=')?;
                    let value = self.parse_string_literal()?;
                    self.skip_semicolon();
                    block.captured_scope.insert(id, value);
                    Ok(())
                } else {
                    self.parse_command(block)
                }
            }
            Token::Str(_) => self.parse_command(block),
            other => Err(ScriptError::Syntax {
                message: format!("unexpected token in process block: {:?}", other),
                line: self.peek_line(),
            }),
        }
    }

    /// `destination[<idx>] = "literal"` / `dependency[<idx>] = "literal"`. The
    /// index, when present, just becomes the map key; when absent, the key is
    /// the positional index as a string (`"0"`, `"1"`, ...), preserving
    /// declaration order via `IndexMap`.
    fn parse_indexed_assignment(&mut self, what: &str) -> Result<(String, StringLiteral), ScriptError> {
        self.expect_ident(what)?;
        let name = if self.peek() == &Token::Symbol('[') {
            self.bump();
            let n = self.expect_ident("index")?;
            self.expect_symbol(']')?;
            n
        } else {
            String::new()
        };
        self.expect_symbol('=')?;
        let value = self.parse_string_literal()?;
        self.skip_semicolon();
        Ok((name, value))
    }

    fn parse_command(&mut self, block: &mut ProcessBlock) -> Result<(), ScriptError> {
        // A command line is the executable name (bare word or string) followed
        // by its arguments, joined back into one StringLiteral with spaces —
        // splicing happens once more at command-materialisation time in
        // `graph::transitions`.
        let mut pieces = Vec::new();
        loop {
            match self.peek().clone() {
                Token::Str(body) => {
                    let line = self.peek_line();
                    pieces.push(parse_literal(&body, line)?);
                    self.bump();
                }
                Token::Ident(word) => {
                    pieces.push(StringLiteral::literal(word, self.peek_line()));
                    self.bump();
                }
                Token::Symbol(';') => {
                    self.bump();
                    break;
                }
                Token::Symbol('}') | Token::At(_) | Token::Eof => break,
                Token::Symbol(c) => {
                    // Shell punctuation the command line carries verbatim
                    // (redirects, etc.) — not meaningful to the script grammar
                    // itself, just more literal text in the command.
                    pieces.push(StringLiteral::literal(c.to_string(), self.peek_line()));
                    self.bump();
                }
            }
        }
        if pieces.is_empty() {
            return Ok(());
        }
        let joined = join_literals(pieces);
        let shell_id = "default".to_string();
        block.commands.push(Command::new(shell_id, joined));
        Ok(())
    }

    fn parse_execution_decl(&mut self) -> Result<Execution, ScriptError> {
        self.bump(); // 'execution'
        self.expect_symbol(':')?;
        let id = self.expect_ident("execution id")?;
        let line = self.peek_line();
        self.expect_symbol('{')?;
        let chain = self.parse_chain_or()?;
        self.expect_symbol('}')?;
        Ok(Execution { id, line, chain })
    }

    // chain := seq ( '|' seq )*      (parallel, lowest precedence listed first
    //                                 here but bound tighter than '>' per the
    //                                 grammar: "a > b | c" means a > (b | c))
    fn parse_chain_or(&mut self) -> Result<Chain, ScriptError> {
        self.parse_chain_seq()
    }

    // seq := par ( '>' par )*   (right depends on left; left-assoc fold builds
    //                            a left-leaning Dependency spine)
    fn parse_chain_seq(&mut self) -> Result<Chain, ScriptError> {
        let mut lhs = self.parse_chain_par()?;
        while self.peek() == &Token::Symbol('>') {
            self.bump();
            let rhs = self.parse_chain_par()?;
            lhs = Chain::Dependency(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // par := atom ( '|' atom )*
    fn parse_chain_par(&mut self) -> Result<Chain, ScriptError> {
        let first = self.parse_chain_atom()?;
        if self.peek() != &Token::Symbol('|') {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.peek() == &Token::Symbol('|') {
            self.bump();
            items.push(self.parse_chain_atom()?);
        }
        Ok(Chain::Parallel(items))
    }

    fn parse_chain_atom(&mut self) -> Result<Chain, ScriptError> {
        if self.peek() == &Token::Symbol('(') {
            self.bump();
            let inner = self.parse_chain_or()?;
            self.expect_symbol(')')?;
            return self.parse_chain_suffix(inner);
        }
        if let Token::At(w) = self.peek().clone() {
            if w == "include" {
                self.bump();
                let (id, _) = self.expect_str("chain id")?;
                self.skip_semicolon();
                if let Some(exec) = self.script.executions.get(&id) {
                    return Ok(exec.chain.clone());
                }
                return Ok(Chain::Leaf { name: id, args: Vec::new(), forced: false });
            }
        }
        let name = self.expect_ident("process/execution id")?;
        let mut args = Vec::new();
        if self.peek() == &Token::Symbol('(') {
            self.bump();
            if self.peek() != &Token::Symbol(')') {
                loop {
                    args.push(self.parse_string_literal()?);
                    if self.peek() == &Token::Symbol(',') {
                        self.bump();
                        continue;
                    }
                    break;
                }
            }
            self.expect_symbol(')')?;
        }
        let leaf = Chain::Leaf { name, args, forced: false };
        self.parse_chain_suffix(leaf)
    }

    fn parse_chain_suffix(&mut self, chain: Chain) -> Result<Chain, ScriptError> {
        if self.peek() == &Token::Symbol('!') {
            self.bump();
            return Ok(force_chain(chain));
        }
        Ok(chain)
    }
}

fn force_chain(chain: Chain) -> Chain {
    match chain {
        Chain::Leaf { name, args, .. } => Chain::Leaf { name, args, forced: true },
        other => other,
    }
}

fn join_literals(mut pieces: Vec<StringLiteral>) -> StringLiteral {
    if pieces.len() == 1 {
        return pieces.pop().unwrap();
    }
    let line = pieces[0].line.clone();
    let mut parts = Vec::new();
    for (i, p) in pieces.into_iter().enumerate() {
        if i > 0 {
            parts.push(crate::value::Part::Text(" ".to_string()));
        }
        parts.extend(p.groups.into_iter().flat_map(|g| g.parts));
    }
    StringLiteral::from_parts(parts, line)
}

fn parse_replace_rule(spec: &str, line: &LineInfo) -> Result<ReplaceRule, ScriptError> {
    let mut chars = spec.chars();
    let sep = chars.next().ok_or_else(|| ScriptError::Syntax {
        message: "empty replace rule".to_string(),
        line: line.clone(),
    })?;
    let body: String = chars.collect();
    let mut pieces = body.splitn(3, sep);
    let pattern = pieces.next().unwrap_or_default().to_string();
    let replacement = pieces.next().unwrap_or_default().to_string();
    Ok(ReplaceRule { pattern, replacement })
}

/// Renders a token back into source-like text for the condition tokenizer in
/// `value::bool_expr`, which re-lexes the collected span.
fn render_token_into(out: &mut String, token: &Token) {
    match token {
        Token::Ident(s) => out.push_str(s),
        Token::At(s) => {
            out.push('@');
            out.push_str(s);
        }
        Token::Str(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        Token::Symbol(c) => out.push(*c),
        Token::Eof => {}
    }
}

/// Entry point: parses `src` as a whole script, starting from a prelude scope
/// and an empty script model.
pub fn parse(
    src: &str,
    file: impl Into<Arc<str>>,
    fs: &dyn Filesystem,
    base_dir: &Path,
    scopes: ScopeStack,
    dynamic: DynamicSet,
) -> Result<(Script, ScopeStack), ScriptError> {
    let mut parser = Parser::new(fs, base_dir.to_path_buf(), scopes, dynamic);
    if parser.script.shells.is_empty() {
        let default = Shell::platform_default(LineInfo::synthetic());
        parser.script.shells.insert(default.id.clone(), default);
    }
    parser.parse_source(src, file.into())?;
    Ok((parser.script, parser.scopes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemFilesystem;
    use crate::value::DynamicSet;

    fn parse_ok(src: &str) -> Script {
        let fs = MemFilesystem::new();
        let (script, _) = parse(
            src,
            "t.parr",
            &fs,
            Path::new("."),
            ScopeStack::new(),
            DynamicSet::with_reserved(),
        )
        .unwrap();
        script
    }

    #[test]
    fn parses_foreach_copy_process() {
        let script = parse_ok(
            r#"
            process: p {
              foreach ".*\\.txt$" { destination = "{?:directory}/{?:file}.out"; cp "{?}" "{destination}" }
            }
            execution: default { p }
            "#,
        );
        assert!(script.processes.contains_key("p"));
        assert!(script.executions.contains_key("default"));
        let block = &script.processes["p"].blocks[0];
        assert!(matches!(block.kind, BlockKind::Foreach));
        assert_eq!(block.commands.len(), 1);
    }

    #[test]
    fn parses_temporary_destination() {
        let script = parse_ok(
            r#"
            process: c {
              all ".*\\.part$" { ~destination = "merged.bin"; cat "{@*}" > "{destination}" }
            }
            "#,
        );
        let dest = &script.processes["c"].blocks[0].destinations[""];
        assert!(dest.temporary);
    }

    #[test]
    fn parses_chain_with_sequence_and_parallel() {
        let script = parse_ok("execution: default { a > b | c }");
        match &script.executions["default"].chain {
            Chain::Dependency(lhs, rhs) => {
                assert!(matches!(**lhs, Chain::Leaf { .. }));
                assert!(matches!(**rhs, Chain::Parallel(_)));
            }
            other => panic!("expected dependency, got {:?}", other),
        }
    }

    #[test]
    fn parses_forced_leaf() {
        let script = parse_ok("execution: default { a! }");
        match &script.executions["default"].chain {
            Chain::Leaf { forced, .. } => assert!(forced),
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn enable_flag_sets_configuration() {
        let script = parse_ok("@enable variable-checking;");
        assert!(script.config.variable_checking);
    }

    #[test]
    fn if_pragma_picks_matching_branch() {
        let fs = MemFilesystem::new();
        let mut scopes = ScopeStack::new();
        scopes.set("OS", StringLiteral::literal("windows", LineInfo::synthetic()));
        let (script, scopes) = parse(
            r#"@if OS is "windows" @then shellId = "cmd"; @else shellId = "sh"; @end"#,
            "t.parr",
            &fs,
            Path::new("."),
            scopes,
            DynamicSet::with_reserved(),
        )
        .unwrap();
        let _ = script;
        assert_eq!(scopes.lookup("shellId").unwrap().get_string(), "cmd");
    }
}
