//! Boolean Expression Parser & Evaluator
//!
//! Implements the `@if`/`@else if` condition grammar from distilled spec §4.1:
//! primaries (`var`, quoted literal), predicates (`is set|file|directory|regex|
//! true|false|<literal>|like <regex>`, each with a negated form), connectives
//! `not|!`, `and|&&`, `or|||`, and parenthesised grouping. A hand-written
//! recursive-descent parser over a pre-tokenised stream, precedence
//! `not > and > or`, evaluated short-circuit (see SPEC_FULL.md §9 item 3).

use std::path::Path;

use crate::error::{LineInfo, ValueError};
use crate::fs::Filesystem;
use crate::value::eval::{fold, replace_vars};
use crate::value::types::{DynamicSet, ScopeStack, StringLiteral};

/// One lexical token of a condition expression.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Var(String),
    Literal(String),
    Regex(String),
    Is,
    Not,
    And,
    Or,
    Set,
    File,
    Directory,
    True,
    False,
    Like,
    LParen,
    RParen,
}

/// Tokenises a condition string. Variable references are written `$name` (or
/// `${name}`); quoted literals use `"..."`; a bare `/regex/` is a regex token for
/// `is like`/`is regex`. Everything else is matched as a bare word against the
/// fixed keyword table, case-insensitively.
fn tokenize(src: &str, line: &LineInfo) -> Result<Vec<Token>, ValueError> {
    let mut out = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Token::Not);
                    out.push(Token::Is);
                    i += 2;
                } else {
                    out.push(Token::Not);
                    i += 1;
                }
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                out.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                out.push(Token::Or);
                i += 2;
            }
            '~' => {
                out.push(Token::Is);
                out.push(Token::Like);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ValueError::InvalidValue {
                        func: "@if".to_string(),
                        message: "unterminated string literal".to_string(),
                        line: line.clone(),
                    });
                }
                i += 1;
                out.push(Token::Literal(s));
            }
            '/' => {
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != '/' {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ValueError::InvalidValue {
                        func: "@if".to_string(),
                        message: "unterminated regex literal".to_string(),
                        line: line.clone(),
                    });
                }
                i += 1;
                out.push(Token::Regex(s));
            }
            '$' => {
                i += 1;
                let braced = chars.get(i) == Some(&'{');
                if braced {
                    i += 1;
                }
                let mut name = String::new();
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '?' || chars[i] == '*')
                {
                    name.push(chars[i]);
                    i += 1;
                }
                if braced {
                    if chars.get(i) != Some(&'}') {
                        return Err(ValueError::InvalidValue {
                            func: "@if".to_string(),
                            message: "unterminated ${...} reference".to_string(),
                            line: line.clone(),
                        });
                    }
                    i += 1;
                }
                out.push(Token::Var(name));
            }
            _ => {
                let mut word = String::new();
                while i < chars.len() && !chars[i].is_whitespace() && !"()!&|~\"'$".contains(chars[i]) {
                    word.push(chars[i]);
                    i += 1;
                }
                match word.to_ascii_lowercase().as_str() {
                    "is" => out.push(Token::Is),
                    "not" => out.push(Token::Not),
                    "and" => out.push(Token::And),
                    "or" => out.push(Token::Or),
                    "set" => out.push(Token::Set),
                    "file" => out.push(Token::File),
                    "directory" | "dir" => out.push(Token::Directory),
                    "true" => out.push(Token::True),
                    "false" => out.push(Token::False),
                    "like" | "regex" => out.push(Token::Like),
                    "" => {
                        return Err(ValueError::InvalidValue {
                            func: "@if".to_string(),
                            message: format!("unexpected character '{}'", c),
                            line: line.clone(),
                        });
                    }
                    // A bare word that isn't a keyword is a variable reference
                    // (the grammar's `var` primary): `OS is "windows"`, not
                    // `$OS is "windows"` — `$name`/`${name}` are also accepted
                    // as an explicit-sigil spelling of the same thing.
                    _ => out.push(Token::Var(word)),
                }
            }
        }
    }
    Ok(out)
}

/// The parsed, not-yet-evaluated condition tree.
#[derive(Debug, Clone)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsSet(String),
    IsFile(String),
    IsDirectory(String),
    IsTrue(String),
    IsFalse(String),
    IsEqual(String, String),
    IsLike(String, String),
    Group(Box<Expr>),
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: &'a LineInfo,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), ValueError> {
        if self.peek() == Some(want) {
            self.pos += 1;
            Ok(())
        } else {
            Err(ValueError::InvalidValue {
                func: "@if".to_string(),
                message: format!("expected {}", what),
                line: self.line.clone(),
            })
        }
    }

    // or := and ( "or" and )*
    fn parse_or(&mut self) -> Result<Expr, ValueError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // and := unary ( "and" unary )*
    fn parse_and(&mut self) -> Result<Expr, ValueError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    // unary := "not" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, ValueError> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    // primary := "(" or ")" | operand "is" ["not"] predicate
    fn parse_primary(&mut self) -> Result<Expr, ValueError> {
        if self.peek() == Some(&Token::LParen) {
            self.bump();
            let inner = self.parse_or()?;
            self.expect(&Token::RParen, "')'")?;
            return Ok(Expr::Group(Box::new(inner)));
        }

        let operand = self.parse_operand()?;
        self.expect(&Token::Is, "'is'")?;
        let negated = if self.peek() == Some(&Token::Not) {
            self.bump();
            true
        } else {
            false
        };

        let base = match self.bump().cloned() {
            Some(Token::Set) => Expr::IsSet(operand),
            Some(Token::File) => Expr::IsFile(operand),
            Some(Token::Directory) => Expr::IsDirectory(operand),
            Some(Token::True) => Expr::IsTrue(operand),
            Some(Token::False) => Expr::IsFalse(operand),
            Some(Token::Like) => {
                let pattern = self.parse_pattern()?;
                Expr::IsLike(operand, pattern)
            }
            Some(Token::Literal(s)) => Expr::IsEqual(operand, s),
            Some(Token::Regex(s)) => Expr::IsLike(operand, s),
            other => {
                return Err(ValueError::InvalidValue {
                    func: "@if".to_string(),
                    message: format!("unexpected predicate token {:?}", other),
                    line: self.line.clone(),
                });
            }
        };

        Ok(if negated { Expr::Not(Box::new(base)) } else { base })
    }

    fn parse_operand(&mut self) -> Result<String, ValueError> {
        match self.bump().cloned() {
            Some(Token::Var(name)) => Ok(format!("${}", name)),
            Some(Token::Literal(s)) => Ok(s),
            other => Err(ValueError::InvalidValue {
                func: "@if".to_string(),
                message: format!("expected variable or literal, found {:?}", other),
                line: self.line.clone(),
            }),
        }
    }

    fn parse_pattern(&mut self) -> Result<String, ValueError> {
        match self.bump().cloned() {
            Some(Token::Regex(s)) | Some(Token::Literal(s)) => Ok(s),
            other => Err(ValueError::InvalidValue {
                func: "@if".to_string(),
                message: format!("expected regex pattern, found {:?}", other),
                line: self.line.clone(),
            }),
        }
    }
}

/// Parses a condition string into an evaluable tree. Call once per `@if`/
/// `@else if` line; the result can be evaluated repeatedly (e.g. once per
/// transition when the condition mentions a dynamic variable).
pub fn parse(src: &str, line: &LineInfo) -> Result<Condition, ValueError> {
    let tokens = tokenize(src, line)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, line };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ValueError::InvalidValue {
            func: "@if".to_string(),
            message: "trailing tokens after condition".to_string(),
            line: line.clone(),
        });
    }
    Ok(Condition { expr, line: line.clone() })
}

/// A parsed, reusable `@if` condition.
pub struct Condition {
    expr: Expr,
    line: LineInfo,
}

impl Condition {
    /// Evaluates the condition against the given scope. Short-circuits `and`/`or`
    /// the way the original does: the right operand of `and` is not evaluated once
    /// the left is `false`, and vice versa for `or`.
    pub fn eval(
        &self,
        scopes: &ScopeStack,
        dynamic: &DynamicSet,
        fs: Option<&dyn Filesystem>,
        cwd: &Path,
    ) -> Result<bool, ValueError> {
        eval_expr(&self.expr, scopes, dynamic, fs, cwd, &self.line)
    }
}

fn resolve_operand(
    operand: &str,
    scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: Option<&dyn Filesystem>,
    cwd: &Path,
    line: &LineInfo,
) -> Result<StringLiteral, ValueError> {
    if let Some(name) = operand.strip_prefix('$') {
        let reference = StringLiteral::single_var(name, vec![], line.clone());
        let replaced = replace_vars(&reference, scopes, dynamic, fs, cwd)?;
        fold(&replaced.literal, true, dynamic, fs, cwd)
    } else {
        Ok(StringLiteral::literal(operand, line.clone()))
    }
}

fn eval_expr(
    expr: &Expr,
    scopes: &ScopeStack,
    dynamic: &DynamicSet,
    fs: Option<&dyn Filesystem>,
    cwd: &Path,
    line: &LineInfo,
) -> Result<bool, ValueError> {
    match expr {
        Expr::Group(inner) => eval_expr(inner, scopes, dynamic, fs, cwd, line),
        Expr::Not(inner) => Ok(!eval_expr(inner, scopes, dynamic, fs, cwd, line)?),
        Expr::And(lhs, rhs) => {
            if !eval_expr(lhs, scopes, dynamic, fs, cwd, line)? {
                return Ok(false);
            }
            eval_expr(rhs, scopes, dynamic, fs, cwd, line)
        }
        Expr::Or(lhs, rhs) => {
            if eval_expr(lhs, scopes, dynamic, fs, cwd, line)? {
                return Ok(true);
            }
            eval_expr(rhs, scopes, dynamic, fs, cwd, line)
        }
        Expr::IsSet(operand) => {
            if let Some(name) = operand.strip_prefix('$') {
                Ok(scopes.lookup(name).map(|v| v.is_set()).unwrap_or(false))
            } else {
                Ok(true)
            }
        }
        Expr::IsFile(operand) => {
            let value = resolve_operand(operand, scopes, dynamic, fs, cwd, line)?;
            let fs = fs.ok_or_else(|| ValueError::InvalidValue {
                func: "@if".to_string(),
                message: "no filesystem available".to_string(),
                line: line.clone(),
            })?;
            let p = resolve_path(cwd, &value.get_string());
            Ok(fs.exists(&p) && !fs.is_directory(&p))
        }
        Expr::IsDirectory(operand) => {
            let value = resolve_operand(operand, scopes, dynamic, fs, cwd, line)?;
            let fs = fs.ok_or_else(|| ValueError::InvalidValue {
                func: "@if".to_string(),
                message: "no filesystem available".to_string(),
                line: line.clone(),
            })?;
            let p = resolve_path(cwd, &value.get_string());
            Ok(fs.is_directory(&p))
        }
        Expr::IsTrue(operand) => {
            let value = resolve_operand(operand, scopes, dynamic, fs, cwd, line)?;
            Ok(is_truthy(&value.get_string()))
        }
        Expr::IsFalse(operand) => {
            let value = resolve_operand(operand, scopes, dynamic, fs, cwd, line)?;
            Ok(!is_truthy(&value.get_string()))
        }
        Expr::IsEqual(operand, expected) => {
            let value = resolve_operand(operand, scopes, dynamic, fs, cwd, line)?;
            Ok(value.get_string() == *expected)
        }
        Expr::IsLike(operand, pattern) => {
            let value = resolve_operand(operand, scopes, dynamic, fs, cwd, line)?;
            let re = regex_lite::Regex::new(pattern).map_err(|e| ValueError::InvalidValue {
                func: "@if".to_string(),
                message: e.to_string(),
                line: line.clone(),
            })?;
            Ok(re.is_match(&value.get_string()))
        }
    }
}

fn resolve_path(cwd: &Path, value: &str) -> std::path::PathBuf {
    let p = Path::new(value);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    }
}

fn is_truthy(s: &str) -> bool {
    matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
