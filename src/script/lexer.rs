//! Script Tokenizer
//!
//! Turns script source text into a flat token stream with `LineInfo` attached to
//! every token, the same bookkeeping style as the teacher's `parser/lexer.rs`.
//! String literals are lexed whole (quote-delimited, escapes resolved) and
//! handed to `value::StringLiteral` parsing separately — the lexer itself knows
//! nothing about `{var:fn}` syntax.

use std::sync::Arc;

use crate::error::{LineInfo, ScriptError};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    /// `@word` pragma/directive keyword, lowercase word captured without `@`.
    At(String),
    /// Already-unescaped string literal contents (without the surrounding quotes).
    Str(String),
    Symbol(char),
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: LineInfo,
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    file: Arc<str>,
    _src: std::marker::PhantomData<&'a str>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, file: Arc<str>) -> Self {
        // Strip a UTF-8 BOM, per distilled spec §6 ("Script file: UTF-8 text
        // with optional BOM").
        let src = src.strip_prefix('\u{feff}').unwrap_or(src);
        Self { chars: src.chars().collect(), pos: 0, line: 1, column: 1, file, _src: std::marker::PhantomData }
    }

    fn here(&self) -> LineInfo {
        LineInfo::new(self.file.clone(), self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('\\') if self.peek2() == Some('\n') => {
                    // Line continuation outside a string: swallow and keep going.
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ScriptError> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let line = self.here();
            let Some(c) = self.peek() else {
                out.push(Spanned { token: Token::Eof, line });
                break;
            };
            let token = match c {
                '@' => {
                    self.bump();
                    let word = self.read_word();
                    if word.is_empty() {
                        return Err(ScriptError::Syntax {
                            message: "expected identifier after '@'".to_string(),
                            line,
                        });
                    }
                    Token::At(word)
                }
                '"' => self.read_string(&line)?,
                c if is_ident_start(c) => Token::Ident(self.read_word()),
                '{' | '}' | '(' | ')' | '[' | ']' | '=' | ';' | ',' | ':' | '!' | '>' | '|' | '~' | '.' | '$' => {
                    self.bump();
                    Token::Symbol(c)
                }
                other => {
                    return Err(ScriptError::Syntax {
                        message: format!("unexpected character '{}'", other),
                        line,
                    });
                }
            };
            out.push(Spanned { token, line });
        }
        Ok(out)
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }
        word
    }

    fn read_string(&mut self, start_line: &LineInfo) -> Result<Token, ScriptError> {
        self.bump(); // opening quote
        let mut s = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(ScriptError::Syntax {
                        message: "unterminated string literal".to_string(),
                        line: start_line.clone(),
                    });
                }
                Some('"') => break,
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('{') => s.push('{'),
                    Some('}') => s.push('}'),
                    Some(other) => s.push(other),
                    None => {
                        return Err(ScriptError::Syntax {
                            message: "unterminated escape in string literal".to_string(),
                            line: start_line.clone(),
                        });
                    }
                },
                Some(c) => s.push(c),
            }
        }
        Ok(Token::Str(s))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Convenience entry point mirroring the teacher's `parser::parse` top-level fn.
pub fn lex(src: &str, file: impl Into<Arc<str>>) -> Result<Vec<Spanned>, ScriptError> {
    Lexer::new(src, file.into()).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_pragma_and_symbols() {
        let tokens = lex("@enable variable-checking;", "t.parr").unwrap();
        assert_eq!(tokens[0].token, Token::At("enable".to_string()));
        assert_eq!(tokens[1].token, Token::Ident("variable-checking".to_string()));
        assert_eq!(tokens[2].token, Token::Symbol(';'));
    }

    #[test]
    fn lexes_string_with_escapes() {
        let tokens = lex(r#""a\"b\\c{?}""#, "t.parr").unwrap();
        assert_eq!(tokens[0].token, Token::Str("a\"b\\c{?}".to_string()));
    }

    #[test]
    fn strips_bom() {
        let tokens = lex("\u{feff}foo", "t.parr").unwrap();
        assert_eq!(tokens[0].token, Token::Ident("foo".to_string()));
    }

    #[test]
    fn skips_line_comments() {
        let tokens = lex("foo # comment\nbar", "t.parr").unwrap();
        assert_eq!(tokens[0].token, Token::Ident("foo".to_string()));
        assert_eq!(tokens[1].token, Token::Ident("bar".to_string()));
    }
}
