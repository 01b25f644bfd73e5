//! Lexer for script source code
//!
//! Converts source text into a stream of tokens.

use std::iter::Peekable;
use std::str::CharIndices;

use super::value::JsString;

/// Source span information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(JsString),
    True,
    False,
    Null,

    Identifier(JsString),

    // Keywords
    Let,
    Const,
    Var,
    Throw,
    Typeof,
    New,

    // Operators
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Percent,    // %
    Eq,         // =
    EqEq,       // ==
    EqEqEq,     // ===
    BangEq,     // !=
    BangEqEq,   // !==
    Lt,         // <
    LtEq,       // <=
    Gt,         // >
    GtEq,       // >=
    AmpAmp,     // &&
    PipePipe,   // ||
    Bang,       // !
    Question,   // ?

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,

    Eof,
    /// Unrecognised input; the parser turns it into a syntax error.
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn eof(pos: usize, line: u32, column: u32) -> Self {
        Self {
            kind: TokenKind::Eof,
            span: Span::new(pos, pos, line, column),
        }
    }
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let line = self.line;
        let column = self.column;
        let Some((start, ch)) = self.advance() else {
            return Token::eof(self.source.len(), line, column);
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '.' => {
                if self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                    self.number(start)
                } else {
                    TokenKind::Dot
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else {
                    TokenKind::Eq
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::BangEqEq
                    } else {
                        TokenKind::BangEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::LtEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Invalid("&".to_string())
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::PipePipe
                } else {
                    TokenKind::Invalid("|".to_string())
                }
            }
            '"' | '\'' => self.string(ch),
            c if c.is_ascii_digit() => self.number(start),
            c if is_identifier_start(c) => self.identifier(start),
            c => TokenKind::Invalid(c.to_string()),
        };

        Token {
            kind,
            span: Span::new(start, self.offset(), line, column),
        }
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let (pos, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some((pos, ch))
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek_char() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map_or(self.source.len(), |&(pos, _)| pos)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek().map(|&(_, c)| c) {
                        Some('/') => {
                            while self.peek_char().is_some_and(|c| c != '\n') {
                                self.advance();
                            }
                        }
                        Some('*') => {
                            self.advance();
                            self.advance();
                            let mut prev = '\0';
                            while let Some((_, c)) = self.advance() {
                                if prev == '*' && c == '/' {
                                    break;
                                }
                                prev = c;
                            }
                        }
                        _ => return,
                    }
                }
                _ => return,
            }
        }
    }

    fn number(&mut self, start: usize) -> TokenKind {
        while self
            .peek_char()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '_')
        {
            self.advance();
        }
        if self.peek_char().is_some_and(|c| c == 'e' || c == 'E') {
            self.advance();
            if self.peek_char().is_some_and(|c| c == '+' || c == '-') {
                self.advance();
            }
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let end = self.offset();
        let text: String = self
            .source
            .get(start..end)
            .unwrap_or_default()
            .chars()
            .filter(|&c| c != '_')
            .collect();
        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Invalid(text),
        }
    }

    fn string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();
        loop {
            let Some((_, c)) = self.advance() else {
                return TokenKind::Invalid("unterminated string".to_string());
            };
            match c {
                c if c == quote => break,
                '\n' => return TokenKind::Invalid("unterminated string".to_string()),
                '\\' => {
                    let Some((_, escaped)) = self.advance() else {
                        return TokenKind::Invalid("unterminated string".to_string());
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        'u' => match self.unicode_escape() {
                            Some(c) => value.push(c),
                            None => {
                                return TokenKind::Invalid("invalid unicode escape".to_string());
                            }
                        },
                        other => value.push(other),
                    }
                }
                c => value.push(c),
            }
        }
        TokenKind::String(JsString::from(value))
    }

    fn unicode_escape(&mut self) -> Option<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let (_, c) = self.advance()?;
            code = code * 16 + c.to_digit(16)?;
        }
        char::from_u32(code)
    }

    fn identifier(&mut self, start: usize) -> TokenKind {
        while self.peek_char().is_some_and(is_identifier_part) {
            self.advance();
        }
        let end = self.offset();
        let text = self.source.get(start..end).unwrap_or_default();
        match text {
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "var" => TokenKind::Var,
            "throw" => TokenKind::Throw,
            "typeof" => TokenKind::Typeof,
            "new" => TokenKind::New,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(JsString::from(text)),
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
