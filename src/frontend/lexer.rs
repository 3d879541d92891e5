use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::EnumString;

use crate::frontend::SourceFile;

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    line_number: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // while
    Identifier,       // counter

    /* Literals */
    IntegerLiteral, // 1
    StringLiteral,  // "hello, world"

    /* Delimiters */
    OpenParen,  // (
    CloseParen, // )
    OpenBrace,  // {
    CloseBrace, // }
    Semicolon,  // ;
    Comma,      // ,

    /* Assignment */
    Equals, // =

    /* Binary Ops */
    Plus,       // +
    Minus,      // -
    Asterisk,   // *
    Divide,     // /
    BitwiseAnd, // &
    BitwiseOr,  // |
    BitwiseXor, // ^

    /* Comparison Ops */
    DoubleEquals,         // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
}

impl TokenKind {
    pub fn is_comparison_operator(&self) -> bool {
        matches!(
            self,
            Self::DoubleEquals
                | Self::NotEquals
                | Self::LessThan
                | Self::LessThanOrEqualTo
                | Self::GreaterThan
                | Self::GreaterThanOrEqualTo
        )
    }

    pub fn is_term_operator(&self) -> bool {
        matches!(self, Self::Plus | Self::Minus)
    }

    pub fn is_factor_operator(&self) -> bool {
        matches!(self, Self::Asterisk | Self::Divide)
    }

    pub fn is_bitwise_operator(&self) -> bool {
        matches!(self, Self::BitwiseAnd | Self::BitwiseOr | Self::BitwiseXor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Int,
    String,
    If,
    Else,
    While,
    Print,
    Prints,
}

/// Table of single char tokens (matched after longer sequences are checked for)
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (';', TokenKind::Semicolon),
        (',', TokenKind::Comma),
        ('=', TokenKind::Equals),
        ('+', TokenKind::Plus),
        ('-', TokenKind::Minus),
        ('*', TokenKind::Asterisk),
        ('/', TokenKind::Divide),
        ('&', TokenKind::BitwiseAnd),
        ('|', TokenKind::BitwiseOr),
        ('^', TokenKind::BitwiseXor),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            line_number: 0,
            peek_buffer: VecDeque::new(),
        }
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.source.contents.len()
    }

    pub fn source(&self) -> &SourceFile {
        self.source
    }

    fn report_fatal_error(&self, message: &str) -> ! {
        eprintln!(
            "Fatal error reported in Lexer ({}:{}:{}):",
            self.source.origin,
            self.line_number + 1,
            self.source.column_for_position(self.position)
        );
        eprintln!("{message}");
        std::process::exit(1);
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_whitespace() {
                break;
            }

            if c == '\n' {
                self.line_number += 1;
            }

            self.chars.next();
            self.position += 1;
        }
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.chars.next();
            self.position += 1;
        }
    }

    fn read_wrapped(&mut self, wrapper: char, kind: TokenKind) -> Token {
        let start_position = self.position;

        // Consume first wrapper
        assert!(self.chars.next().is_some());
        self.position += 1;

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                self.report_fatal_error(&format!(
                    "Reached end of line while reading wrapped literal: {kind:?}"
                ));
            }

            // Consume chars within the wrapped literal
            self.chars.next();
            self.position += 1;

            if c == wrapper {
                return Token {
                    span: self.new_span(start_position),
                    kind,
                };
            }
        }

        self.report_fatal_error(&format!(
            "Reached end of file while reading wrapped literal: {kind:?}"
        ))
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_ascii_alphanumeric() || c == '_') {
                break;
            }

            self.chars.next();
            self.position += 1;
        }

        let span = self.new_span(start_position);
        let value = self.source.value_of_span(span);

        let kind = if let Ok(keyword) = value.parse() {
            TokenKind::Keyword(keyword)
        } else {
            TokenKind::Identifier
        };

        Token { kind, span }
    }

    fn read_number(&mut self) -> Token {
        let start_position = self.position;

        assert!(self.chars.peek().is_some());

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii_digit() {
                break;
            }

            self.chars.next();
            self.position += 1;
        }

        Token {
            kind: TokenKind::IntegerLiteral,
            span: self.new_span(start_position),
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.chars.next();
        self.position += 1;

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_double(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.chars.next();
        self.chars.next();

        self.position += 2;

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Option<Token> {
        if !self.peek_buffer.is_empty() {
            return self.peek_buffer.front().cloned();
        }

        if let Some(token) = self.next() {
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.front().cloned()
    }

    pub fn next(&mut self) -> Option<Token> {
        if !self.peek_buffer.is_empty() {
            return self.peek_buffer.pop_front();
        }

        while let Some(c) = self.chars.peek().copied() {
            if !c.is_ascii() {
                self.report_fatal_error(&format!("Unexpected non-ascii character in stream: `{c}`"))
            }

            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '#' => {
                    self.ignore_line();
                    continue;
                }

                // String literals
                '"' => self.read_wrapped('"', TokenKind::StringLiteral),

                // Integer literals
                n if n.is_ascii_digit() => self.read_number(),

                // Identifiers and keywords
                a if a.is_ascii_alphabetic() || a == '_' => self.read_word(),

                // Double Equals (==)
                '=' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::DoubleEquals)
                }
                // Not Equals (!=)
                '!' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::NotEquals)
                }
                // Less than or equal (<=)
                '<' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::LessThanOrEqualTo)
                }
                // Greater than or equal (>=)
                '>' if self.chars.peek_nth(1).is_some_and(|c| *c == '=') => {
                    self.read_double(TokenKind::GreaterThanOrEqualTo)
                }

                s if SINGLE_TOKENS.contains_key(&s) => {
                    self.read_single(*SINGLE_TOKENS.get(&s).unwrap())
                }
                c => self.report_fatal_error(&format!("Unexpected character in stream: `{c}`")),
            };

            return Some(token);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::SourceFileOrigin;

    fn lex_kinds(source: &str) -> Vec<TokenKind> {
        let source = SourceFile {
            contents: source.to_owned(),
            origin: SourceFileOrigin::Memory,
        };
        let mut lexer = Lexer::new(&source);
        let mut kinds = Vec::new();

        while let Some(token) = lexer.next() {
            kinds.push(token.kind);
        }

        kinds
    }

    #[test]
    fn lexes_declaration_and_assignment() {
        assert_eq!(
            lex_kinds("int x, y; x = 2 + 3;"),
            vec![
                TokenKind::Keyword(Keyword::Int),
                TokenKind::Identifier,
                TokenKind::Comma,
                TokenKind::Identifier,
                TokenKind::Semicolon,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::IntegerLiteral,
                TokenKind::Plus,
                TokenKind::IntegerLiteral,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn distinguishes_comparison_operators() {
        assert_eq!(
            lex_kinds("< <= == != >= >"),
            vec![
                TokenKind::LessThan,
                TokenKind::LessThanOrEqualTo,
                TokenKind::DoubleEquals,
                TokenKind::NotEquals,
                TokenKind::GreaterThanOrEqualTo,
                TokenKind::GreaterThan,
            ]
        );
    }

    #[test]
    fn lexes_print_forms_and_strings() {
        assert_eq!(
            lex_kinds("prints(\"hi there\"); print(x);"),
            vec![
                TokenKind::Keyword(Keyword::Prints),
                TokenKind::OpenParen,
                TokenKind::StringLiteral,
                TokenKind::CloseParen,
                TokenKind::Semicolon,
                TokenKind::Keyword(Keyword::Print),
                TokenKind::OpenParen,
                TokenKind::Identifier,
                TokenKind::CloseParen,
                TokenKind::Semicolon,
            ]
        );
    }

    #[test]
    fn skips_comments() {
        assert_eq!(
            lex_kinds("# a comment\nwhile"),
            vec![TokenKind::Keyword(Keyword::While)]
        );
    }
}
