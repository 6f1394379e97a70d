//! Token stream wrapper for the hand-written parser.

use crate::lexer::{Lexeme, Token};
use crate::span::Span;

/// Token stream with lookahead, position tracking, and layout queries.
///
/// Bracket depth is tracked as tokens are consumed so the parser can tell
/// whether a line break is a statement boundary (depth 0) or an implicit
/// continuation (inside `()`, `[]`, or `{}`).
pub struct TokenStream<'src> {
    lexemes: &'src [Lexeme],
    pos: usize,
    depth: u32,
    last_line: u32,
    last_span: Span,
}

impl<'src> TokenStream<'src> {
    pub fn new(lexemes: &'src [Lexeme]) -> Self {
        Self {
            lexemes,
            pos: 0,
            depth: 0,
            last_line: 0,
            last_span: Span::zero(),
        }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> Option<&Token> {
        self.lexemes.get(self.pos).map(|l| &l.token)
    }

    /// Peek at the nth token ahead without consuming.
    pub fn peek_nth(&self, n: usize) -> Option<&Token> {
        self.lexemes.get(self.pos + n).map(|l| &l.token)
    }

    /// Column (1-based) of the current token.
    pub fn peek_col(&self) -> Option<u32> {
        self.lexemes.get(self.pos).map(|l| l.col)
    }

    /// Line (1-based) of the current token.
    pub fn peek_line(&self) -> Option<u32> {
        self.lexemes.get(self.pos).map(|l| l.line)
    }

    /// True when the current token begins a new logical line: it sits on a
    /// later source line than the previously consumed token and no bracket
    /// is open.
    pub fn starts_new_line(&self) -> bool {
        match self.lexemes.get(self.pos) {
            Some(lexeme) => self.depth == 0 && lexeme.line > self.last_line,
            None => true,
        }
    }

    /// Advance to the next token and return the consumed one.
    pub fn advance(&mut self) -> Option<&Token> {
        let lexeme = self.lexemes.get(self.pos)?;
        self.pos += 1;
        self.last_line = lexeme.line;
        self.last_span = lexeme.span;
        match lexeme.token {
            Token::LParen | Token::LBracket | Token::LBrace => self.depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => {
                self.depth = self.depth.saturating_sub(1);
            }
            _ => {}
        }
        Some(&lexeme.token)
    }

    /// Check if the current token matches the expected token kind.
    pub fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Expect a specific token kind and advance past it.
    pub fn expect(&mut self, expected: Token) -> Result<Span, super::ParseError> {
        if self.check(&expected) {
            self.advance();
            Ok(self.last_span)
        } else {
            Err(super::ParseError::expected_token(
                &expected,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    /// Expect an identifier and return its name.
    pub fn expect_ident(&mut self, context: &str) -> Result<String, super::ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(super::ParseError::unexpected_token(
                other,
                context,
                self.current_span(),
            )),
        }
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.lexemes.len()
    }

    /// Span of the current token, or a zero-length span at EOF.
    pub fn current_span(&self) -> Span {
        match self.lexemes.get(self.pos) {
            Some(lexeme) => lexeme.span,
            None => Span::new(self.last_span.end, self.last_span.end),
        }
    }

    /// Span of the most recently consumed token.
    pub fn last_span(&self) -> Span {
        self.last_span
    }
}
