//! Token stream wrapper for the recursive descent parser.

use super::CompileError;
use crate::lexer::{Spanned, Token};
use crate::span::Span;

/// Token stream with lookahead and position tracking.
///
/// The underlying slice always ends with [`Token::Eof`], so `peek` never runs
/// out of tokens; `advance` stops on `Eof` instead of moving past it.
pub struct TokenStream<'src> {
    tokens: &'src [Spanned<Token>],
    pos: usize,
}

static EOF: Token = Token::Eof;

impl<'src> TokenStream<'src> {
    pub fn new(tokens: &'src [Spanned<Token>]) -> Self {
        Self { tokens, pos: 0 }
    }

    /// Peek at the current token without consuming it.
    pub fn peek(&self) -> &'src Token {
        self.peek_nth(0)
    }

    /// Peek at the nth token ahead without consuming.
    pub fn peek_nth(&self, n: usize) -> &'src Token {
        self.tokens.get(self.pos + n).map(|t| &t.token).unwrap_or(&EOF)
    }

    /// Advance to the next token and return the current one.
    pub fn advance(&mut self) -> &'src Token {
        let token = self.peek();
        if !self.at_end() {
            self.pos += 1;
        }
        token
    }

    /// Check if the current token has the same kind as `expected`.
    pub fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(expected)
    }

    /// Consume the current token if it has the same kind as `expected`.
    pub fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Expect a specific token and advance if it matches.
    pub fn expect(&mut self, expected: Token) -> Result<Span, CompileError> {
        if self.check(&expected) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(CompileError::expected_token(
                &expected,
                self.peek(),
                self.current_span(),
            ))
        }
    }

    /// Expect an identifier and return its name and span.
    pub fn expect_ident(&mut self, context: &str) -> Result<(String, Span), CompileError> {
        let span = self.current_span();
        match self.peek() {
            Token::Ident(name) => {
                self.advance();
                Ok((name.clone(), span))
            }
            other => Err(CompileError::expected_one_of(&[context], other, span)),
        }
    }

    /// Check if we've reached the end of the token stream.
    pub fn at_end(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    /// Get the current position in the token stream.
    pub fn current_pos(&self) -> usize {
        self.pos
    }

    /// Create a span from a starting position to the end of the last consumed token.
    pub fn span_from(&self, start: usize) -> Span {
        let start_byte = self.tokens.get(start).map(|t| t.span.start).unwrap_or(0);
        let end_byte = if self.pos > start {
            self.tokens
                .get(self.pos - 1)
                .map(|t| t.span.end)
                .unwrap_or(start_byte)
        } else {
            start_byte
        };
        Span::new(start_byte, end_byte)
    }

    /// Get a span for the current token.
    pub fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }
}
