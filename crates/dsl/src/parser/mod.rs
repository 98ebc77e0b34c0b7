//! Hand-written recursive descent parser for logtally programs.
//!
//! ## Architecture
//!
//! - `stream`: TokenStream wrapper with lookahead
//! - `error`: syntax error constructors
//! - `expr`: expression parser using precedence climbing
//! - `stmt`: statements, declarations and blocks
//!
//! Parsing stops at the first error.

mod error;
mod expr;
mod stmt;
mod stream;

use crate::ast::Program;
use crate::error::CompileError;
use crate::lexer::{lex, Spanned, Token};
use stmt::Scope;
use stream::TokenStream;

/// Parse a token sequence produced by [`lex`].
pub fn parse(tokens: &[Spanned<Token>]) -> Result<Program, CompileError> {
    let mut stream = TokenStream::new(tokens);
    let mut stmts = Vec::new();

    while !stream.at_end() {
        if stream.check(&Token::RBrace) {
            return Err(CompileError::unexpected_token(
                stream.peek(),
                "at top level",
                stream.current_span(),
            ));
        }
        stmts.push(stmt::parse_stmt(&mut stream, Scope::TopLevel)?);
    }

    Ok(Program { stmts })
}

/// Lex and parse `source`.
pub fn parse_source(source: &str) -> Result<Program, CompileError> {
    let tokens = lex(source)?;
    parse(&tokens)
}
