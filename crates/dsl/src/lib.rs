//! logtally DSL
//!
//! Front end for the log extraction language.
//! Turns `.tally` source text into an AST for the compiler.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod span;

pub use ast::*;
pub use error::{CompileError, Diagnostic, ErrorKind};
pub use lexer::{lex, Spanned, Token};
pub use parser::{parse, parse_source};
pub use span::{SourceFile, Span};
