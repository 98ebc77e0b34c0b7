//! Compile-time error types.
//!
//! Every stage of the front end (lexer, parser, compiler) fails with a
//! [`CompileError`]. Errors carry a byte [`Span`]; rendering against a
//! [`SourceFile`] turns them into a [`Diagnostic`] with line and column.

use crate::span::{SourceFile, Span};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed source: bad token, unterminated literal, grammar violation.
    Syntax,
    /// Metric declaration conflict: duplicate name, shape mismatch with the store,
    /// invalid buckets.
    Declaration,
    /// Name that resolves to no metric, local, capture, constant or decorator.
    UndefinedReference,
    /// Statically detectable type misuse (e.g. decrementing a counter).
    Type,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Syntax => "syntax error",
            ErrorKind::Declaration => "declaration error",
            ErrorKind::UndefinedReference => "undefined reference",
            ErrorKind::Type => "type error",
        };
        f.write_str(s)
    }
}

/// A compile error with source location.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
}

impl CompileError {
    pub fn new(kind: ErrorKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            span,
            message: message.into(),
        }
    }

    pub fn syntax(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, span, message)
    }

    pub fn declaration(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Declaration, span, message)
    }

    pub fn undefined(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UndefinedReference, span, message)
    }

    pub fn type_error(span: Span, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, span, message)
    }

    /// Resolve this error's span against `file`.
    pub fn to_diagnostic(&self, file: &SourceFile) -> Diagnostic {
        let (line, column) = file.line_col(self.span.start);
        Diagnostic {
            file: file.name.clone(),
            line,
            column,
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

/// A compile error located by file, line and column.
///
/// Displays as `file:line:column: kind: message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{file}:{line}:{column}: {kind}: {message}")]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub kind: ErrorKind,
    pub message: String,
}
