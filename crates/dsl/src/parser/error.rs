//! Syntax error constructors used by the parser.

use crate::error::CompileError;
use crate::lexer::Token;
use crate::span::Span;

impl CompileError {
    /// Create an "expected token" error.
    pub fn expected_token(expected: &Token, found: &Token, span: Span) -> Self {
        Self::syntax(
            span,
            format!("expected {}, found {}", expected.describe(), found.describe()),
        )
    }

    /// Create an "expected one of" error listing the acceptable alternatives.
    pub fn expected_one_of(alternatives: &[&str], found: &Token, span: Span) -> Self {
        let expected = match alternatives {
            [] => "something else".to_string(),
            [one] => (*one).to_string(),
            [init @ .., last] => format!("{} or {}", init.join(", "), last),
        };
        Self::syntax(span, format!("expected {}, found {}", expected, found.describe()))
    }

    /// Create an "unexpected token" error.
    pub fn unexpected_token(found: &Token, context: &str, span: Span) -> Self {
        Self::syntax(span, format!("unexpected {} {}", found.describe(), context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_one_of_message() {
        let err = CompileError::expected_one_of(
            &["`{`", "`else`", "`}`"],
            &Token::Ident("x".into()),
            Span::new(3, 4),
        );
        assert_eq!(err.message, "expected `{`, `else` or `}`, found identifier");
    }

    #[test]
    fn test_expected_token_message() {
        let err = CompileError::expected_token(&Token::RBracket, &Token::Eof, Span::new(9, 9));
        assert_eq!(err.message, "expected `]`, found end of input");
    }
}
