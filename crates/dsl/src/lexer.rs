//! Lexical analysis for logtally programs.
//!
//! This module provides tokenization of `.tally` source code using logos.
//!
//! # Design
//!
//! - `Token`: all token types (keywords, operators, literals, identifiers)
//! - Comments and horizontal whitespace are stripped during lexing (not tokens)
//! - Regex literals are context dependent: [`lex`] decides whether a `/`
//!   opens a pattern or is the division operator, then scans the pattern body
//!   itself
//! - The token sequence always ends with [`Token::Eof`]
//!
//! # Examples
//!
//! ```
//! # use logtally_dsl::lexer::*;
//! let tokens = lex("counter lines\n/./ { lines++ }\n").unwrap();
//! assert_eq!(tokens[0].token, Token::Counter);
//! assert_eq!(tokens[2].token, Token::Regex(".".to_string()));
//! ```

use crate::error::CompileError;
use crate::span::Span;
use logos::Logos;
use std::fmt;
use thiserror::Error;

/// Reason a token could not be produced.
#[derive(Debug, Clone, Default, PartialEq, Error)]
pub enum LexErrorKind {
    #[default]
    #[error("unrecognized character")]
    UnrecognizedCharacter,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unterminated pattern")]
    UnterminatedPattern,
    #[error("invalid escape sequence `\\{0}`")]
    InvalidEscape(char),
    #[error("invalid number literal")]
    InvalidNumber,
}

/// logtally token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(error = LexErrorKind)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    /// Line break. Consumed by [`lex`] to track line starts, never emitted.
    #[token("\n")]
    Newline,

    // === Keywords ===

    // Declarations
    /// Keyword `counter`
    #[token("counter")]
    Counter,
    /// Keyword `gauge`
    #[token("gauge")]
    Gauge,
    /// Keyword `timer`
    #[token("timer")]
    Timer,
    /// Keyword `histogram`
    #[token("histogram")]
    Histogram,
    /// Keyword `hidden`
    #[token("hidden")]
    Hidden,
    /// Keyword `by`
    #[token("by")]
    By,
    /// Keyword `as`
    #[token("as")]
    As,
    /// Keyword `buckets`
    #[token("buckets")]
    Buckets,
    /// Keyword `const`
    #[token("const")]
    Const,

    // Control
    /// Keyword `def`
    #[token("def")]
    Def,
    /// Keyword `next`
    #[token("next")]
    Next,
    /// Keyword `stop`
    #[token("stop")]
    Stop,
    /// Keyword `otherwise`
    #[token("otherwise")]
    Otherwise,
    /// Keyword `else`
    #[token("else")]
    Else,
    /// Keyword `let`
    #[token("let")]
    Let,

    // === Operators ===
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("**")]
    Pow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    /// Match operator `=~`
    #[token("=~")]
    Match,
    /// Negated match operator `!~`
    #[token("!~")]
    NotMatch,

    // === Delimiters ===
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("@")]
    At,

    // === Literals ===
    /// Integer literal (e.g., 0, 42)
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().map_err(|_| LexErrorKind::InvalidNumber))]
    Int(i64),

    /// Float literal (e.g., 0.5, 1e3, 2.5e-3)
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().map_err(|_| LexErrorKind::InvalidNumber))]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+", |lex| lex.slice().parse::<f64>().map_err(|_| LexErrorKind::InvalidNumber))]
    Float(f64),

    /// String literal with escapes resolved
    #[regex(r#""([^"\\\n]|\\[^\n])*""#, unescape)]
    Str(String),

    /// Capture reference without the `$` (e.g., `1`, `user`)
    #[regex(r"\$[0-9]+", |lex| lex.slice()[1..].to_string())]
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice()[1..].to_string())]
    Capture(String),

    /// Identifier
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    /// Regex literal body, with `\/` already unescaped. Produced by [`lex`].
    Regex(String),

    /// End of input. Produced by [`lex`].
    Eof,
}

impl Token {
    /// Whether this token can end an operand, in which case a following `/`
    /// is division rather than the start of a pattern.
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Int(_)
                | Token::Float(_)
                | Token::Str(_)
                | Token::Capture(_)
                | Token::Ident(_)
                | Token::Regex(_)
                | Token::RParen
                | Token::RBracket
                | Token::PlusPlus
                | Token::MinusMinus
        )
    }

    fn as_str(&self) -> &'static str {
        match self {
            Token::Newline => "newline",
            Token::Counter => "counter",
            Token::Gauge => "gauge",
            Token::Timer => "timer",
            Token::Histogram => "histogram",
            Token::Hidden => "hidden",
            Token::By => "by",
            Token::As => "as",
            Token::Buckets => "buckets",
            Token::Const => "const",
            Token::Def => "def",
            Token::Next => "next",
            Token::Stop => "stop",
            Token::Otherwise => "otherwise",
            Token::Else => "else",
            Token::Let => "let",
            Token::PlusPlus => "++",
            Token::MinusMinus => "--",
            Token::PlusEq => "+=",
            Token::MinusEq => "-=",
            Token::Assign => "=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Pow => "**",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Bang => "!",
            Token::Match => "=~",
            Token::NotMatch => "!~",
            Token::Comma => ",",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::At => "@",
            Token::Int(_) => "integer",
            Token::Float(_) => "float",
            Token::Str(_) => "string",
            Token::Capture(_) => "capture",
            Token::Ident(_) => "identifier",
            Token::Regex(_) => "pattern",
            Token::Eof => "end of input",
        }
    }

    /// Human-readable name of this token's category, for "expected ..." messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Int(_)
            | Token::Float(_)
            | Token::Str(_)
            | Token::Capture(_)
            | Token::Ident(_)
            | Token::Regex(_)
            | Token::Eof
            | Token::Newline => self.as_str().to_string(),
            _ => format!("`{}`", self.as_str()),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Int(n) => write!(f, "{}", n),
            Token::Float(x) => write!(f, "{}", x),
            Token::Str(s) => write!(f, "{:?}", s),
            Token::Capture(name) => write!(f, "${}", name),
            Token::Ident(id) => write!(f, "{}", id),
            Token::Regex(p) => write!(f, "/{}/", p),
            _ => f.write_str(self.as_str()),
        }
    }
}

/// A token paired with its byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub token: T,
    pub span: Span,
}

/// Tokenize `source`.
///
/// Stops at the first lexical error. On success the last token is
/// [`Token::Eof`].
pub fn lex(source: &str) -> Result<Vec<Spanned<Token>>, CompileError> {
    let mut lexer = Token::lexer(source);
    let mut tokens: Vec<Spanned<Token>> = Vec::new();
    let mut at_line_start = true;

    while let Some(result) = lexer.next() {
        let token = match result {
            Ok(Token::Newline) => {
                at_line_start = true;
                continue;
            }
            Ok(Token::Slash) if at_line_start || pattern_allowed(&tokens) => {
                match scan_pattern(lexer.remainder()) {
                    Ok((pattern, consumed)) => {
                        lexer.bump(consumed);
                        Token::Regex(pattern)
                    }
                    Err(consumed) => {
                        let start = lexer.span().start;
                        let end = lexer.span().end + consumed;
                        return Err(CompileError::syntax(
                            Span::from(start..end),
                            LexErrorKind::UnterminatedPattern.to_string(),
                        ));
                    }
                }
            }
            Ok(token) => token,
            Err(kind) => return Err(lex_error(kind, lexer.slice(), lexer.span())),
        };

        at_line_start = false;
        tokens.push(Spanned {
            token,
            span: Span::from(lexer.span()),
        });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        span: Span::from(source.len()..source.len()),
    });
    Ok(tokens)
}

/// Whether a `/` following `tokens` opens a pattern.
fn pattern_allowed(tokens: &[Spanned<Token>]) -> bool {
    match tokens {
        [] => true,
        // `const NAME /.../`
        [.., prev, last] if prev.token == Token::Const && matches!(last.token, Token::Ident(_)) => {
            true
        }
        [.., last] => !last.token.ends_operand(),
    }
}

fn lex_error(kind: LexErrorKind, slice: &str, span: std::ops::Range<usize>) -> CompileError {
    let message = match kind {
        LexErrorKind::UnrecognizedCharacter if slice.starts_with('"') => {
            LexErrorKind::UnterminatedString.to_string()
        }
        LexErrorKind::UnrecognizedCharacter => match slice.chars().next() {
            Some(c) => format!("unrecognized character `{}`", c),
            None => kind.to_string(),
        },
        other => other.to_string(),
    };
    CompileError::syntax(Span::from(span), message)
}

/// Scan a regex body following an opening `/`.
///
/// Returns the unescaped pattern and the number of bytes consumed including
/// the closing `/`, or the number of bytes scanned before the line ended.
fn scan_pattern(rest: &str) -> Result<(String, usize), usize> {
    let mut pattern = String::new();
    let mut chars = rest.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '/' => return Ok((pattern, i + 1)),
            '\n' => return Err(i),
            '\\' => match chars.next() {
                Some((_, '/')) => pattern.push('/'),
                Some((j, '\n')) => return Err(j),
                Some((_, escaped)) => {
                    pattern.push('\\');
                    pattern.push(escaped);
                }
                None => return Err(rest.len()),
            },
            _ => pattern.push(c),
        }
    }

    Err(rest.len())
}

fn unescape(lex: &mut logos::Lexer<Token>) -> Result<String, LexErrorKind> {
    let slice = lex.slice();
    let content = &slice[1..slice.len() - 1];
    let mut out = String::with_capacity(content.len());
    let mut chars = content.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => return Err(LexErrorKind::InvalidEscape(other)),
            None => return Err(LexErrorKind::UnterminatedString),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    /// Test helper: lex source and drop spans and the trailing Eof.
    fn tokens(source: &str) -> Vec<Token> {
        let mut tokens: Vec<Token> = lex(source)
            .expect("lexing failed")
            .into_iter()
            .map(|t| t.token)
            .collect();
        assert_eq!(tokens.pop(), Some(Token::Eof));
        tokens
    }

    fn lex_err(source: &str) -> CompileError {
        lex(source).expect_err("expected a lex error")
    }

    #[test]
    fn test_keywords() {
        assert_eq!(
            tokens("counter gauge timer histogram hidden by as buckets"),
            vec![
                Token::Counter,
                Token::Gauge,
                Token::Timer,
                Token::Histogram,
                Token::Hidden,
                Token::By,
                Token::As,
                Token::Buckets,
            ]
        );
        assert_eq!(
            tokens("const def next stop otherwise else let"),
            vec![
                Token::Const,
                Token::Def,
                Token::Next,
                Token::Stop,
                Token::Otherwise,
                Token::Else,
                Token::Let,
            ]
        );
    }

    #[test]
    fn test_identifiers_and_captures() {
        assert_eq!(
            tokens("bytes_total $1 $user counters"),
            vec![
                Token::Ident("bytes_total".into()),
                Token::Capture("1".into()),
                Token::Capture("user".into()),
                Token::Ident("counters".into()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 0.5 1e3 2.5e-3"),
            vec![
                Token::Int(42),
                Token::Float(0.5),
                Token::Float(1000.0),
                Token::Float(0.0025),
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#""plain" "a\"b" "tab\there\n""#),
            vec![
                Token::Str("plain".into()),
                Token::Str("a\"b".into()),
                Token::Str("tab\there\n".into()),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("++ -- += -= = + - * % ** == != < <= > >= && || ! =~ !~ , ( ) { } [ ] @"),
            vec![
                Token::PlusPlus,
                Token::MinusMinus,
                Token::PlusEq,
                Token::MinusEq,
                Token::Assign,
                Token::Plus,
                Token::Minus,
                Token::Star,
                Token::Percent,
                Token::Pow,
                Token::EqEq,
                Token::NotEq,
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
                Token::Match,
                Token::NotMatch,
                Token::Comma,
                Token::LParen,
                Token::RParen,
                Token::LBrace,
                Token::RBrace,
                Token::LBracket,
                Token::RBracket,
                Token::At,
            ]
        );
    }

    #[test]
    fn test_regex_at_line_start() {
        assert_eq!(
            tokens(r"/user=(\w+) bytes=(\d+)/ {"),
            vec![
                Token::Regex(r"user=(\w+) bytes=(\d+)".into()),
                Token::LBrace,
            ]
        );
    }

    #[test]
    fn test_slash_after_operand_is_division() {
        assert_eq!(
            tokens("x = $1 / 2"),
            vec![
                Token::Ident("x".into()),
                Token::Assign,
                Token::Capture("1".into()),
                Token::Slash,
                Token::Int(2),
            ]
        );
    }

    #[test]
    fn test_regex_after_operator() {
        assert_eq!(
            tokens("$2 =~ /^\\d+$/"),
            vec![
                Token::Capture("2".into()),
                Token::Match,
                Token::Regex("^\\d+$".into()),
            ]
        );
    }

    #[test]
    fn test_regex_on_new_line_after_operand() {
        assert_eq!(
            tokens("let x = 1\n/a/ {}"),
            vec![
                Token::Let,
                Token::Ident("x".into()),
                Token::Assign,
                Token::Int(1),
                Token::Regex("a".into()),
                Token::LBrace,
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_regex_after_const_name() {
        assert_eq!(
            tokens("const DATE /\\d+/"),
            vec![
                Token::Const,
                Token::Ident("DATE".into()),
                Token::Regex("\\d+".into()),
            ]
        );
    }

    #[test]
    fn test_regex_escaped_slash() {
        assert_eq!(
            tokens(r"/GET \/api\/v1 \d/"),
            vec![Token::Regex(r"GET /api/v1 \d".into())]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            tokens("# a comment\ncounter a # trailing\n"),
            vec![Token::Counter, Token::Ident("a".into())]
        );
    }

    #[test]
    fn test_spans() {
        let toks = lex("counter a\n/x/").unwrap();
        assert_eq!(toks[0].span, Span::new(0, 7));
        assert_eq!(toks[1].span, Span::new(8, 9));
        assert_eq!(toks[2].span, Span::new(10, 13));
        assert_eq!(toks[3].token, Token::Eof);
        assert_eq!(toks[3].span, Span::new(13, 13));
    }

    #[test]
    fn test_unterminated_string() {
        let err = lex_err("let s = \"abc\nx");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "unterminated string");
        assert_eq!(err.span.start, 8);
    }

    #[test]
    fn test_unterminated_pattern() {
        let err = lex_err("counter a\n/abc\n");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "unterminated pattern");
        assert_eq!(err.span.start, 10);
    }

    #[test]
    fn test_invalid_escape() {
        let err = lex_err(r#"let s = "a\qb""#);
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "invalid escape sequence `\\q`");
    }

    #[test]
    fn test_unrecognized_character() {
        let err = lex_err("counter a\n  ^");
        assert_eq!(err.kind, ErrorKind::Syntax);
        assert_eq!(err.message, "unrecognized character `^`");
        assert_eq!(err.span.start, 12);
    }

    #[test]
    fn test_display_roundtrips_operators() {
        assert_eq!(Token::Match.to_string(), "=~");
        assert_eq!(Token::Regex("a/b".into()).to_string(), "/a/b/");
        assert_eq!(Token::LBrace.describe(), "`{`");
        assert_eq!(Token::Ident("x".into()).describe(), "identifier");
    }
}
