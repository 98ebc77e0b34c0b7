//! Expression parser - precedence climbing for binary and unary operators.

use super::{CompileError, TokenStream};
use crate::ast::{BinaryOp, Expr, ExprKind, Ident, UnaryOp};
use crate::lexer::Token;

/// Operator associativity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

/// Get binary operator metadata (precedence, associativity, and operator enum).
///
/// Returns (precedence, associativity, op) where higher precedence = tighter binding.
fn binary_op_info(token: &Token) -> Option<(u8, Assoc, BinaryOp)> {
    match token {
        Token::OrOr => Some((10, Assoc::Left, BinaryOp::Or)),
        Token::AndAnd => Some((20, Assoc::Left, BinaryOp::And)),
        Token::EqEq => Some((30, Assoc::Left, BinaryOp::Eq)),
        Token::NotEq => Some((30, Assoc::Left, BinaryOp::Ne)),
        Token::Lt => Some((30, Assoc::Left, BinaryOp::Lt)),
        Token::Le => Some((30, Assoc::Left, BinaryOp::Le)),
        Token::Gt => Some((30, Assoc::Left, BinaryOp::Gt)),
        Token::Ge => Some((30, Assoc::Left, BinaryOp::Ge)),
        Token::Match => Some((35, Assoc::Left, BinaryOp::Match)),
        Token::NotMatch => Some((35, Assoc::Left, BinaryOp::NotMatch)),
        Token::Plus => Some((40, Assoc::Left, BinaryOp::Add)),
        Token::Minus => Some((40, Assoc::Left, BinaryOp::Sub)),
        Token::Star => Some((50, Assoc::Left, BinaryOp::Mul)),
        Token::Slash => Some((50, Assoc::Left, BinaryOp::Div)),
        Token::Percent => Some((50, Assoc::Left, BinaryOp::Mod)),
        Token::Pow => Some((60, Assoc::Right, BinaryOp::Pow)),
        _ => None,
    }
}

/// Parse a full expression.
pub(super) fn parse_expr(stream: &mut TokenStream) -> Result<Expr, CompileError> {
    parse_pratt(stream, 0)
}

fn parse_pratt(stream: &mut TokenStream, min_prec: u8) -> Result<Expr, CompileError> {
    let mut left = parse_prefix(stream)?;

    while let Some((prec, assoc, op)) = binary_op_info(stream.peek()) {
        if prec < min_prec {
            break;
        }
        stream.advance();

        let next_prec = if assoc == Assoc::Left { prec + 1 } else { prec };
        let right = parse_pratt(stream, next_prec)?;

        let span = left.span.merge(right.span);
        left = Expr::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        );
    }

    Ok(left)
}

fn parse_prefix(stream: &mut TokenStream) -> Result<Expr, CompileError> {
    let op = match stream.peek() {
        Token::Minus => UnaryOp::Neg,
        Token::Bang => UnaryOp::Not,
        _ => return parse_postfix(stream),
    };
    let start = stream.current_pos();
    stream.advance();

    let operand = parse_prefix(stream)?;
    Ok(Expr::new(
        ExprKind::Unary {
            op,
            operand: Box::new(operand),
        },
        stream.span_from(start),
    ))
}

/// Primary expression followed by an optional `[...]` label index.
fn parse_postfix(stream: &mut TokenStream) -> Result<Expr, CompileError> {
    let start = stream.current_pos();
    let expr = parse_atom(stream)?;

    if !stream.check(&Token::LBracket) {
        return Ok(expr);
    }
    let name = match expr.kind {
        ExprKind::Ident(name) => Ident {
            name,
            span: expr.span,
        },
        _ => {
            return Err(CompileError::unexpected_token(
                stream.peek(),
                "after a non-metric expression",
                stream.current_span(),
            ))
        }
    };
    let args = parse_index(stream)?;

    Ok(Expr::new(
        ExprKind::Index { name, args },
        stream.span_from(start),
    ))
}

/// Parse `[ expr (, expr)* ]`.
fn parse_index(stream: &mut TokenStream) -> Result<Vec<Expr>, CompileError> {
    stream.expect(Token::LBracket)?;
    let args = parse_list(stream, Token::RBracket)?;
    stream.expect(Token::RBracket)?;
    Ok(args)
}

/// Comma separated expressions up to (not including) `close`.
fn parse_list(stream: &mut TokenStream, close: Token) -> Result<Vec<Expr>, CompileError> {
    let mut items = Vec::new();
    if stream.check(&close) {
        return Ok(items);
    }
    loop {
        items.push(parse_expr(stream)?);
        if !stream.eat(&Token::Comma) {
            break;
        }
    }
    Ok(items)
}

fn parse_atom(stream: &mut TokenStream) -> Result<Expr, CompileError> {
    let start = stream.current_pos();
    let span = stream.current_span();

    let kind = match stream.peek() {
        Token::Int(n) => ExprKind::Int(*n),
        Token::Float(x) => ExprKind::Float(*x),
        Token::Str(s) => ExprKind::Str(s.clone()),
        Token::Regex(p) => ExprKind::Pattern(p.clone()),
        Token::Capture(c) => ExprKind::Capture(c.clone()),
        Token::Ident(name) if matches!(stream.peek_nth(1), Token::LParen) => {
            let name = Ident {
                name: name.clone(),
                span,
            };
            stream.advance();
            stream.expect(Token::LParen)?;
            let args = parse_list(stream, Token::RParen)?;
            stream.expect(Token::RParen)?;
            return Ok(Expr::new(
                ExprKind::Call { name, args },
                stream.span_from(start),
            ));
        }
        Token::Ident(name) => ExprKind::Ident(name.clone()),
        Token::LParen => {
            stream.advance();
            let inner = parse_expr(stream)?;
            stream.expect(Token::RParen)?;
            return Ok(Expr::new(inner.kind, stream.span_from(start)));
        }
        other => return Err(CompileError::expected_one_of(&["expression"], other, span)),
    };

    stream.advance();
    Ok(Expr::new(kind, span))
}
