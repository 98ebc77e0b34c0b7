//! Statement and declaration parsers (keyword-dispatched).

use super::expr::parse_expr;
use super::{CompileError, TokenStream};
use crate::ast::{
    AssignOp, Block, Expr, ExprKind, Ident, MetricDecl, MetricKind, StepOp, Stmt, StmtKind,
    Target,
};
use crate::lexer::Token;

/// Where a statement appears; controls which statements are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Scope {
    /// Program top level: declarations, constants and decorator definitions allowed.
    TopLevel,
    /// Inside a rule or decorator application block.
    Block,
    /// Inside a `def` body, where `next` is legal.
    Def,
}

impl Scope {
    fn nested(self) -> Scope {
        match self {
            Scope::TopLevel | Scope::Block => Scope::Block,
            Scope::Def => Scope::Def,
        }
    }
}

pub(super) fn parse_stmt(stream: &mut TokenStream, scope: Scope) -> Result<Stmt, CompileError> {
    let start = stream.current_pos();
    let span = stream.current_span();

    let kind = match stream.peek() {
        Token::Hidden | Token::Counter | Token::Gauge | Token::Timer | Token::Histogram => {
            require_top_level(stream, scope, "metric declarations")?;
            StmtKind::Metric(parse_metric_decl(stream)?)
        }
        Token::Const => {
            require_top_level(stream, scope, "`const` definitions")?;
            stream.advance();
            let name = parse_ident(stream, "constant name")?;
            let pattern = parse_expr(stream)?;
            StmtKind::Const { name, pattern }
        }
        Token::Def => {
            require_top_level(stream, scope, "`def` definitions")?;
            stream.advance();
            let name = parse_ident(stream, "decorator name")?;
            let body = parse_block(stream, Scope::Def)?;
            StmtKind::Def { name, body }
        }
        Token::At => {
            stream.advance();
            let name = parse_ident(stream, "decorator name")?;
            let body = parse_block(stream, scope.nested())?;
            StmtKind::Decorate { name, body }
        }
        Token::Next => {
            if scope != Scope::Def {
                return Err(CompileError::syntax(
                    span,
                    "`next` is only allowed inside a `def` body",
                ));
            }
            stream.advance();
            StmtKind::Next
        }
        Token::Stop => {
            stream.advance();
            StmtKind::Stop
        }
        Token::Otherwise => {
            stream.advance();
            StmtKind::Otherwise(parse_block(stream, scope.nested())?)
        }
        Token::Let => {
            stream.advance();
            let name = parse_ident(stream, "variable name")?;
            stream.expect(Token::Assign)?;
            let value = parse_expr(stream)?;
            StmtKind::Let { name, value }
        }
        _ => parse_expr_stmt(stream, scope)?,
    };

    Ok(Stmt {
        kind,
        span: stream.span_from(start),
    })
}

/// Rule, assignment, step, or bare builtin call.
fn parse_expr_stmt(stream: &mut TokenStream, scope: Scope) -> Result<StmtKind, CompileError> {
    let expr = parse_expr(stream)?;

    match stream.peek() {
        Token::LBrace => {
            let then = parse_block(stream, scope.nested())?;
            let else_block = if stream.eat(&Token::Else) {
                Some(parse_block(stream, scope.nested())?)
            } else {
                None
            };
            Ok(StmtKind::Rule {
                cond: expr,
                then,
                else_block,
            })
        }
        Token::PlusPlus | Token::MinusMinus => {
            let op = match stream.advance() {
                Token::PlusPlus => StepOp::Incr,
                _ => StepOp::Decr,
            };
            Ok(StmtKind::Step {
                target: into_target(expr)?,
                op,
            })
        }
        Token::Assign | Token::PlusEq | Token::MinusEq => {
            let op = match stream.advance() {
                Token::Assign => AssignOp::Set,
                Token::PlusEq => AssignOp::Add,
                _ => AssignOp::Sub,
            };
            let target = into_target(expr)?;
            let value = parse_expr(stream)?;
            Ok(StmtKind::Assign { target, op, value })
        }
        _ if matches!(expr.kind, ExprKind::Call { .. }) => Ok(StmtKind::Expr(expr)),
        other => Err(CompileError::expected_one_of(
            &["`{`", "`++`", "`--`", "`=`", "`+=`", "`-=`"],
            other,
            stream.current_span(),
        )),
    }
}

fn into_target(expr: Expr) -> Result<Target, CompileError> {
    let span = expr.span;
    match expr.kind {
        ExprKind::Ident(name) => Ok(Target {
            name: Ident { name, span },
            index: Vec::new(),
            span,
        }),
        ExprKind::Index { name, args } => Ok(Target {
            name,
            index: args,
            span,
        }),
        _ => Err(CompileError::syntax(
            span,
            "invalid assignment target, expected a variable or metric",
        )),
    }
}

fn parse_metric_decl(stream: &mut TokenStream) -> Result<MetricDecl, CompileError> {
    let hidden = stream.eat(&Token::Hidden);

    let span = stream.current_span();
    let kind = match stream.peek() {
        Token::Counter => MetricKind::Counter,
        Token::Gauge => MetricKind::Gauge,
        Token::Timer => MetricKind::Timer,
        Token::Histogram => MetricKind::Histogram,
        other => {
            return Err(CompileError::expected_one_of(
                &["`counter`", "`gauge`", "`timer`", "`histogram`"],
                other,
                span,
            ))
        }
    };
    stream.advance();

    let name = parse_ident(stream, "metric name")?;

    let mut keys = Vec::new();
    if stream.eat(&Token::By) {
        loop {
            keys.push(parse_ident(stream, "label key")?);
            if !stream.eat(&Token::Comma) {
                break;
            }
        }
    }

    let mut alias = None;
    if stream.eat(&Token::As) {
        let span = stream.current_span();
        match stream.advance() {
            Token::Str(s) => alias = Some(s.clone()),
            other => return Err(CompileError::expected_one_of(&["string"], other, span)),
        }
    }

    let mut buckets = Vec::new();
    if stream.eat(&Token::Buckets) {
        loop {
            let span = stream.current_span();
            match stream.advance() {
                Token::Int(n) => buckets.push(*n as f64),
                Token::Float(x) => buckets.push(*x),
                other => return Err(CompileError::expected_one_of(&["number"], other, span)),
            }
            if !stream.eat(&Token::Comma) {
                break;
            }
        }
    }

    Ok(MetricDecl {
        kind,
        name,
        keys,
        alias,
        buckets,
        hidden,
    })
}

/// Parse `{ stmt* }`.
pub(super) fn parse_block(stream: &mut TokenStream, scope: Scope) -> Result<Block, CompileError> {
    let start = stream.current_pos();
    stream.expect(Token::LBrace)?;

    let mut stmts = Vec::new();
    while !stream.check(&Token::RBrace) {
        if stream.at_end() {
            return Err(CompileError::expected_token(
                &Token::RBrace,
                stream.peek(),
                stream.current_span(),
            ));
        }
        stmts.push(parse_stmt(stream, scope)?);
    }
    stream.expect(Token::RBrace)?;

    Ok(Block {
        stmts,
        span: stream.span_from(start),
    })
}

fn parse_ident(stream: &mut TokenStream, what: &str) -> Result<Ident, CompileError> {
    let (name, span) = stream.expect_ident(what)?;
    Ok(Ident { name, span })
}

fn require_top_level(
    stream: &TokenStream,
    scope: Scope,
    what: &str,
) -> Result<(), CompileError> {
    if scope == Scope::TopLevel {
        Ok(())
    } else {
        Err(CompileError::syntax(
            stream.current_span(),
            format!("{} are only allowed at the top level", what),
        ))
    }
}
