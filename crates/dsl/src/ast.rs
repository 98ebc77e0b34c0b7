//! Abstract Syntax Tree for logtally programs.
//!
//! These types represent the parsed structure of a `.tally` file. They are
//! consumed once by the compiler and never mutated afterwards.

use crate::span::Span;
use serde::Serialize;

/// A complete parsed program (one source file).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

/// `{ stmt* }`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// A name as written in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StmtKind {
    /// `hidden? counter name by a, b as "x" buckets 1, 2`
    Metric(MetricDecl),
    /// `const NAME /pattern/`
    Const { name: Ident, pattern: Expr },
    /// `def name { ... next ... }`
    Def { name: Ident, body: Block },
    /// `@name { ... }`
    Decorate { name: Ident, body: Block },
    /// `next` inside a `def` body
    Next,
    /// `stop`
    Stop,
    /// `otherwise { ... }`
    Otherwise(Block),
    /// `let name = expr`
    Let { name: Ident, value: Expr },
    /// `cond { ... } else { ... }`
    Rule {
        cond: Expr,
        then: Block,
        else_block: Option<Block>,
    },
    /// `target = expr`, `target += expr`, `target -= expr`
    Assign {
        target: Target,
        op: AssignOp,
        value: Expr,
    },
    /// `target++`, `target--`
    Step { target: Target, op: StepOp },
    /// Builtin call evaluated for its side effects
    Expr(Expr),
}

/// Metric kind keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MetricKind {
    Counter,
    Gauge,
    Timer,
    Histogram,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricDecl {
    pub kind: MetricKind,
    pub name: Ident,
    /// Label keys from `by`
    pub keys: Vec<Ident>,
    /// Exported name from `as`
    pub alias: Option<String>,
    /// Upper bounds from `buckets`
    pub buckets: Vec<f64>,
    pub hidden: bool,
}

/// Left-hand side of an assignment or step: a local or a metric cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Target {
    pub name: Ident,
    /// Label values for `m[a, b]`; empty for a plain name.
    pub index: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepOp {
    Incr,
    Decr,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    /// Regex literal body
    Pattern(String),
    /// `$1`, `$name`
    Capture(String),
    /// Local, metric or constant name
    Ident(String),
    /// `m[a, b]`
    Index { name: Ident, args: Vec<Expr> },
    /// `f(a, b)`
    Call { name: Ident, args: Vec<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Match => "=~",
            BinaryOp::NotMatch => "!~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}
