//! Checker and bytecode compiler
//!
//! Walks a parsed program once, in declaration order, resolving every name
//! and checking metric statements while emitting a flat [`Program`].
//!
//! # Design
//!
//! - A rule compiles to its condition followed by `JumpIfFalse` over the
//!   block, so an unmatched outer pattern skips every inner rule.
//! - Pattern literals are compiled to [`Regex`] here, once per match site.
//! - Capture references resolve against the match sites of the enclosing
//!   rules, innermost first.
//! - A decorator body is compiled in place at each use; the decorated block
//!   is compiled where the body says `next`.
//! - Counters, gauges and timers are integer unless some statement writes a
//!   float-typed expression to them.

use std::collections::HashMap;

use logtally_dsl::ast::{self, AssignOp, BinaryOp, Block, Expr, ExprKind, Ident, StepOp};
use logtally_dsl::ast::{MetricKind, Stmt, StmtKind, Target, UnaryOp};
use logtally_dsl::{CompileError, Diagnostic, SourceFile, Span};
use logtally_metrics::{Kind, MetricDecl, ValueType};
use regex::Regex;
use tracing::debug;

use crate::builtins::Builtin;
use crate::bytecode::{CaptureRef, MutateOp, Op, Pattern, Program, SlotId};
use crate::value::Value;

type Result<T> = std::result::Result<T, CompileError>;

/// Static type of an expression, used to infer metric value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Type {
    Int,
    Float,
    Str,
    Bool,
}

impl Type {
    fn arith(self, other: Type) -> Type {
        if self == Type::Float || other == Type::Float {
            Type::Float
        } else {
            Type::Int
        }
    }
}

/// Compile a parsed program.
pub fn compile(name: &str, program: &ast::Program) -> Result<Program> {
    let mut compiler = Compiler::new(name);
    compiler.compile_program(program)?;
    let program = compiler.finish();
    debug!(
        program = %program.name,
        ops = program.ops.len(),
        patterns = program.patterns.len(),
        metrics = program.metrics.len(),
        "program compiled"
    );
    Ok(program)
}

/// Lex, parse and compile `source`, locating any error by line and column.
pub fn compile_source(name: &str, source: &str) -> std::result::Result<Program, Diagnostic> {
    logtally_dsl::parse_source(source)
        .and_then(|ast| compile(name, &ast))
        .map_err(|err| err.to_diagnostic(&SourceFile::new(name, source)))
}

/// A decorator use being expanded.
struct Expansion {
    name: String,
    /// The decorated block, compiled at `next`
    body: Block,
    /// `otherwise` flag of the block containing the `@name`
    flag: Option<SlotId>,
}

enum Resolved {
    Local(SlotId),
    Metric(u16),
}

/// Compiler state
struct Compiler {
    program: Program,
    /// Metric identifier -> index into `program.metrics`
    metrics: HashMap<String, u16>,
    /// Constant name -> pattern source
    consts: HashMap<String, String>,
    defs: HashMap<String, Block>,
    /// Block-scoped locals, innermost last
    locals: Vec<HashMap<String, (SlotId, Type)>>,
    next_local: SlotId,
    /// Match sites per enclosing rule condition, innermost last
    captures: Vec<Vec<u16>>,
    /// `otherwise` flag slot per open block
    flags: Vec<Option<SlotId>>,
    rule_depth: usize,
    expansions: Vec<Expansion>,
}

impl Compiler {
    fn new(name: &str) -> Self {
        Self {
            program: Program::new(name),
            metrics: HashMap::new(),
            consts: HashMap::new(),
            defs: HashMap::new(),
            locals: vec![HashMap::new()],
            next_local: 0,
            captures: vec![Vec::new()],
            flags: Vec::new(),
            rule_depth: 0,
            expansions: Vec::new(),
        }
    }

    fn finish(self) -> Program {
        self.program
    }

    fn compile_program(&mut self, program: &ast::Program) -> Result<()> {
        self.compile_stmts(&program.stmts)?;
        self.program.emit(Op::Return);
        Ok(())
    }

    // === Statements ===

    fn compile_block(&mut self, block: &Block) -> Result<()> {
        self.locals.push(HashMap::new());
        let result = self.compile_stmts(&block.stmts);
        self.locals.pop();
        result
    }

    fn compile_stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        let otherwise = stmts
            .iter()
            .find(|stmt| matches!(stmt.kind, StmtKind::Otherwise(_)));
        let flag = match otherwise {
            Some(stmt) => {
                let slot = self.alloc_local(stmt.span)?;
                self.emit_store_bool(slot, false, stmt.span)?;
                Some(slot)
            }
            None => None,
        };

        self.flags.push(flag);
        let result = stmts.iter().try_for_each(|stmt| self.compile_stmt(stmt));
        self.flags.pop();
        result
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Metric(decl) => self.declare_metric(decl),
            StmtKind::Const { name, pattern } => self.declare_const(name, pattern),
            StmtKind::Def { name, body } => self.declare_def(name, body),
            StmtKind::Decorate { name, body } => self.compile_decorate(name, body),
            StmtKind::Next => self.compile_next(stmt.span),
            StmtKind::Stop => {
                self.program.emit(Op::Return);
                Ok(())
            }
            StmtKind::Otherwise(block) => self.compile_otherwise(block, stmt.span),
            StmtKind::Let { name, value } => {
                // Value first: `let x = x + 1` reads the outer `x`
                let ty = self.compile_expr(value)?;
                let slot = self.alloc_local(stmt.span)?;
                self.program.emit(Op::StoreLocal(slot));
                if let Some(scope) = self.locals.last_mut() {
                    scope.insert(name.name.clone(), (slot, ty));
                }
                Ok(())
            }
            StmtKind::Rule {
                cond,
                then,
                else_block,
            } => self.compile_rule(cond, then, else_block.as_ref()),
            StmtKind::Assign { target, op, value } => self.compile_assign(target, *op, value),
            StmtKind::Step { target, op } => self.compile_step(target, *op),
            StmtKind::Expr(expr) => {
                self.compile_expr(expr)?;
                self.program.emit(Op::Pop);
                Ok(())
            }
        }
    }

    fn compile_rule(&mut self, cond: &Expr, then: &Block, else_block: Option<&Block>) -> Result<()> {
        self.captures.push(Vec::new());
        let skip = self.compile_guarded(cond, then);
        self.captures.pop();
        let skip = skip?;

        match else_block {
            Some(block) => {
                let jump_over_else = self.program.offset();
                self.program.emit(Op::Jump(0)); // placeholder

                let else_start = self.program.offset();
                self.program.patch_jump(skip, else_start);
                self.compile_block(block)?;

                let end = self.program.offset();
                self.program.patch_jump(jump_over_else, end);
            }
            None => {
                let end = self.program.offset();
                self.program.patch_jump(skip, end);
            }
        }
        Ok(())
    }

    /// Condition and then-block of a rule; returns the offset of the
    /// unpatched `JumpIfFalse`.
    fn compile_guarded(&mut self, cond: &Expr, then: &Block) -> Result<usize> {
        self.compile_expr(cond)?;
        let skip = self.program.offset();
        self.program.emit(Op::JumpIfFalse(0)); // placeholder

        if self.rule_depth == 0 {
            self.program.emit(Op::SetMatched);
        }
        if let Some(flag) = self.current_flag() {
            self.emit_store_bool(flag, true, cond.span)?;
        }

        self.rule_depth += 1;
        let result = self.compile_block(then);
        self.rule_depth -= 1;
        result?;
        Ok(skip)
    }

    fn compile_otherwise(&mut self, block: &Block, span: Span) -> Result<()> {
        let Some(flag) = self.current_flag() else {
            return Err(CompileError::syntax(span, "`otherwise` outside a block"));
        };
        self.program.emit(Op::LoadLocal(flag));
        let skip = self.program.offset();
        self.program.emit(Op::JumpIfTrue(0)); // placeholder
        self.compile_block(block)?;
        let end = self.program.offset();
        self.program.patch_jump(skip, end);
        Ok(())
    }

    fn compile_assign(&mut self, target: &Target, op: AssignOp, value: &Expr) -> Result<()> {
        match self.resolve_target(target)? {
            Resolved::Local(slot) => {
                let ty = match op {
                    AssignOp::Set => self.compile_expr(value)?,
                    AssignOp::Add | AssignOp::Sub => {
                        let current = self.load_local_type(&target.name.name);
                        self.program.emit(Op::LoadLocal(slot));
                        let ty = self.compile_expr(value)?;
                        self.program.emit(if op == AssignOp::Add {
                            Op::Add
                        } else {
                            Op::Sub
                        });
                        current.arith(ty)
                    }
                };
                self.program.emit(Op::StoreLocal(slot));
                self.set_local_type(&target.name.name, ty);
                Ok(())
            }
            Resolved::Metric(index) => {
                let mutate = self.metric_op(index, target, op)?;
                let arity = self.compile_labels(index, &target.name.name, &target.index, target.span)?;
                if self.compile_expr(value)? == Type::Float {
                    self.program.metrics[index as usize].value_type = ValueType::Float;
                }
                self.program.emit(Op::Mutate {
                    metric: index,
                    arity,
                    op: mutate,
                });
                Ok(())
            }
        }
    }

    fn compile_step(&mut self, target: &Target, op: StepOp) -> Result<()> {
        let one = self
            .program
            .add_literal(Value::Int(1))
            .ok_or_else(|| too_many(target.span, "literals"))?;
        let op = match op {
            StepOp::Incr => AssignOp::Add,
            StepOp::Decr => AssignOp::Sub,
        };

        match self.resolve_target(target)? {
            Resolved::Local(slot) => {
                self.program.emit(Op::LoadLocal(slot));
                self.program.emit(Op::Literal(one));
                self.program.emit(if op == AssignOp::Add {
                    Op::Add
                } else {
                    Op::Sub
                });
                self.program.emit(Op::StoreLocal(slot));
            }
            Resolved::Metric(index) => {
                let mutate = self.metric_op(index, target, op)?;
                let arity = self.compile_labels(index, &target.name.name, &target.index, target.span)?;
                self.program.emit(Op::Literal(one));
                self.program.emit(Op::Mutate {
                    metric: index,
                    arity,
                    op: mutate,
                });
            }
        }
        Ok(())
    }

    /// Which store operation a statement performs on a metric of this kind.
    fn metric_op(&self, index: u16, target: &Target, op: AssignOp) -> Result<MutateOp> {
        let name = &target.name.name;
        let mutate = match (self.program.metrics[index as usize].kind, op) {
            (Kind::Histogram, AssignOp::Set) => MutateOp::Observe,
            (Kind::Histogram, _) => {
                return Err(CompileError::type_error(
                    target.span,
                    format!("histogram `{}` only supports `=` to record an observation", name),
                ))
            }
            (Kind::Counter, AssignOp::Sub) => {
                return Err(CompileError::type_error(
                    target.span,
                    format!("counter `{}` cannot be decremented", name),
                ))
            }
            (_, AssignOp::Set) => MutateOp::Set,
            (_, AssignOp::Add) => MutateOp::Add,
            (_, AssignOp::Sub) => MutateOp::Sub,
        };
        Ok(mutate)
    }

    fn resolve_target(&self, target: &Target) -> Result<Resolved> {
        let name = &target.name;
        if let Some((slot, _)) = self.lookup_local(&name.name) {
            if !target.index.is_empty() {
                return Err(CompileError::type_error(
                    target.span,
                    format!("`{}` is a local variable and cannot be indexed", name.name),
                ));
            }
            return Ok(Resolved::Local(slot));
        }
        if let Some(&index) = self.metrics.get(&name.name) {
            return Ok(Resolved::Metric(index));
        }
        if self.consts.contains_key(&name.name) {
            return Err(CompileError::type_error(
                name.span,
                format!("cannot assign to constant `{}`", name.name),
            ));
        }
        Err(CompileError::undefined(
            name.span,
            format!("undefined variable or metric `{}`", name.name),
        ))
    }

    // === Declarations ===

    fn check_unique(&self, name: &Ident) -> Result<()> {
        if self.metrics.contains_key(&name.name) || self.consts.contains_key(&name.name) {
            return Err(CompileError::declaration(
                name.span,
                format!("`{}` is already declared", name.name),
            ));
        }
        Ok(())
    }

    fn declare_metric(&mut self, decl: &ast::MetricDecl) -> Result<()> {
        self.check_unique(&decl.name)?;

        let exported = decl.alias.clone().unwrap_or_else(|| decl.name.name.clone());
        if self.program.metrics.iter().any(|m| m.name == exported) {
            return Err(CompileError::declaration(
                decl.name.span,
                format!("metric name \"{}\" is already used in this program", exported),
            ));
        }

        let mut keys: Vec<String> = Vec::with_capacity(decl.keys.len());
        for key in &decl.keys {
            if keys.contains(&key.name) {
                return Err(CompileError::declaration(
                    key.span,
                    format!("duplicate label key `{}`", key.name),
                ));
            }
            keys.push(key.name.clone());
        }
        if keys.len() > usize::from(u8::MAX) {
            return Err(CompileError::declaration(
                decl.name.span,
                format!("metric `{}` has more than {} label keys", decl.name.name, u8::MAX),
            ));
        }

        let kind = match decl.kind {
            MetricKind::Counter => Kind::Counter,
            MetricKind::Gauge => Kind::Gauge,
            MetricKind::Timer => Kind::Timer,
            MetricKind::Histogram => Kind::Histogram,
        };
        let mut metric = MetricDecl::new(exported, kind)
            .with_keys(keys)
            .hidden(decl.hidden);
        if !decl.buckets.is_empty() {
            metric = metric.with_buckets(decl.buckets.clone());
        }
        metric
            .validate()
            .map_err(|err| CompileError::declaration(decl.name.span, err.to_string()))?;

        let index = u16::try_from(self.program.metrics.len())
            .map_err(|_| too_many(decl.name.span, "metrics"))?;
        self.program.metrics.push(metric);
        self.program.declared_at.push(decl.name.span);
        self.metrics.insert(decl.name.name.clone(), index);
        Ok(())
    }

    fn declare_const(&mut self, name: &Ident, pattern: &Expr) -> Result<()> {
        self.check_unique(name)?;
        let source = self.as_pattern(pattern)?.ok_or_else(|| {
            CompileError::type_error(
                pattern.span,
                format!("constant `{}` must be a pattern", name.name),
            )
        })?;
        build_regex(&source, pattern.span)?;
        self.consts.insert(name.name.clone(), source);
        Ok(())
    }

    fn declare_def(&mut self, name: &Ident, body: &Block) -> Result<()> {
        if self.defs.contains_key(&name.name) {
            return Err(CompileError::declaration(
                name.span,
                format!("decorator `{}` is already defined", name.name),
            ));
        }
        if !contains_next(&body.stmts) {
            return Err(CompileError::declaration(
                name.span,
                format!("decorator `{}` never uses `next`", name.name),
            ));
        }
        self.defs.insert(name.name.clone(), body.clone());
        Ok(())
    }

    fn compile_decorate(&mut self, name: &Ident, body: &Block) -> Result<()> {
        let Some(def) = self.defs.get(&name.name).cloned() else {
            return Err(CompileError::undefined(
                name.span,
                format!("undefined decorator `@{}`", name.name),
            ));
        };
        if self.expansions.iter().any(|e| e.name == name.name) {
            return Err(CompileError::declaration(
                name.span,
                format!("decorator `@{}` cannot be used inside its own definition", name.name),
            ));
        }

        let flag = self.current_flag();
        self.expansions.push(Expansion {
            name: name.name.clone(),
            body: body.clone(),
            flag,
        });
        let result = self.compile_block(&def);
        self.expansions.pop();
        result
    }

    fn compile_next(&mut self, span: Span) -> Result<()> {
        let Some(expansion) = self.expansions.pop() else {
            return Err(CompileError::syntax(
                span,
                "`next` is only allowed inside a `def` body",
            ));
        };
        // Reaching `next` means the decorator's rules matched
        if let Some(flag) = expansion.flag {
            self.emit_store_bool(flag, true, span)?;
        }
        let result = self.compile_block(&expansion.body);
        self.expansions.push(expansion);
        result
    }

    // === Expressions ===

    fn compile_expr(&mut self, expr: &Expr) -> Result<Type> {
        match &expr.kind {
            ExprKind::Int(n) => {
                self.emit_literal(Value::Int(*n), expr.span)?;
                Ok(Type::Int)
            }
            ExprKind::Float(x) => {
                self.emit_literal(Value::Float(*x), expr.span)?;
                Ok(Type::Float)
            }
            ExprKind::Str(s) => {
                self.emit_literal(Value::Str(s.clone()), expr.span)?;
                Ok(Type::Str)
            }
            ExprKind::Pattern(source) => self.compile_match_line(source.clone(), expr.span),
            ExprKind::Capture(name) => {
                let capture = self.resolve_capture(name, expr.span)?;
                self.program.emit(Op::LoadCapture(capture));
                Ok(Type::Str)
            }
            ExprKind::Ident(name) => self.compile_ident(name, expr.span),
            ExprKind::Index { name, args } => {
                if self.lookup_local(&name.name).is_some() {
                    return Err(CompileError::type_error(
                        name.span,
                        format!("`{}` is a local variable and cannot be indexed", name.name),
                    ));
                }
                let Some(&index) = self.metrics.get(&name.name) else {
                    return Err(if self.consts.contains_key(&name.name) {
                        CompileError::type_error(
                            name.span,
                            format!("constant `{}` cannot be indexed", name.name),
                        )
                    } else {
                        CompileError::undefined(name.span, format!("undefined metric `{}`", name.name))
                    });
                };
                let arity = self.compile_labels(index, &name.name, args, expr.span)?;
                self.program.emit(Op::LoadMetric {
                    metric: index,
                    arity,
                });
                Ok(self.metric_type(index))
            }
            ExprKind::Call { name, args } => {
                let builtin = Builtin::from_name(&name.name).ok_or_else(|| {
                    CompileError::undefined(name.span, format!("unknown function `{}`", name.name))
                })?;
                if args.len() != builtin.arity() {
                    return Err(CompileError::type_error(
                        expr.span,
                        format!(
                            "`{}` takes {} argument(s), found {}",
                            builtin,
                            builtin.arity(),
                            args.len()
                        ),
                    ));
                }
                // Push arguments left-to-right
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.program.emit(Op::Call {
                    builtin,
                    arity: args.len() as u8,
                });
                Ok(builtin.return_type())
            }
            ExprKind::Unary { op, operand } => {
                let ty = self.compile_expr(operand)?;
                match op {
                    UnaryOp::Not => {
                        self.program.emit(Op::Not);
                        Ok(Type::Bool)
                    }
                    UnaryOp::Neg => {
                        self.program.emit(Op::Neg);
                        Ok(ty.arith(Type::Int))
                    }
                }
            }
            ExprKind::Binary { op, left, right } => self.compile_binary(expr, *op, left, right),
        }
    }

    fn compile_binary(&mut self, expr: &Expr, op: BinaryOp, left: &Expr, right: &Expr) -> Result<Type> {
        match op {
            BinaryOp::And | BinaryOp::Or => {
                // Leaves whichever operand decided the result
                self.compile_expr(left)?;
                self.program.emit(Op::Dup);
                let short_circuit = self.program.offset();
                self.program.emit(if op == BinaryOp::And {
                    Op::JumpIfFalse(0)
                } else {
                    Op::JumpIfTrue(0)
                });
                self.program.emit(Op::Pop);
                self.compile_expr(right)?;
                let end = self.program.offset();
                self.program.patch_jump(short_circuit, end);
                Ok(Type::Bool)
            }

            BinaryOp::Match | BinaryOp::NotMatch => {
                let Some(source) = self.as_pattern(right)? else {
                    return Err(CompileError::type_error(
                        right.span,
                        format!("right-hand side of `{}` must be a pattern", op.symbol()),
                    ));
                };
                if self.as_pattern(left)?.is_some() {
                    return Err(CompileError::type_error(
                        left.span,
                        format!("left-hand side of `{}` must be a value, not a pattern", op.symbol()),
                    ));
                }
                self.compile_expr(left)?;
                let site = self.add_site(source, right.span)?;
                self.program.emit(Op::Match(site));
                if op == BinaryOp::NotMatch {
                    self.program.emit(Op::Not);
                }
                Ok(Type::Bool)
            }

            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.program.emit(match op {
                    BinaryOp::Eq => Op::Eq,
                    BinaryOp::Ne => Op::Ne,
                    BinaryOp::Lt => Op::Lt,
                    BinaryOp::Le => Op::Le,
                    BinaryOp::Gt => Op::Gt,
                    _ => Op::Ge,
                });
                Ok(Type::Bool)
            }

            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Pow => {
                if op == BinaryOp::Add {
                    if let Some(source) = self.as_pattern(expr)? {
                        return self.compile_match_line(source, expr.span);
                    }
                }
                for side in [left, right] {
                    if self.as_pattern(side)?.is_some() {
                        return Err(CompileError::type_error(
                            side.span,
                            format!("operator `{}` cannot be applied to a pattern", op.symbol()),
                        ));
                    }
                }
                let lhs = self.compile_expr(left)?;
                let rhs = self.compile_expr(right)?;
                self.program.emit(match op {
                    BinaryOp::Add => Op::Add,
                    BinaryOp::Sub => Op::Sub,
                    BinaryOp::Mul => Op::Mul,
                    BinaryOp::Div => Op::Div,
                    BinaryOp::Mod => Op::Mod,
                    _ => Op::Pow,
                });
                Ok(lhs.arith(rhs))
            }
        }
    }

    /// Resolution order: local, constant (matched against the line), metric.
    fn compile_ident(&mut self, name: &str, span: Span) -> Result<Type> {
        if let Some((slot, ty)) = self.lookup_local(name) {
            self.program.emit(Op::LoadLocal(slot));
            return Ok(ty);
        }
        if let Some(source) = self.consts.get(name).cloned() {
            return self.compile_match_line(source, span);
        }
        if let Some(&index) = self.metrics.get(name) {
            self.compile_labels(index, name, &[], span)?;
            self.program.emit(Op::LoadMetric {
                metric: index,
                arity: 0,
            });
            return Ok(self.metric_type(index));
        }
        Err(CompileError::undefined(
            span,
            format!("undefined variable or metric `{}`", name),
        ))
    }

    fn compile_labels(&mut self, index: u16, name: &str, args: &[Expr], span: Span) -> Result<u8> {
        let expected = self.program.metrics[index as usize].keys.len();
        if args.len() != expected {
            return Err(CompileError::type_error(
                span,
                format!(
                    "metric `{}` takes {} label value(s), found {}",
                    name,
                    expected,
                    args.len()
                ),
            ));
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        Ok(args.len() as u8)
    }

    fn compile_match_line(&mut self, source: String, span: Span) -> Result<Type> {
        let site = self.add_site(source, span)?;
        self.program.emit(Op::MatchLine(site));
        Ok(Type::Bool)
    }

    /// Pattern source for `expr` if it denotes a pattern: a literal, a
    /// constant name or a `+` concatenation of those.
    fn as_pattern(&self, expr: &Expr) -> Result<Option<String>> {
        match &expr.kind {
            ExprKind::Pattern(source) => Ok(Some(source.clone())),
            ExprKind::Ident(name) if self.lookup_local(name).is_none() => {
                Ok(self.consts.get(name).cloned())
            }
            ExprKind::Binary {
                op: BinaryOp::Add,
                left,
                right,
            } => match (self.as_pattern(left)?, self.as_pattern(right)?) {
                (Some(l), Some(r)) => Ok(Some(l + &r)),
                (None, None) => Ok(None),
                _ => Err(CompileError::type_error(
                    expr.span,
                    "cannot concatenate a pattern with a non-pattern value",
                )),
            },
            _ => Ok(None),
        }
    }

    /// Register a match site in the innermost capture scope.
    fn add_site(&mut self, source: String, span: Span) -> Result<u16> {
        let regex = build_regex(&source, span)?;
        let site = self
            .program
            .add_pattern(Pattern { source, regex })
            .ok_or_else(|| too_many(span, "patterns"))?;
        if let Some(scope) = self.captures.last_mut() {
            scope.push(site);
        }
        Ok(site)
    }

    fn resolve_capture(&mut self, name: &str, span: Span) -> Result<u16> {
        let group_of = |regex: &Regex| -> Option<usize> {
            match name.parse::<usize>() {
                Ok(n) => (n < regex.captures_len()).then_some(n),
                Err(_) => regex.capture_names().position(|n| n == Some(name)),
            }
        };

        let candidates: Vec<(u16, u16)> = self
            .captures
            .iter()
            .rev()
            .flatten()
            .filter_map(|&site| {
                let regex = &self.program.patterns[site as usize].regex;
                group_of(regex)
                    .and_then(|group| u16::try_from(group).ok())
                    .map(|group| (site, group))
            })
            .collect();

        if candidates.is_empty() {
            return Err(CompileError::undefined(
                span,
                format!("capture `${}` is not bound by an enclosing pattern", name),
            ));
        }
        self.program
            .add_capture(CaptureRef {
                name: name.to_string(),
                candidates,
            })
            .ok_or_else(|| too_many(span, "capture references"))
    }

    // === Helpers ===

    fn emit_literal(&mut self, value: Value, span: Span) -> Result<()> {
        let idx = self
            .program
            .add_literal(value)
            .ok_or_else(|| too_many(span, "literals"))?;
        self.program.emit(Op::Literal(idx));
        Ok(())
    }

    fn emit_store_bool(&mut self, slot: SlotId, value: bool, span: Span) -> Result<()> {
        self.emit_literal(Value::Bool(value), span)?;
        self.program.emit(Op::StoreLocal(slot));
        Ok(())
    }

    fn alloc_local(&mut self, span: Span) -> Result<SlotId> {
        let slot = self.next_local;
        self.next_local = slot
            .checked_add(1)
            .ok_or_else(|| too_many(span, "local variables"))?;
        self.program.local_count = self.next_local;
        Ok(slot)
    }

    fn current_flag(&self) -> Option<SlotId> {
        self.flags.last().copied().flatten()
    }

    fn lookup_local(&self, name: &str) -> Option<(SlotId, Type)> {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn load_local_type(&self, name: &str) -> Type {
        self.lookup_local(name).map_or(Type::Int, |(_, ty)| ty)
    }

    fn set_local_type(&mut self, name: &str, ty: Type) {
        if let Some(entry) = self.locals.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            entry.1 = ty;
        }
    }

    fn metric_type(&self, index: u16) -> Type {
        match self.program.metrics[index as usize].value_type {
            ValueType::Int => Type::Int,
            ValueType::Float => Type::Float,
        }
    }
}

fn too_many(span: Span, table: &str) -> CompileError {
    CompileError::syntax(span, format!("program has too many {}", table))
}

fn build_regex(source: &str, span: Span) -> Result<Regex> {
    Regex::new(source)
        .map_err(|err| CompileError::syntax(span, format!("invalid pattern: {}", err)))
}

fn contains_next(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Next => true,
        StmtKind::Rule {
            then, else_block, ..
        } => {
            contains_next(&then.stmts)
                || else_block
                    .as_ref()
                    .is_some_and(|block| contains_next(&block.stmts))
        }
        StmtKind::Otherwise(block) | StmtKind::Decorate { body: block, .. } => {
            contains_next(&block.stmts)
        }
        _ => false,
    })
}
