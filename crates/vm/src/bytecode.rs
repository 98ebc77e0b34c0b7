//! Bytecode instruction set
//!
//! Flat instruction encoding for stack-based execution. Each instruction
//! operates on an implicit operand stack. Rule nesting is laid out as
//! conditional jumps with absolute targets, fixed up once the end of each
//! block is known.

use std::fmt::{self, Write as _};

use logtally_dsl::Span;
use logtally_metrics::MetricDecl;
use regex::Regex;

use crate::builtins::Builtin;
use crate::value::Value;

/// Slot identifier for local variables
pub type SlotId = u16;

/// Metric mutation performed by [`Op::Mutate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateOp {
    /// Increment by the value
    Add,
    /// Decrement by the value (gauges and timers only)
    Sub,
    /// Overwrite with the value
    Set,
    /// Record the value in a histogram
    Observe,
}

/// Bytecode instruction
///
/// Stack-based: operands are popped from stack, results pushed back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    // === Literals and loads ===
    /// Push a literal value onto the stack (index into literals table)
    Literal(u16),

    /// Push a capture reference (index into captures table); empty string
    /// when no candidate site matched or the group did not participate
    LoadCapture(u16),

    /// Push value from local slot
    LoadLocal(SlotId),

    /// Pop top of stack into local slot
    StoreLocal(SlotId),

    /// Pop `arity` label values, push the metric cell's current value
    LoadMetric { metric: u16, arity: u8 },

    // === Metrics ===
    /// Pop the value, then `arity` label values, and apply `op` to the cell
    Mutate { metric: u16, arity: u8, op: MutateOp },

    // === Patterns ===
    /// Match pattern `site` against the input line, binding its captures;
    /// push whether it matched
    MatchLine(u16),

    /// Pop a subject value and match pattern `site` against its text
    Match(u16),

    // === Arithmetic ===
    /// Pop b, pop a, push a + b
    Add,
    /// Pop b, pop a, push a - b
    Sub,
    /// Pop b, pop a, push a * b
    Mul,
    /// Pop b, pop a, push a / b
    Div,
    /// Pop b, pop a, push a % b
    Mod,
    /// Pop b, pop a, push a ** b
    Pow,
    /// Pop a, push -a
    Neg,

    // === Comparison ===
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // === Logical ===
    /// Pop a, push !truthy(a)
    Not,

    // === Control flow ===
    /// Pop a; jump to target if a is falsy
    JumpIfFalse(u32),
    /// Pop a; jump to target if a is truthy
    JumpIfTrue(u32),
    /// Jump to target unconditionally
    Jump(u32),

    // === Function calls ===
    /// Call a builtin with N arguments (pops N, pushes 1)
    Call { builtin: Builtin, arity: u8 },

    /// Record that a top-level rule matched this line
    SetMatched,

    // === Stack manipulation ===
    /// Duplicate top of stack
    Dup,
    /// Pop and discard top of stack
    Pop,

    /// Stop executing this line
    Return,
}

/// A precompiled pattern at one match site.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// Pattern source after constant expansion
    pub source: String,
    pub regex: Regex,
}

/// A resolved `$name` or `$N` reference.
///
/// Candidates are `(site, group)` pairs, innermost enclosing rule first.
/// At run time the first candidate whose site matched supplies the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRef {
    pub name: String,
    pub candidates: Vec<(u16, u16)>,
}

/// A compiled program.
///
/// Immutable after compilation; shared read-only by every execution.
#[derive(Debug, Clone, Default)]
pub struct Program {
    /// Program name (usually the source file name)
    pub name: String,

    /// The instruction sequence
    pub ops: Vec<Op>,

    /// Literal value table
    pub literals: Vec<Value>,

    /// Pattern table, one entry per match site
    pub patterns: Vec<Pattern>,

    /// Capture reference table
    pub captures: Vec<CaptureRef>,

    /// Declared metrics, indexed by `Op::LoadMetric`/`Op::Mutate`
    pub metrics: Vec<MetricDecl>,

    /// Source location of each metric declaration
    pub declared_at: Vec<Span>,

    /// Number of local slots needed
    pub local_count: u16,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a literal value, returning its index, or `None` once the table
    /// holds `u16::MAX + 1` entries
    pub fn add_literal(&mut self, value: Value) -> Option<u16> {
        if let Some(idx) = self.literals.iter().position(|v| v == &value) {
            return u16::try_from(idx).ok();
        }
        let idx = u16::try_from(self.literals.len()).ok()?;
        self.literals.push(value);
        Some(idx)
    }

    /// Add a match site, returning its index
    pub fn add_pattern(&mut self, pattern: Pattern) -> Option<u16> {
        let idx = u16::try_from(self.patterns.len()).ok()?;
        self.patterns.push(pattern);
        Some(idx)
    }

    /// Add a capture reference, returning its index
    pub fn add_capture(&mut self, capture: CaptureRef) -> Option<u16> {
        if let Some(idx) = self.captures.iter().position(|c| c == &capture) {
            return u16::try_from(idx).ok();
        }
        let idx = u16::try_from(self.captures.len()).ok()?;
        self.captures.push(capture);
        Some(idx)
    }

    /// Emit an instruction
    pub fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Current instruction offset (for jump patching)
    pub fn offset(&self) -> usize {
        self.ops.len()
    }

    /// Point the jump at `offset` to `target`.
    ///
    /// # Panics
    ///
    /// Panics if the instruction at `offset` is not a jump instruction.
    pub fn patch_jump(&mut self, offset: usize, target: usize) {
        match &mut self.ops[offset] {
            Op::JumpIfFalse(t) | Op::JumpIfTrue(t) | Op::Jump(t) => *t = target as u32,
            _ => panic!("attempted to patch non-jump instruction"),
        }
    }

    /// Human-readable listing of the instructions and tables.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "program {}", self.name);
        for (i, m) in self.metrics.iter().enumerate() {
            let _ = writeln!(out, "  metric {:>3} {} {} {:?}", i, m.kind, m.name, m.keys);
        }
        for (i, p) in self.patterns.iter().enumerate() {
            let _ = writeln!(out, "  pattern {:>3} /{}/", i, p.source);
        }
        for (i, op) in self.ops.iter().enumerate() {
            let _ = writeln!(out, "  {:>5}  {}", i, DisplayOp { op, program: self });
        }
        out
    }
}

struct DisplayOp<'a> {
    op: &'a Op,
    program: &'a Program,
}

impl fmt::Display for DisplayOp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::Literal(idx) => match self.program.literals.get(*idx as usize) {
                Some(Value::Str(s)) => write!(f, "Literal {:?}", s),
                Some(v) => write!(f, "Literal {}", v),
                None => write!(f, "Literal ?{}", idx),
            },
            Op::LoadMetric { metric, arity } | Op::Mutate { metric, arity, .. } => {
                let name = self
                    .program
                    .metrics
                    .get(*metric as usize)
                    .map(|m| m.name.as_str())
                    .unwrap_or("?");
                match self.op {
                    Op::Mutate { op, .. } => write!(f, "Mutate {:?} {} /{}", op, name, arity),
                    _ => write!(f, "LoadMetric {} /{}", name, arity),
                }
            }
            Op::LoadCapture(idx) => match self.program.captures.get(*idx as usize) {
                Some(c) => write!(f, "LoadCapture ${} {:?}", c.name, c.candidates),
                None => write!(f, "LoadCapture ?{}", idx),
            },
            other => write!(f, "{:?}", other),
        }
    }
}
