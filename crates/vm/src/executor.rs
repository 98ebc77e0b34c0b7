//! Bytecode executor
//!
//! Stack-based VM that runs a compiled [`Program`] against one input line.
//!
//! Every call to [`Vm::execute`] starts from a fresh execution context:
//! operand stack, local slots, capture frames and the per-line timestamp.
//! Nothing survives between lines except what was written to the store.

use std::cmp::Ordering;
use std::sync::Arc;

use logtally_dsl::{CompileError, Span};
use logtally_metrics::{Metric, Number, Store, StoreError};
use regex::CaptureLocations;
use tracing::trace;

use crate::builtins::{self, CallContext};
use crate::bytecode::{MutateOp, Op, Program};
use crate::error::VmError;
use crate::line::LogLine;
use crate::value::{arith, compare, negate, ArithOp, Value};

/// Result of running a program over one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
    /// Whether at least one top-level rule matched
    pub matched: bool,
}

/// A compiled program bound to the store its metrics live in.
///
/// `execute` takes `&self`; one `Vm` may run different lines on several
/// threads at once.
#[derive(Debug)]
pub struct Vm {
    program: Arc<Program>,
    store: Arc<Store>,
    /// Store handles, indexed like `program.metrics`
    metrics: Vec<Arc<Metric>>,
}

impl Vm {
    /// Declare the program's metrics in `store` and bind to them.
    ///
    /// Declaration is all-or-nothing: on a shape conflict the store is left
    /// unchanged and the error points at the conflicting declaration.
    pub fn new(program: Arc<Program>, store: Arc<Store>) -> Result<Vm, CompileError> {
        let metrics = store
            .declare_all(program.metrics.clone())
            .map_err(|err| declaration_error(&program, err))?;
        Ok(Vm {
            program,
            store,
            metrics,
        })
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Run the program over `line`.
    ///
    /// An error aborts the rest of this line; metric updates made before
    /// the failing instruction stay applied.
    pub fn execute(&self, line: &LogLine) -> Result<Outcome, VmError> {
        let program = &*self.program;
        let mut stack: Vec<Value> = Vec::with_capacity(16);
        let mut locals: Vec<Value> = vec![Value::Int(0); program.local_count as usize];
        let mut frames: Vec<Option<Frame>> = (0..program.patterns.len()).map(|_| None).collect();
        let mut ctx = CallContext {
            line,
            timestamp: None,
        };
        let mut outcome = Outcome::default();
        let mut ip = 0;

        while ip < program.ops.len() {
            match program.ops[ip] {
                Op::Literal(idx) => {
                    stack.push(program.literals[idx as usize].clone());
                }

                Op::LoadCapture(idx) => {
                    let capture = &program.captures[idx as usize];
                    let text = capture
                        .candidates
                        .iter()
                        .find_map(|&(site, group)| {
                            frames[site as usize]
                                .as_ref()
                                .map(|frame| frame.group(&line.text, group))
                        })
                        .unwrap_or_default();
                    stack.push(Value::Str(text));
                }

                Op::LoadLocal(slot) => {
                    stack.push(locals[slot as usize].clone());
                }

                Op::StoreLocal(slot) => {
                    locals[slot as usize] = pop(&mut stack, ip)?;
                }

                Op::LoadMetric { metric, arity } => {
                    let labels = pop_labels(&mut stack, arity, ip)?;
                    let value = self.store.load(&self.metrics[metric as usize], &labels)?;
                    stack.push(Value::from_number(value));
                }

                Op::Mutate { metric, arity, op } => {
                    let value = pop(&mut stack, ip)?.to_number()?;
                    let labels = pop_labels(&mut stack, arity, ip)?;
                    let metric = &self.metrics[metric as usize];
                    match op {
                        MutateOp::Add => self.store.increment(metric, &labels, value)?,
                        MutateOp::Sub => {
                            self.store.increment(metric, &labels, negate_number(value)?)?
                        }
                        MutateOp::Set => self.store.set(metric, &labels, value)?,
                        MutateOp::Observe => self.store.observe(metric, &labels, value)?,
                    }
                }

                Op::MatchLine(site) => {
                    let regex = &program.patterns[site as usize].regex;
                    let mut locs = regex.capture_locations();
                    let ok = regex.captures_read(&mut locs, &line.text).is_some();
                    frames[site as usize] = ok.then(|| Frame {
                        subject: Subject::Line,
                        locs,
                    });
                    stack.push(Value::Bool(ok));
                }

                Op::Match(site) => {
                    let subject = pop(&mut stack, ip)?.to_string();
                    let regex = &program.patterns[site as usize].regex;
                    let mut locs = regex.capture_locations();
                    let ok = regex.captures_read(&mut locs, &subject).is_some();
                    frames[site as usize] = ok.then(|| Frame {
                        subject: Subject::Value(subject),
                        locs,
                    });
                    stack.push(Value::Bool(ok));
                }

                Op::Add => binary_arith(&mut stack, ip, ArithOp::Add)?,
                Op::Sub => binary_arith(&mut stack, ip, ArithOp::Sub)?,
                Op::Mul => binary_arith(&mut stack, ip, ArithOp::Mul)?,
                Op::Div => binary_arith(&mut stack, ip, ArithOp::Div)?,
                Op::Mod => binary_arith(&mut stack, ip, ArithOp::Mod)?,
                Op::Pow => binary_arith(&mut stack, ip, ArithOp::Pow)?,

                Op::Neg => {
                    let v = pop(&mut stack, ip)?;
                    stack.push(negate(&v)?);
                }

                Op::Eq => binary_compare(&mut stack, ip, |o| o == Ordering::Equal)?,
                Op::Ne => binary_compare(&mut stack, ip, |o| o != Ordering::Equal)?,
                Op::Lt => binary_compare(&mut stack, ip, |o| o == Ordering::Less)?,
                Op::Le => binary_compare(&mut stack, ip, |o| o != Ordering::Greater)?,
                Op::Gt => binary_compare(&mut stack, ip, |o| o == Ordering::Greater)?,
                Op::Ge => binary_compare(&mut stack, ip, |o| o != Ordering::Less)?,

                Op::Not => {
                    let v = pop(&mut stack, ip)?;
                    stack.push(Value::Bool(!v.is_truthy()));
                }

                Op::JumpIfFalse(target) => {
                    if !pop(&mut stack, ip)?.is_truthy() {
                        ip = target as usize;
                        continue;
                    }
                }

                Op::JumpIfTrue(target) => {
                    if pop(&mut stack, ip)?.is_truthy() {
                        ip = target as usize;
                        continue;
                    }
                }

                Op::Jump(target) => {
                    ip = target as usize;
                    continue;
                }

                Op::Call { builtin, arity } => {
                    let args = split_top(&mut stack, arity as usize, ip)?;
                    stack.push(builtins::call(builtin, &args, &mut ctx)?);
                }

                Op::SetMatched => {
                    outcome.matched = true;
                }

                Op::Dup => {
                    let top = stack.last().cloned().ok_or(VmError::StackUnderflow { ip })?;
                    stack.push(top);
                }

                Op::Pop => {
                    pop(&mut stack, ip)?;
                }

                Op::Return => break,
            }
            ip += 1;
        }

        trace!(program = %program.name, line = %line, matched = outcome.matched, "line executed");
        Ok(outcome)
    }
}

/// Bound captures of one successful match.
struct Frame {
    subject: Subject,
    locs: CaptureLocations,
}

enum Subject {
    /// The input line
    Line,
    /// A value matched with `=~`
    Value(String),
}

impl Frame {
    /// Text of `group`; empty if the group did not participate.
    fn group(&self, line: &str, group: u16) -> String {
        let text = match &self.subject {
            Subject::Line => line,
            Subject::Value(s) => s.as_str(),
        };
        self.locs
            .get(group as usize)
            .and_then(|(start, end)| text.get(start..end))
            .unwrap_or_default()
            .to_string()
    }
}

fn pop(stack: &mut Vec<Value>, ip: usize) -> Result<Value, VmError> {
    stack.pop().ok_or(VmError::StackUnderflow { ip })
}

fn split_top(stack: &mut Vec<Value>, n: usize, ip: usize) -> Result<Vec<Value>, VmError> {
    if stack.len() < n {
        return Err(VmError::StackUnderflow { ip });
    }
    Ok(stack.split_off(stack.len() - n))
}

fn pop_labels(stack: &mut Vec<Value>, arity: u8, ip: usize) -> Result<Vec<String>, VmError> {
    Ok(split_top(stack, arity as usize, ip)?
        .iter()
        .map(Value::to_string)
        .collect())
}

fn binary_arith(stack: &mut Vec<Value>, ip: usize, op: ArithOp) -> Result<(), VmError> {
    let b = pop(stack, ip)?;
    let a = pop(stack, ip)?;
    stack.push(arith(op, &a, &b)?);
    Ok(())
}

fn binary_compare(
    stack: &mut Vec<Value>,
    ip: usize,
    test: impl FnOnce(Ordering) -> bool,
) -> Result<(), VmError> {
    let b = pop(stack, ip)?;
    let a = pop(stack, ip)?;
    stack.push(Value::Bool(test(compare(&a, &b)?)));
    Ok(())
}

fn negate_number(n: Number) -> Result<Number, VmError> {
    match n {
        Number::Int(n) => n
            .checked_neg()
            .map(Number::Int)
            .ok_or(VmError::Overflow { op: "decrement" }),
        Number::Float(x) => Ok(Number::Float(-x)),
    }
}

fn declaration_error(program: &Program, err: StoreError) -> CompileError {
    let span = match &err {
        StoreError::ShapeMismatch { name, .. } | StoreError::InvalidBuckets { name, .. } => program
            .metrics
            .iter()
            .position(|m| &m.name == name)
            .and_then(|i| program.declared_at.get(i).copied())
            .unwrap_or_default(),
        _ => Span::default(),
    };
    CompileError::declaration(span, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use logtally_dsl::ErrorKind;
    use logtally_metrics::{Kind, MetricDecl};
    use pretty_assertions::assert_eq;

    struct TestContext {
        store: Arc<Store>,
        vm: Vm,
    }

    impl TestContext {
        fn new(source: &str) -> Self {
            Self::with_store(source, Arc::new(Store::new()))
        }

        fn with_store(source: &str, store: Arc<Store>) -> Self {
            let program = match compile_source("test.tally", source) {
                Ok(program) => program,
                Err(diag) => panic!("compile failed: {}", diag),
            };
            let vm = Vm::new(Arc::new(program), Arc::clone(&store)).unwrap();
            Self { store, vm }
        }

        fn run(&self, text: &str) -> Result<Outcome, VmError> {
            self.vm.execute(&LogLine::new("test.log", 1, text))
        }

        fn run_all(&self, lines: &[&str]) -> usize {
            lines.iter().filter(|l| self.run(l).is_err()).count()
        }

        fn value(&self, name: &str, labels: &[&str]) -> Option<f64> {
            self.store.snapshot().value(name, labels)
        }
    }

    // ========================================================================
    // Rules and counters
    // ========================================================================

    #[test]
    fn test_counter_counts_matching_lines() {
        let ctx = TestContext::new("counter hits\n/GET/ { hits++ }\n");
        let errors = ctx.run_all(&["GET /", "POST /", "GET /a", "", "GET /b"]);
        assert_eq!(errors, 0);
        assert_eq!(ctx.value("hits", &[]), Some(3.0));
    }

    #[test]
    fn test_labelled_counter_accumulates_captures() {
        let ctx = TestContext::new(
            "counter bytes by user\n/user=(\\w+) bytes=(\\d+)/ { bytes[$1] += $2 }\n",
        );
        ctx.run_all(&[
            "user=alice bytes=10",
            "user=bob bytes=20",
            "user=alice bytes=5",
        ]);
        assert_eq!(ctx.value("bytes", &["alice"]), Some(15.0));
        assert_eq!(ctx.value("bytes", &["bob"]), Some(20.0));
    }

    #[test]
    fn test_outcome_reports_top_level_match() {
        let ctx = TestContext::new("counter c\n/a/ { /b/ { c++ } }\n");
        assert_eq!(ctx.run("a").unwrap(), Outcome { matched: true });
        assert_eq!(ctx.run("b").unwrap(), Outcome { matched: false });
    }

    #[test]
    fn test_unmatched_outer_skips_inner() {
        let ctx = TestContext::new("counter inner\n/^outer/ {\n  /x/ { inner++ }\n}\n");
        ctx.run_all(&["x", "xx", "not outer x"]);
        assert_eq!(ctx.value("inner", &[]), None);

        ctx.run("outer x").unwrap();
        assert_eq!(ctx.value("inner", &[]), Some(1.0));
    }

    #[test]
    fn test_else_and_otherwise() {
        let ctx = TestContext::new(
            "counter a\ncounter b\ncounter other\ncounter miss\n\
             /a/ { a++ } else { miss++ }\n/b/ { b++ }\notherwise { other++ }\n",
        );
        ctx.run_all(&["a", "b", "z"]);
        assert_eq!(ctx.value("a", &[]), Some(1.0));
        assert_eq!(ctx.value("b", &[]), Some(1.0));
        assert_eq!(ctx.value("miss", &[]), Some(2.0));
        assert_eq!(ctx.value("other", &[]), Some(1.0));
    }

    #[test]
    fn test_stop_ends_line() {
        let ctx = TestContext::new("counter c\n/skip/ { stop }\n/./ { c++ }\n");
        ctx.run_all(&["skip me", "keep me"]);
        assert_eq!(ctx.value("c", &[]), Some(1.0));
    }

    #[test]
    fn test_boolean_conditions_short_circuit() {
        let ctx = TestContext::new(
            "counter errors\n/(\\w+) (\\d+)/ {\n  $1 == \"GET\" && $2 >= 500 { errors++ }\n}\n",
        );
        ctx.run_all(&["GET 200", "GET 503", "PUT 500"]);
        assert_eq!(ctx.value("errors", &[]), Some(1.0));

        // `$2 >= 500` is never evaluated for a non-numeric status
        let ctx = TestContext::new("counter c\n/(\\w+) (\\w+)/ { $1 == \"x\" && $2 > 1 { c++ } }\n");
        assert!(ctx.run("y abc").is_ok());
    }

    #[test]
    fn test_negated_match() {
        let ctx = TestContext::new("counter c\n/^(\\S+)/ { $1 !~ /^GET$/ { c++ } }\n");
        ctx.run_all(&["GET x", "POST x"]);
        assert_eq!(ctx.value("c", &[]), Some(1.0));
    }

    // ========================================================================
    // Captures
    // ========================================================================

    #[test]
    fn test_capture_from_whichever_alternative_matched() {
        let ctx = TestContext::new("counter c by v\n/a(\\d)/ || /b(\\d)/ { c[$1]++ }\n");
        ctx.run_all(&["a1", "b2"]);
        assert_eq!(ctx.value("c", &["1"]), Some(1.0));
        assert_eq!(ctx.value("c", &["2"]), Some(1.0));
    }

    #[test]
    fn test_unparticipating_group_is_empty() {
        let ctx = TestContext::new("counter c by v\n/a(b)?/ { c[$1]++ }\n");
        ctx.run("a").unwrap();
        assert_eq!(ctx.value("c", &[""]), Some(1.0));
    }

    #[test]
    fn test_named_captures_and_nested_match() {
        let ctx = TestContext::new(
            "counter c by host\n\
             def syslog { /^(?P<host>\\w+) (?P<msg>.*)$/ { next } }\n\
             @syslog { $msg =~ /sshd/ { c[$host]++ } }\n",
        );
        ctx.run_all(&["web1 sshd accepted", "web1 cron ran", "db2 sshd failed"]);
        assert_eq!(ctx.value("c", &["web1"]), Some(1.0));
        assert_eq!(ctx.value("c", &["db2"]), Some(1.0));
    }

    // ========================================================================
    // Metric kinds
    // ========================================================================

    #[test]
    fn test_gauge_set_and_decrement() {
        let ctx = TestContext::new(
            "gauge conns\n/open/ { conns++ }\n/close/ { conns-- }\n/reset (\\d+)/ { conns = $1 }\n",
        );
        ctx.run_all(&["open", "open", "close"]);
        assert_eq!(ctx.value("conns", &[]), Some(1.0));
        ctx.run("reset 10").unwrap();
        assert_eq!(ctx.value("conns", &[]), Some(10.0));
    }

    #[test]
    fn test_histogram_observes() {
        let ctx = TestContext::new(
            "histogram latency buckets 1, 5\n/took (\\S+)/ { latency = float($1) }\n",
        );
        ctx.run_all(&["took 0.5", "took 2", "took 9"]);
        let snapshot = ctx.store.snapshot();
        let metric = &snapshot.metrics["latency"];
        assert_eq!(metric.kind, Kind::Histogram);
        assert_eq!(snapshot.value("latency", &[]), Some(11.5));
    }

    #[test]
    fn test_metric_read_and_locals() {
        let ctx = TestContext::new(
            "counter c\ngauge g\n/x(\\d+)/ {\n  c++\n  let n = $1 * 2\n  g = c * 10 + n\n}\n",
        );
        ctx.run_all(&["x1", "x3"]);
        assert_eq!(ctx.value("g", &[]), Some(26.0));
    }

    #[test]
    fn test_float_gauge() {
        let ctx = TestContext::new("gauge ratio\n/(\\d+)\\/(\\d+)/ { ratio = $1 / float($2) }\n");
        ctx.run("1/4").unwrap();
        assert_eq!(ctx.value("ratio", &[]), Some(0.25));
    }

    #[test]
    fn test_timestamp_from_strptime() {
        let ctx = TestContext::new(
            "gauge t\n/^(\\S+ \\S+) / { strptime($1, \"%Y-%m-%d %H:%M:%S\")\n t = timestamp() }\n",
        );
        ctx.run("2024-01-02 03:04:05 started").unwrap();
        assert_eq!(ctx.value("t", &[]), Some(1_704_164_645.0));
    }

    // ========================================================================
    // Runtime errors
    // ========================================================================

    #[test]
    fn test_non_numeric_capture_is_type_error() {
        let ctx = TestContext::new(
            "counter bytes by user\n/user=(\\w+) bytes=(\\S+)/ { bytes[$1] += $2 }\n",
        );
        assert!(matches!(
            ctx.run("user=alice bytes=abc"),
            Err(VmError::Type { .. })
        ));
        ctx.run("user=alice bytes=7").unwrap();
        assert_eq!(ctx.value("bytes", &["alice"]), Some(7.0));
    }

    #[test]
    fn test_no_rollback_after_error() {
        let ctx = TestContext::new("counter a\ncounter b\n/(\\S+)/ {\n  a++\n  b += $1\n}\n");
        assert!(ctx.run("oops").is_err());
        assert_eq!(ctx.value("a", &[]), Some(1.0));
        assert_eq!(ctx.value("b", &[]), None);
    }

    #[test]
    fn test_division_by_zero() {
        let ctx = TestContext::new("gauge g\n/(\\d+)/ { g = 10 / $1 }\n");
        assert_eq!(ctx.run("0"), Err(VmError::DivideByZero));
        ctx.run("5").unwrap();
        assert_eq!(ctx.value("g", &[]), Some(2.0));
    }

    #[test]
    fn test_negative_counter_delta() {
        let ctx = TestContext::new("counter c\n/(-?\\d+)/ { c += $1 }\n");
        assert!(matches!(
            ctx.run("-3"),
            Err(VmError::Store(StoreError::NegativeIncrement { .. }))
        ));
    }

    #[test]
    fn test_non_integral_write_promotes_int_metric() {
        let ctx = TestContext::new(
            "counter bytes by user\ngauge temp\n\
             /user=(\\w+) bytes=(\\S+)/ { bytes[$1] += $2 }\n\
             /t=(\\S+)/ { temp = $1 }\n",
        );
        ctx.run("user=alice bytes=2").unwrap();
        ctx.run("user=alice bytes=1.5").unwrap();
        assert_eq!(ctx.value("bytes", &["alice"]), Some(3.5));

        assert!(matches!(ctx.run("t=abc"), Err(VmError::Type { .. })));
        assert_eq!(ctx.value("temp", &[]), None);
        ctx.run("t=21.5").unwrap();
        assert_eq!(ctx.value("temp", &[]), Some(21.5));
    }

    #[test]
    fn test_numeric_captures_compare_as_numbers() {
        let ctx = TestContext::new("counter slow\n/ms=(\\d+) limit=(\\d+)/ {\n  $1 > $2 { slow++ }\n}\n");
        ctx.run("ms=10 limit=9").unwrap();
        ctx.run("ms=8 limit=9").unwrap();
        assert_eq!(ctx.value("slow", &[]), Some(1.0));
    }

    // ========================================================================
    // Store binding
    // ========================================================================

    #[test]
    fn test_shape_conflict_is_declaration_error() {
        let store = Arc::new(Store::new());
        let first = TestContext::with_store(
            "counter bytes by user\n/(\\w+)/ { bytes[$1]++ }\n",
            Arc::clone(&store),
        );
        first.run("alice").unwrap();

        let program = compile_source("second.tally", "counter total\ncounter bytes by host\n").unwrap();
        let err = Vm::new(Arc::new(program), Arc::clone(&store)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Declaration);
        assert_eq!(err.span.start, 22);
        // Nothing from the failed program was registered
        assert!(store.get("total").is_none());
        assert_eq!(store.snapshot().value("bytes", &["alice"]), Some(1.0));
    }

    #[test]
    fn test_shared_metric_across_programs() {
        let store = Arc::new(Store::new());
        store
            .declare(MetricDecl::new("lines", Kind::Counter))
            .unwrap();
        let a = TestContext::with_store("counter lines\n/a/ { lines++ }\n", Arc::clone(&store));
        let b = TestContext::with_store("counter lines\n/b/ { lines++ }\n", Arc::clone(&store));
        a.run("ab").unwrap();
        b.run("ab").unwrap();
        assert_eq!(store.snapshot().value("lines", &[]), Some(2.0));
    }

    #[test]
    fn test_concurrent_execution() {
        let ctx = TestContext::new("counter c by k\n/(\\w+)/ { c[$1]++ }\n");
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..250 {
                        ctx.run("key").unwrap();
                    }
                });
            }
        });
        assert_eq!(ctx.value("c", &["key"]), Some(1000.0));
    }

    #[test]
    fn test_deterministic_across_fresh_stores() {
        let source = "counter c by k\ngauge g\n/(\\w+) (\\d+)/ { c[$1] += $2\n g = $2 }\n";
        let lines = ["a 1", "b 2", "a 3", "junk", "c x"];
        let run = || {
            let ctx = TestContext::new(source);
            ctx.run_all(&lines);
            ctx.store.snapshot()
        };
        assert_eq!(run(), run());
    }
}
