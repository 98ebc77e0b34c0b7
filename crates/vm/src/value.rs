//! Runtime values
//!
//! Everything on the VM stack is a [`Value`]. Captured text is always a
//! string; arithmetic converts strings to numbers on demand and fails with a
//! type error when the text is not numeric.

use std::cmp::Ordering;
use std::fmt;

use logtally_metrics::Number;

use crate::error::VmError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(x) => *x != 0.0,
            Value::Str(s) => !s.is_empty(),
        }
    }

    /// Numeric view of this value. Strings are parsed as an integer first,
    /// then as a float.
    pub fn to_number(&self) -> Result<Number, VmError> {
        match self {
            Value::Int(n) => Ok(Number::Int(*n)),
            Value::Float(x) => Ok(Number::Float(*x)),
            Value::Bool(b) => Ok(Number::Int(*b as i64)),
            Value::Str(s) => parse_number(s).ok_or_else(|| {
                VmError::type_error(format!("cannot convert {:?} to a number", s))
            }),
        }
    }

    pub fn from_number(n: Number) -> Value {
        match n {
            Number::Int(n) => Value::Int(n),
            Number::Float(x) => Value::Float(x),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

pub(crate) fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if let Ok(n) = s.parse::<i64>() {
        return Some(Number::Int(n));
    }
    s.parse::<f64>().ok().filter(|x| x.is_finite()).map(Number::Float)
}

/// Arithmetic operator applied by [`arith`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "addition",
            ArithOp::Sub => "subtraction",
            ArithOp::Mul => "multiplication",
            ArithOp::Div => "division",
            ArithOp::Mod => "modulo",
            ArithOp::Pow => "exponentiation",
        }
    }
}

/// Integer arithmetic when both sides are integers (checked, integer
/// division truncates); float arithmetic otherwise.
pub(crate) fn arith(op: ArithOp, a: &Value, b: &Value) -> Result<Value, VmError> {
    let overflow = || VmError::Overflow { op: op.name() };

    match (a.to_number()?, b.to_number()?) {
        (Number::Int(x), Number::Int(y)) => {
            let result = match op {
                ArithOp::Add => x.checked_add(y),
                ArithOp::Sub => x.checked_sub(y),
                ArithOp::Mul => x.checked_mul(y),
                ArithOp::Div | ArithOp::Mod if y == 0 => return Err(VmError::DivideByZero),
                ArithOp::Div => x.checked_div(y),
                ArithOp::Mod => x.checked_rem(y),
                ArithOp::Pow if y < 0 => return Ok(Value::Float((x as f64).powf(y as f64))),
                ArithOp::Pow => u32::try_from(y).ok().and_then(|y| x.checked_pow(y)),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (x, y) => {
            let (x, y) = (x.as_f64(), y.as_f64());
            let result = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                ArithOp::Div | ArithOp::Mod if y == 0.0 => return Err(VmError::DivideByZero),
                ArithOp::Div => x / y,
                ArithOp::Mod => x % y,
                ArithOp::Pow => x.powf(y),
            };
            if result.is_finite() {
                Ok(Value::Float(result))
            } else {
                Err(overflow())
            }
        }
    }
}

pub(crate) fn negate(v: &Value) -> Result<Value, VmError> {
    match v.to_number()? {
        Number::Int(n) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(VmError::Overflow { op: "negation" }),
        Number::Float(x) => Ok(Value::Float(-x)),
    }
}

/// Compare two values. Two strings compare numerically when both parse as
/// numbers and as text otherwise; anything else compares numerically.
pub(crate) fn compare(a: &Value, b: &Value) -> Result<Ordering, VmError> {
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        if parse_number(x).is_none() || parse_number(y).is_none() {
            return Ok(x.cmp(y));
        }
    }
    let ordering = match (a.to_number()?, b.to_number()?) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        (x, y) => x.as_f64().partial_cmp(&y.as_f64()),
    };
    ordering.ok_or_else(|| {
        VmError::type_error(format!(
            "cannot compare {} {} with {} {}",
            a.type_name(),
            a,
            b.type_name(),
            b
        ))
    })
}
