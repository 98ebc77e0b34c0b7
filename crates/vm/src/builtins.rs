//! Builtin functions callable from programs.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use logtally_metrics::Number;

use crate::compiler::Type;
use crate::error::VmError;
use crate::line::LogLine;
use crate::value::{parse_number, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Len,
    ToLower,
    Strtol,
    Int,
    Float,
    String,
    Strptime,
    Settime,
    Timestamp,
    GetFilename,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "len" => Builtin::Len,
            "tolower" => Builtin::ToLower,
            "strtol" => Builtin::Strtol,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "string" => Builtin::String,
            "strptime" => Builtin::Strptime,
            "settime" => Builtin::Settime,
            "timestamp" => Builtin::Timestamp,
            "getfilename" => Builtin::GetFilename,
            _ => return None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::ToLower => "tolower",
            Builtin::Strtol => "strtol",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::String => "string",
            Builtin::Strptime => "strptime",
            Builtin::Settime => "settime",
            Builtin::Timestamp => "timestamp",
            Builtin::GetFilename => "getfilename",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Timestamp | Builtin::GetFilename => 0,
            Builtin::Strtol | Builtin::Strptime => 2,
            _ => 1,
        }
    }

    pub(crate) fn return_type(self) -> Type {
        match self {
            Builtin::Float => Type::Float,
            Builtin::ToLower | Builtin::String | Builtin::GetFilename => Type::Str,
            _ => Type::Int,
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-line state builtins may read or update.
pub(crate) struct CallContext<'a> {
    pub line: &'a LogLine,
    /// Timestamp set by `strptime` or `settime` during this line
    pub timestamp: Option<i64>,
}

impl CallContext<'_> {
    fn timestamp(&self) -> i64 {
        self.timestamp
            .or_else(|| self.line.timestamp.map(|t| t.timestamp()))
            .unwrap_or(0)
    }
}

/// Invoke `builtin`. The compiler guarantees `args.len() == builtin.arity()`.
pub(crate) fn call(
    builtin: Builtin,
    args: &[Value],
    ctx: &mut CallContext<'_>,
) -> Result<Value, VmError> {
    let arg = |i: usize| {
        args.get(i)
            .ok_or_else(|| VmError::type_error(format!("{}: missing argument {}", builtin, i + 1)))
    };

    match builtin {
        Builtin::Len => Ok(Value::Int(arg(0)?.to_string().chars().count() as i64)),
        Builtin::ToLower => Ok(Value::Str(arg(0)?.to_string().to_lowercase())),
        Builtin::Strtol => {
            let text = arg(0)?.to_string();
            let base = match arg(1)?.to_number()? {
                Number::Int(b) if (2..=36).contains(&b) => b as u32,
                other => {
                    return Err(VmError::type_error(format!(
                        "strtol: base {} out of range 2..=36",
                        other
                    )))
                }
            };
            i64::from_str_radix(text.trim(), base)
                .map(Value::Int)
                .map_err(|_| {
                    VmError::type_error(format!("strtol: {:?} is not a base {} integer", text, base))
                })
        }
        Builtin::Int => match arg(0)? {
            Value::Str(s) => match parse_number(s) {
                Some(Number::Int(n)) => Ok(Value::Int(n)),
                Some(Number::Float(x)) => float_to_int(x),
                None => Err(VmError::type_error(format!(
                    "int: cannot convert {:?} to a number",
                    s
                ))),
            },
            Value::Float(x) => float_to_int(*x),
            other => Ok(Value::from_number(other.to_number()?)),
        },
        Builtin::Float => Ok(Value::Float(arg(0)?.to_number()?.as_f64())),
        Builtin::String => Ok(Value::Str(arg(0)?.to_string())),
        Builtin::Strptime => {
            let input = arg(0)?.to_string();
            let format = arg(1)?.to_string();
            let seconds = parse_time(&input, &format)
                .ok_or(VmError::Strptime { input, format })?;
            ctx.timestamp = Some(seconds);
            Ok(Value::Int(seconds))
        }
        Builtin::Settime => {
            let seconds = match arg(0)?.to_number()? {
                Number::Int(n) => n,
                Number::Float(x) => x.trunc() as i64,
            };
            ctx.timestamp = Some(seconds);
            Ok(Value::Int(seconds))
        }
        Builtin::Timestamp => Ok(Value::Int(ctx.timestamp())),
        Builtin::GetFilename => Ok(Value::Str(ctx.line.source.to_string())),
    }
}

fn float_to_int(x: f64) -> Result<Value, VmError> {
    let t = x.trunc();
    if t >= i64::MIN as f64 && t < i64::MAX as f64 {
        Ok(Value::Int(t as i64))
    } else {
        Err(VmError::Overflow { op: "int conversion" })
    }
}

/// Parse `input` with a chrono format string, as Unix seconds. Inputs
/// without an offset are taken as UTC; date-only inputs as midnight.
fn parse_time(input: &str, format: &str) -> Option<i64> {
    if let Ok(t) = DateTime::parse_from_str(input, format) {
        return Some(t.timestamp());
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(input, format) {
        return Some(t.and_utc().timestamp());
    }
    NaiveDate::parse_from_str(input, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc().timestamp())
}
