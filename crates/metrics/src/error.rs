//! Store errors

use thiserror::Error;

use crate::metric::Kind;

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures of metric declaration and cell mutation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("metric `{name}` already declared as {existing}, cannot redeclare as {requested}")]
    ShapeMismatch {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("invalid buckets for `{name}`: {message}")]
    InvalidBuckets { name: String, message: String },

    #[error("counter `{name}` cannot be incremented by negative amount {delta}")]
    NegativeIncrement { name: String, delta: f64 },

    #[error("integer overflow updating `{name}`")]
    Overflow { name: String },

    #[error("{op} is not supported on {kind} `{name}`")]
    WrongOperation {
        name: String,
        kind: Kind,
        op: &'static str,
    },

    #[error("metric `{name}` has {expected} label key(s), got {found} value(s)")]
    LabelArity {
        name: String,
        expected: usize,
        found: usize,
    },
}
