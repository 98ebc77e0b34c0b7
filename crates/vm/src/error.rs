//! Execution errors

use logtally_metrics::StoreError;
use thiserror::Error;

/// Failure while executing one line. Aborts the rest of that line for the
/// program; mutations already applied stay applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("type error: {message}")]
    Type { message: String },

    #[error("division by zero")]
    DivideByZero,

    #[error("integer overflow in {op}")]
    Overflow { op: &'static str },

    #[error("strptime: cannot parse {input:?} with format {format:?}")]
    Strptime { input: String, format: String },

    #[error(transparent)]
    Store(StoreError),

    #[error("stack underflow at instruction {ip}")]
    StackUnderflow { ip: usize },
}

impl VmError {
    pub fn type_error(message: impl Into<String>) -> Self {
        VmError::Type {
            message: message.into(),
        }
    }
}

impl From<StoreError> for VmError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Overflow { .. } => VmError::Overflow { op: "metric update" },
            other => VmError::Store(other),
        }
    }
}
