//! Runtime errors

use std::path::PathBuf;
use std::sync::Arc;

use logtally_dsl::Diagnostic;
use logtally_vm::VmError;
use thiserror::Error;

/// Runtime result type
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors
#[derive(Debug, Error)]
pub enum Error {
    /// A program failed to compile or to declare its metrics.
    #[error("{0}")]
    Load(Diagnostic),

    #[error("no programs loaded")]
    NoPrograms,

    #[error("runtime is closed")]
    Closed,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid program pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// A runtime failure of one program on one input line.
///
/// Never fatal: the program keeps processing later lines and other
/// programs still see this one.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{program}: {input}:{line_number}: {error}")]
pub struct LineError {
    pub program: String,
    /// Source the line came from
    pub input: Arc<str>,
    pub line_number: u64,
    pub error: VmError,
}
