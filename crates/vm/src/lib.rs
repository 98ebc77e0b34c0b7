//! logtally virtual machine
//!
//! Compiles parsed programs to flat bytecode and executes it, one input line
//! at a time, against a shared [`logtally_metrics::Store`].
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use logtally_metrics::Store;
//! use logtally_vm::{compile_source, LogLine, Vm};
//!
//! let program = compile_source("lines.tally", "counter lines\n/./ { lines++ }\n").unwrap();
//! let store = Arc::new(Store::new());
//! let vm = Vm::new(Arc::new(program), Arc::clone(&store)).unwrap();
//!
//! vm.execute(&LogLine::new("app.log", 1, "hello")).unwrap();
//! assert_eq!(store.snapshot().value("lines", &[]), Some(1.0));
//! ```

pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod line;
pub mod value;

pub use builtins::Builtin;
pub use bytecode::{CaptureRef, MutateOp, Op, Pattern, Program, SlotId};
pub use compiler::{compile, compile_source};
pub use error::VmError;
pub use executor::{Outcome, Vm};
pub use line::LogLine;
pub use value::Value;
