//! logtally runtime
//!
//! Loads compiled programs against a shared metrics store and feeds them
//! log lines, either from a finite input (one-shot) or from a [`Watcher`]
//! (live).
//!
//! ```
//! use std::sync::Arc;
//! use logtally_metrics::Store;
//! use logtally_runtime::Runtime;
//!
//! let runtime = Runtime::with_store(Arc::new(Store::new()));
//! runtime.load("lines", "counter total_lines\n/./ { total_lines++ }\n").unwrap();
//!
//! let report = runtime.run_once("app.log", "one\ntwo\nthree\n").unwrap();
//! assert_eq!(report.lines, 3);
//! assert_eq!(runtime.store().snapshot().value("total_lines", &[]), Some(3.0));
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod program;
pub mod runtime;
pub mod watcher;

pub use config::{RuntimeConfig, RuntimeOptions, DEFAULT_CHANNEL_CAPACITY};
pub use error::{Error, LineError, Result};
pub use loader::{resolve_programs, LoadReport, PROGRAM_EXTENSION};
pub use logtally_vm::LogLine;
pub use program::{LoadedProgram, ProgramStatus};
pub use runtime::{LineReport, LiveReport, OneShotReport, Runtime};
pub use watcher::{ChannelWatcher, SourceEvent, Watcher, WatcherHandle};
