//! Loaded programs and their statistics

use std::sync::atomic::{AtomicU64, Ordering};

use logtally_vm::{LogLine, Vm};
use serde::Serialize;
use tracing::warn;

use crate::error::LineError;

#[derive(Debug, Default)]
struct Counters {
    lines: AtomicU64,
    matched: AtomicU64,
    errors: AtomicU64,
}

/// A program that compiled and bound to the store.
#[derive(Debug)]
pub struct LoadedProgram {
    name: String,
    vm: Vm,
    counters: Counters,
}

impl LoadedProgram {
    pub(crate) fn new(name: String, vm: Vm) -> Self {
        Self {
            name,
            vm,
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Store names of the metrics this program declares.
    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.vm.program().metrics.iter().map(|m| m.name.as_str())
    }

    /// Run one line, updating statistics. Errors are logged here.
    pub(crate) fn process(&self, line: &LogLine) -> Result<bool, LineError> {
        self.counters.lines.fetch_add(1, Ordering::Relaxed);
        match self.vm.execute(line) {
            Ok(outcome) => {
                if outcome.matched {
                    self.counters.matched.fetch_add(1, Ordering::Relaxed);
                }
                Ok(outcome.matched)
            }
            Err(error) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    program = %self.name,
                    input = %line.source,
                    line = line.line_number,
                    %error,
                    "line failed"
                );
                Err(LineError {
                    program: self.name.clone(),
                    input: line.source.clone(),
                    line_number: line.line_number,
                    error,
                })
            }
        }
    }

    pub fn status(&self) -> ProgramStatus {
        ProgramStatus {
            name: self.name.clone(),
            lines: self.counters.lines.load(Ordering::Relaxed),
            matched: self.counters.matched.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            metrics: self.vm.program().metrics.len(),
        }
    }
}

/// Per-program status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgramStatus {
    pub name: String,
    /// Lines processed
    pub lines: u64,
    /// Lines on which a top-level rule matched
    pub matched: u64,
    /// Lines that failed with a runtime error
    pub errors: u64,
    /// Metrics declared
    pub metrics: usize,
}
