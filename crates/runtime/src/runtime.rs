//! The runtime
//!
//! Owns the loaded programs and dispatches lines to them. Two modes:
//!
//! - **one-shot**: [`Runtime::run_once`] processes a finite input and returns
//!   a report. Each program walks the lines in order; programs run on the
//!   rayon pool when they share no metrics.
//! - **live**: [`Runtime::run`] pulls events from a [`Watcher`] and fans each
//!   line out to one tokio task per program until the watcher ends or the
//!   runtime is closed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use logtally_dsl::SourceFile;
use logtally_metrics::Store;
use logtally_vm::{compile_source, LogLine, Vm};
use parking_lot::RwLock;
use rayon::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RuntimeConfig, RuntimeOptions};
use crate::error::{Error, LineError, Result};
use crate::loader::{resolve_programs, LoadReport};
use crate::program::{LoadedProgram, ProgramStatus};
use crate::watcher::{SourceEvent, Watcher};

/// Result of dispatching one line to every program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineReport {
    /// Whether any program matched the line
    pub matched: bool,
    /// Programs that failed on the line, in load order
    pub errors: Vec<LineError>,
}

/// Result of a one-shot run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OneShotReport {
    /// Input lines processed
    pub lines: u64,
    /// Lines matched by at least one program
    pub matched: u64,
    /// Per-line failures, ordered by line number then program
    pub errors: Vec<LineError>,
}

impl OneShotReport {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    fn merge(&mut self, other: OneShotReport) {
        self.lines += other.lines;
        self.matched += other.matched;
        self.errors.extend(other.errors);
    }
}

/// Result of a live run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveReport {
    /// Lines received from the watcher
    pub lines: u64,
    /// Source failures reported by the watcher
    pub source_errors: u64,
}

/// Loaded programs bound to one metrics store.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    store: Arc<Store>,
    programs: RwLock<IndexMap<String, Arc<LoadedProgram>>>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Self {
        let RuntimeOptions { config, store } = options;
        info!(
            parallel = config.parallel,
            channel_capacity = config.channel_capacity,
            "runtime created"
        );
        Self {
            config,
            store,
            programs: RwLock::new(IndexMap::new()),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Runtime with default configuration over the given store.
    pub fn with_store(store: Arc<Store>) -> Self {
        Self::new(RuntimeOptions::new(RuntimeConfig::default(), store))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Compile `source` and bind it to the store under `name`.
    ///
    /// A failure leaves the runtime unchanged: other programs stay loaded and
    /// a previous program of the same name keeps running. Loading an existing
    /// name replaces that program; metric values are kept.
    #[instrument(skip(self, source), fields(program = %name))]
    pub fn load(&self, name: &str, source: &str) -> Result<()> {
        self.ensure_open()?;

        let vm = compile_source(name, source).and_then(|program| {
            Vm::new(Arc::new(program), Arc::clone(&self.store))
                .map_err(|err| err.to_diagnostic(&SourceFile::new(name, source)))
        });
        let vm = match vm {
            Ok(vm) => vm,
            Err(diagnostic) => {
                warn!(%diagnostic, "program failed to load");
                return Err(Error::Load(diagnostic));
            }
        };

        let metrics = vm.program().metrics.len();
        let program = Arc::new(LoadedProgram::new(name.to_string(), vm));
        let replaced = self
            .programs
            .write()
            .insert(name.to_string(), program)
            .is_some();

        if replaced {
            info!(metrics, "program reloaded");
        } else {
            info!(metrics, "program loaded");
        }
        Ok(())
    }

    /// Load one program file, named by its path. Returns the program name.
    pub fn load_path(&self, path: &Path) -> Result<String> {
        let source = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let name = path.display().to_string();
        self.load(&name, &source)?;
        Ok(name)
    }

    /// Load every program matching a file, directory or glob pattern.
    ///
    /// Files are loaded in sorted order; a failing file is recorded in the
    /// report and does not stop the rest.
    #[instrument(skip(self))]
    pub fn load_programs(&self, pattern: &str) -> Result<LoadReport> {
        self.ensure_open()?;

        let mut report = LoadReport::default();
        for path in resolve_programs(pattern)? {
            match self.load_path(&path) {
                Ok(name) => report.loaded.push(name),
                Err(err) => report.failed.push(err),
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "programs loaded"
        );
        Ok(report)
    }

    /// Load the programs named by the configuration's `progs`.
    pub fn load_configured(&self) -> Result<LoadReport> {
        let pattern = self
            .config
            .progs
            .clone()
            .ok_or_else(|| Error::Config("no `progs` configured".into()))?;
        self.load_programs(&pattern)
    }

    /// Remove a program. Its metrics stay in the store.
    pub fn unload(&self, name: &str) -> bool {
        let removed = self.programs.write().shift_remove(name).is_some();
        if removed {
            info!(program = %name, "program unloaded");
        }
        removed
    }

    /// Names of loaded programs, in load order.
    pub fn program_names(&self) -> Vec<String> {
        self.programs.read().keys().cloned().collect()
    }

    pub fn program(&self, name: &str) -> Option<Arc<LoadedProgram>> {
        self.programs.read().get(name).cloned()
    }

    /// Status of every loaded program, in load order.
    pub fn program_stats(&self) -> Vec<ProgramStatus> {
        self.programs.read().values().map(|p| p.status()).collect()
    }

    fn loaded(&self) -> Vec<Arc<LoadedProgram>> {
        self.programs.read().values().cloned().collect()
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Run one line through every loaded program.
    ///
    /// A program that fails on the line is reported in the result; the
    /// remaining programs still see the line.
    pub fn process(&self, line: &LogLine) -> Result<LineReport> {
        self.ensure_open()?;

        let mut report = LineReport::default();
        for program in self.loaded() {
            match program.process(line) {
                Ok(matched) => report.matched |= matched,
                Err(err) => report.errors.push(err),
            }
        }
        Ok(report)
    }

    /// Process a finite input and return once it is exhausted.
    ///
    /// Fails only when the runtime cannot run at all (closed, or nothing
    /// loaded). Per-line failures are collected in the report.
    #[instrument(skip(self, contents))]
    pub fn run_once(&self, source: &str, contents: &str) -> Result<OneShotReport> {
        self.ensure_open()?;
        let programs = self.loaded();
        if programs.is_empty() {
            return Err(Error::NoPrograms);
        }

        let source: Arc<str> = Arc::from(source);
        let lines: Vec<LogLine> = contents
            .lines()
            .enumerate()
            .map(|(i, text)| LogLine::new(Arc::clone(&source), i as u64 + 1, text))
            .collect();

        let parallel = self.config.parallel && programs.len() > 1 && !shares_metrics(&programs);
        debug!(
            lines = lines.len(),
            programs = programs.len(),
            parallel,
            "one-shot dispatch"
        );

        let runs: Vec<ProgramRun> = if parallel {
            programs.par_iter().map(|p| run_program(p, &lines)).collect()
        } else {
            programs.iter().map(|p| run_program(p, &lines)).collect()
        };

        let mut matched = vec![false; lines.len()];
        let mut errors = Vec::new();
        for run in runs {
            for (seen, hit) in matched.iter_mut().zip(run.matched) {
                *seen |= hit;
            }
            errors.extend(run.errors);
        }
        errors.sort_by_key(|e: &LineError| e.line_number);

        let report = OneShotReport {
            lines: lines.len() as u64,
            matched: matched.iter().filter(|m| **m).count() as u64,
            errors,
        };
        info!(
            lines = report.lines,
            matched = report.matched,
            errors = report.errors.len(),
            "one-shot complete"
        );
        Ok(report)
    }

    /// One-shot over a file, using its path as the source name. Invalid
    /// UTF-8 is replaced with U+FFFD so one bad byte costs at most its line.
    pub fn run_once_file(&self, path: &Path) -> Result<OneShotReport> {
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let contents = String::from_utf8_lossy(&bytes);
        self.run_once(&path.display().to_string(), &contents)
    }

    /// One-shot over several files in order; reports are summed.
    pub fn run_once_files(&self, paths: &[PathBuf]) -> Result<OneShotReport> {
        let mut total = OneShotReport::default();
        for path in paths {
            total.merge(self.run_once_file(path)?);
        }
        Ok(total)
    }

    /// Tail lines from `watcher` until it ends or the runtime is closed.
    ///
    /// Each program gets its own task and bounded queue, so it sees the
    /// lines of a source in order and never waits on another program. The
    /// program set is fixed for the duration of the run.
    pub async fn run<W: Watcher>(&self, mut watcher: W) -> Result<LiveReport> {
        self.ensure_open()?;
        let programs = self.loaded();
        if programs.is_empty() {
            return Err(Error::NoPrograms);
        }

        let capacity = self.config.channel_capacity.max(1);
        let mut senders = Vec::with_capacity(programs.len());
        let mut tasks = Vec::with_capacity(programs.len());
        for program in programs {
            let (tx, mut rx) = mpsc::channel::<Arc<LogLine>>(capacity);
            tasks.push(tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    // Failures are logged and counted by the program.
                    let _ = program.process(&line);
                }
            }));
            senders.push(tx);
        }
        info!(programs = senders.len(), capacity, "live mode started");

        let mut report = LiveReport::default();
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = watcher.next_event() => event,
            };

            match event {
                Some(SourceEvent::Line(line)) => {
                    report.lines += 1;
                    let line = Arc::new(line);
                    for tx in &senders {
                        if tx.send(Arc::clone(&line)).await.is_err() {
                            warn!(input = %line.source, "program task stopped");
                        }
                    }
                }
                Some(SourceEvent::Error { source, message }) => {
                    report.source_errors += 1;
                    warn!(input = %source, %message, "source failed");
                }
                None => break,
            }
        }

        drop(senders);
        for task in tasks {
            if let Err(err) = task.await {
                error!(%err, "program task panicked");
            }
        }
        watcher.close();

        info!(
            lines = report.lines,
            source_errors = report.source_errors,
            "live mode stopped"
        );
        Ok(report)
    }

    /// Stop dispatch and release every program.
    ///
    /// A running [`run`](Self::run) finishes the lines already queued and
    /// returns. The store keeps its final values.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        let released = {
            let mut programs = self.programs.write();
            let count = programs.len();
            programs.clear();
            count
        };
        info!(programs = released, "runtime closed");
    }
}

struct ProgramRun {
    matched: Vec<bool>,
    errors: Vec<LineError>,
}

fn run_program(program: &LoadedProgram, lines: &[LogLine]) -> ProgramRun {
    let mut run = ProgramRun {
        matched: Vec::with_capacity(lines.len()),
        errors: Vec::new(),
    };
    for line in lines {
        match program.process(line) {
            Ok(matched) => run.matched.push(matched),
            Err(err) => {
                run.matched.push(false);
                run.errors.push(err);
            }
        }
    }
    run
}

/// Whether two programs write to the same store metric.
fn shares_metrics(programs: &[Arc<LoadedProgram>]) -> bool {
    let mut seen = HashSet::new();
    programs
        .iter()
        .flat_map(|p| p.metric_names())
        .any(|name| !seen.insert(name))
}
