//! Integration test harness for logtally.
//!
//! This crate provides utilities for end-to-end testing of the full
//! pipeline: Parse → Compile → Execute → Snapshot → Compare.
//!
//! Fixtures live next to this crate: programs under `programs/`, input logs
//! and golden snapshots under `testdata/`.

use std::path::PathBuf;
use std::sync::Arc;

use logtally_metrics::{Snapshot, Store};
use logtally_runtime::{OneShotReport, Runtime, RuntimeConfig, RuntimeOptions};

/// Path of a fixture file relative to this crate.
pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(relative)
}

/// A runtime over a fresh store.
pub struct TestHarness {
    runtime: Runtime,
}

impl TestHarness {
    /// Create a harness with default configuration and an empty store.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let store = Arc::new(Store::new());
        Self {
            runtime: Runtime::new(RuntimeOptions::new(config, store)),
        }
    }

    /// Create a harness with one program loaded from source.
    ///
    /// # Panics
    ///
    /// Panics if the program fails to load.
    pub fn from_source(source: &str) -> Self {
        let harness = Self::new();
        harness.load("test.tally", source);
        harness
    }

    /// Load a program, panicking with its diagnostic on failure.
    pub fn load(&self, name: &str, source: &str) {
        if let Err(e) = self.runtime.load(name, source) {
            panic!("program {name} failed to load: {e}");
        }
    }

    /// Load `programs/<name>.tally`.
    pub fn load_fixture(&self, name: &str) {
        let path = fixture_path(&format!("programs/{name}.tally"));
        if let Err(e) = self.runtime.load_path(&path) {
            panic!("fixture {name} failed to load: {e}");
        }
    }

    /// Run log text through every loaded program.
    pub fn run_log(&self, contents: &str) -> OneShotReport {
        match self.runtime.run_once("test.log", contents) {
            Ok(report) => report,
            Err(e) => panic!("one-shot run failed: {e}"),
        }
    }

    /// Run `testdata/<name>.log` through every loaded program.
    pub fn run_fixture_log(&self, name: &str) -> OneShotReport {
        let path = fixture_path(&format!("testdata/{name}.log"));
        match self.runtime.run_once_file(&path) {
            Ok(report) => report,
            Err(e) => panic!("one-shot run over {name}.log failed: {e}"),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn snapshot(&self) -> Snapshot {
        self.runtime.store().snapshot()
    }

    /// Value of one metric cell, as f64.
    pub fn value(&self, metric: &str, labels: &[&str]) -> Option<f64> {
        self.snapshot().value(metric, labels)
    }

    /// Compare the exported snapshot with `testdata/<name>.json`.
    ///
    /// # Panics
    ///
    /// Panics with a diff when they differ.
    pub fn assert_golden(&self, name: &str) {
        let path = fixture_path(&format!("testdata/{name}.json"));
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => panic!("cannot read {}: {e}", path.display()),
        };
        let expected = match Snapshot::from_json(&json) {
            Ok(snapshot) => snapshot,
            Err(e) => panic!("invalid golden file {}: {e}", path.display()),
        };
        let actual = self.snapshot().exported();
        pretty_assertions::assert_eq!(actual, expected, "snapshot differs from {}", path.display());
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
