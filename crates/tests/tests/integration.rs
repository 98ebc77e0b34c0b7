//! Integration tests for end-to-end logtally execution.
//!
//! These tests verify the full pipeline:
//! Load programs → Run logs → Snapshot → Compare

use logtally_dsl::ErrorKind;
use logtally_runtime::{Error, LogLine, RuntimeConfig};
use logtally_tests::TestHarness;
use logtally_vm::VmError;
use pretty_assertions::assert_eq;
use rayon::prelude::*;

// ============================================================================
// Golden scenarios
// ============================================================================

/// Every non-empty line of a five line log is counted.
#[test]
fn test_total_lines_golden() {
    let harness = TestHarness::new();
    harness.load_fixture("lines");

    let report = harness.run_fixture_log("five");

    assert_eq!(report.lines, 5);
    assert!(report.errors.is_empty());
    harness.assert_golden("lines");
}

/// Labelled counter accumulates captured byte counts per user.
#[test]
fn test_bytes_per_user_golden() {
    let harness = TestHarness::new();
    harness.load_fixture("bytes");

    let report = harness.run_fixture_log("bytes");

    assert_eq!(report.lines, 3);
    assert_eq!(report.matched, 3);
    harness.assert_golden("bytes");
}

/// Constants, decorators, nested matches on captures, histograms, exported
/// names, hidden metrics and `otherwise` together.
#[test]
fn test_access_log_golden() {
    let harness = TestHarness::new();
    harness.load_fixture("access");

    let report = harness.run_fixture_log("access");

    assert_eq!(report.lines, 5);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    harness.assert_golden("access");

    // Hidden from the export, still tracked.
    assert_eq!(harness.value("last_seen", &[]), Some(1_696_946_140.0));
}

// ============================================================================
// Matching
// ============================================================================

/// k matching lines out of n give a counter of exactly k.
#[test]
fn test_counter_counts_matching_lines_only() {
    let harness = TestHarness::from_source("counter errors\n/ERROR/ { errors++ }\n");

    let log = "INFO start\nERROR disk\nINFO tick\nERROR net\nWARN slow\nERROR disk\nINFO stop\n";
    let report = harness.run_log(log);

    assert_eq!(report.lines, 7);
    assert_eq!(report.matched, 3);
    assert_eq!(harness.value("errors", &[]), Some(3.0));
}

/// An outer pattern that never matches keeps the inner block from running.
#[test]
fn test_nested_rule_needs_outer_match() {
    let harness = TestHarness::from_source(
        "counter inner\n/^never-present/ {\n  /./ { inner++ }\n}\n",
    );

    harness.run_log("alpha\nbeta\ngamma\n");

    assert_eq!(harness.value("inner", &[]), None);
}

/// A failed numeric conversion affects only its own line.
#[test]
fn test_type_error_does_not_stop_source() {
    let harness = TestHarness::from_source(
        "counter bytes by user\n/user=(\\w+) bytes=(\\w+)/ { bytes[$1] += $2 }\n",
    );

    let report = harness.run_log(
        "user=alice bytes=10\nuser=mallory bytes=abc\nuser=bob bytes=20\nuser=alice bytes=5\n",
    );

    assert_eq!(report.lines, 4);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line_number, 2);
    assert!(matches!(report.errors[0].error, VmError::Type { .. }));

    assert_eq!(harness.value("bytes", &["alice"]), Some(15.0));
    assert_eq!(harness.value("bytes", &["bob"]), Some(20.0));
    assert_eq!(harness.value("bytes", &["mallory"]), None);
}

/// A fractional capture turns an integer counter into a float counter
/// instead of failing the line.
#[test]
fn test_fractional_capture_promotes_counter() {
    let harness = TestHarness::from_source(
        "counter bytes by user\n/user=(\\w+) bytes=(\\S+)/ { bytes[$1] += $2 }\n",
    );

    let report = harness.run_log("user=alice bytes=10\nuser=alice bytes=1.5\nuser=bob bytes=2\n");

    assert!(report.errors.is_empty());
    assert_eq!(harness.value("bytes", &["alice"]), Some(11.5));
    assert_eq!(harness.value("bytes", &["bob"]), Some(2.0));
}

// ============================================================================
// Loading
// ============================================================================

/// Programs that declare the same gauge share it whether they write
/// integers or floats.
#[test]
fn test_int_and_float_writers_share_a_metric() {
    let harness = TestHarness::from_source("gauge temp\n/^int / { temp = 2 }\n");
    harness.load("float.tally", "gauge temp\n/^float / { temp = 1.5 }\n");
    assert_eq!(harness.runtime().program_names().len(), 2);

    let report = harness.run_log("int x\nfloat x\n");
    assert!(report.errors.is_empty());
    assert_eq!(harness.value("temp", &[]), Some(1.5));

    harness.run_log("int x\n");
    assert_eq!(harness.value("temp", &[]), Some(2.0));
}

/// A conflicting redeclaration fails the second program and leaves the
/// first program's values alone.
#[test]
fn test_label_conflict_rejects_second_program() {
    let harness = TestHarness::from_source(
        "counter requests by method\n/^(\\w+) / { requests[$1]++ }\n",
    );
    harness.run_log("GET /a\nGET /b\nPOST /c\n");

    let err = harness
        .runtime()
        .load("other.tally", "counter requests by path\n/ (\\S+)$/ { requests[$1]++ }\n")
        .unwrap_err();
    match err {
        Error::Load(diag) => {
            assert_eq!(diag.kind, ErrorKind::Declaration);
            assert_eq!(diag.file, "other.tally");
            assert_eq!(diag.line, 1);
        }
        other => panic!("expected a declaration error, got {other:?}"),
    }

    harness.run_log("GET /d\n");
    assert_eq!(harness.value("requests", &["GET"]), Some(3.0));
    assert_eq!(harness.value("requests", &["POST"]), Some(1.0));
    assert_eq!(harness.runtime().program_names(), vec!["test.tally".to_string()]);
}

/// A broken program does not keep its siblings from running.
#[test]
fn test_compile_failure_is_program_scoped() {
    let harness = TestHarness::new();
    harness.load_fixture("lines");
    let err = harness
        .runtime()
        .load("broken.tally", "counter c\n/x/ { c++\n")
        .unwrap_err();
    assert!(matches!(err, Error::Load(ref d) if d.kind == ErrorKind::Syntax));

    let report = harness.run_fixture_log("five");
    assert_eq!(report.lines, 5);
    harness.assert_golden("lines");
}

// ============================================================================
// Determinism and concurrency
// ============================================================================

fn access_snapshot(parallel: bool) -> logtally_metrics::Snapshot {
    let harness = TestHarness::with_config(RuntimeConfig {
        parallel,
        ..RuntimeConfig::default()
    });
    harness.load_fixture("access");
    harness.load_fixture("lines");
    harness.load_fixture("bytes");
    harness.run_fixture_log("access");
    harness.run_fixture_log("bytes");
    harness.snapshot()
}

/// Identical programs and input on fresh stores give identical snapshots.
#[test]
fn test_runs_are_deterministic() {
    let first = access_snapshot(true);
    let second = access_snapshot(true);
    let sequential = access_snapshot(false);

    assert_eq!(first, second);
    assert_eq!(first, sequential);
}

/// Concurrent increments of one cell lose nothing.
#[test]
fn test_concurrent_dispatch_is_atomic() {
    let harness = TestHarness::from_source(
        "counter total\ncounter by_worker by worker\n\
         /w=(\\d+) n=(\\d+)/ {\n  total += $2\n  by_worker[$1]++\n}\n",
    );
    harness.load("second.tally", "counter total\n/n=(\\d+)/ { total += $1 }\n");

    (1..=2000u64).into_par_iter().for_each(|i| {
        let line = LogLine::new("par.log", i, format!("w={} n={}", i % 4, i));
        let report = harness.runtime().process(&line).unwrap();
        assert!(report.errors.is_empty());
    });

    // Both programs add n: 2 * (1 + ... + 2000)
    assert_eq!(harness.value("total", &[]), Some(4_002_000.0));
    for worker in ["0", "1", "2", "3"] {
        assert_eq!(harness.value("by_worker", &[worker]), Some(500.0));
    }

    let stats = harness.runtime().program_stats();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.lines == 2000 && s.errors == 0));
}
