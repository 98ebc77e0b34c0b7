//! One-shot throughput benchmarks
//!
//! Measures:
//! - Lines per second through the fixture programs as the log grows
//! - Serial versus parallel dispatch across several programs
//! - Compile time of the largest fixture program

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use logtally_runtime::RuntimeConfig;
use logtally_tests::{TestHarness, fixture_path};

fn read_fixture(relative: &str) -> String {
    let path = fixture_path(relative);
    match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) => panic!("cannot read {}: {e}", path.display()),
    }
}

/// The fixture log repeated until it holds at least `lines` lines.
fn repeated_log(name: &str, lines: usize) -> String {
    let base = read_fixture(&format!("testdata/{name}.log"));
    let per_copy = base.lines().count().max(1);
    base.repeat(lines.div_ceil(per_copy))
}

fn harness(parallel: bool, programs: &[&str]) -> TestHarness {
    let harness = TestHarness::with_config(RuntimeConfig {
        parallel,
        ..RuntimeConfig::default()
    });
    for name in programs {
        harness.load_fixture(name);
    }
    harness
}

/// Benchmark the access log program over growing inputs
fn bench_log_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("access_log");

    for lines in [1_000, 10_000, 100_000] {
        let log = repeated_log("access", lines);
        let harness = harness(false, &["access"]);

        group.throughput(Throughput::Elements(log.lines().count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &log, |b, log| {
            b.iter(|| harness.run_log(black_box(log)))
        });
    }

    group.finish();
}

/// Benchmark serial versus parallel dispatch with every fixture program loaded
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    let log = repeated_log("access", 20_000) + &repeated_log("bytes", 20_000);
    group.throughput(Throughput::Elements(log.lines().count() as u64));

    for parallel in [false, true] {
        let harness = harness(parallel, &["lines", "bytes", "access"]);
        let label = if parallel { "parallel" } else { "serial" };
        group.bench_function(label, |b| b.iter(|| harness.run_log(black_box(&log))));
    }

    group.finish();
}

/// Benchmark parse plus compile of a program
fn bench_compile(c: &mut Criterion) {
    let source = read_fixture("programs/access.tally");

    c.bench_function("compile_access", |b| {
        b.iter(|| logtally_vm::compile_source("access.tally", black_box(&source)))
    });
}

criterion_group!(benches, bench_log_sizes, bench_dispatch, bench_compile);
criterion_main!(benches);
