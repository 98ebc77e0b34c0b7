//! Program checker
//!
//! Compiles programs and reports diagnostics without processing any logs.
//!
//! Usage: `logtally-check <progs>`

use std::process;
use std::sync::Arc;

use clap::Parser;
use logtally_metrics::Store;
use logtally_runtime::Runtime;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "logtally-check")]
#[command(about = "Compile logtally programs and report diagnostics")]
struct Args {
    /// Program file, directory or glob pattern
    progs: String,
}

fn main() {
    logtally_tools::init_logging();

    let args = Args::parse();

    // Programs share one store so cross-program metric conflicts show up.
    let runtime = Runtime::with_store(Arc::new(Store::new()));
    let report = match runtime.load_programs(&args.progs) {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            process::exit(2);
        }
    };

    for status in runtime.program_stats() {
        info!("{}: ok ({} metrics)", status.name, status.metrics);
    }
    for failure in &report.failed {
        error!("{failure}");
    }

    if report.loaded.is_empty() && report.failed.is_empty() {
        error!("no programs match '{}'", args.progs);
        process::exit(1);
    }
    if !report.is_ok() {
        process::exit(1);
    }
}
