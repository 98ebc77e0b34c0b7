//! One-shot runner
//!
//! Loads programs, runs them over static log files and prints the exported
//! metrics snapshot as JSON.
//!
//! Usage: `logtally --progs 'progs/*.tally' app.log other.log`

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use logtally_metrics::Store;
use logtally_runtime::{Runtime, RuntimeConfig, RuntimeOptions};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "logtally")]
#[command(about = "Extract metrics from log files with logtally programs")]
struct Args {
    /// Log files to process, in order
    logs: Vec<PathBuf>,

    /// Program file, directory or glob pattern
    #[arg(short, long)]
    progs: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the snapshot here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Include hidden metrics in the snapshot
    #[arg(long)]
    all: bool,

    /// Run programs one after another instead of on the thread pool
    #[arg(long)]
    sequential: bool,
}

fn main() {
    logtally_tools::init_logging();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RuntimeConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                process::exit(2);
            }
        },
        None => RuntimeConfig::default(),
    };
    if args.progs.is_some() {
        config.progs = args.progs.clone();
    }
    if !args.logs.is_empty() {
        config.logs = args.logs.clone();
    }
    if args.sequential {
        config.parallel = false;
    }

    let runtime = Runtime::new(RuntimeOptions::new(config, Arc::new(Store::new())));

    let loaded = match runtime.load_configured() {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            process::exit(2);
        }
    };
    for failure in &loaded.failed {
        error!("{failure}");
    }

    let logs = runtime.config().logs.clone();
    let report = match runtime.run_once_files(&logs) {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    for line_error in &report.errors {
        warn!("{line_error}");
    }
    info!(
        lines = report.lines,
        matched = report.matched,
        errors = report.error_count(),
        "done"
    );

    let snapshot = runtime.store().snapshot();
    let snapshot = if args.all { snapshot } else { snapshot.exported() };
    runtime.close();

    let json = match snapshot.to_json_pretty() {
        Ok(json) => json,
        Err(e) => {
            error!("cannot serialize snapshot: {e}");
            process::exit(1);
        }
    };
    match &args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, json + "\n") {
                error!("{}: {e}", path.display());
                process::exit(1);
            }
        }
        None => println!("{json}"),
    }
}
