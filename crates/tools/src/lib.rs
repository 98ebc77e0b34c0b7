//! logtally tools
//!
//! Command-line entry points for running logtally programs.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging with a default filter.
///
/// Use `RUST_LOG` environment variable to override the default filter.
/// Output goes to stderr so stdout stays free for snapshots.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,logtally_runtime=debug,logtally_vm=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
