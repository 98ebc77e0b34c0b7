//! Runtime configuration
//!
//! Loadable from TOML:
//!
//! ```toml
//! progs = "progs/*.tally"
//! logs = ["testdata/app.log"]
//! channel_capacity = 1024
//! parallel = true
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use logtally_metrics::Store;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default live-mode queue depth per program.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Program file, directory or glob pattern
    pub progs: Option<String>,
    /// Static log files for one-shot mode, processed in order
    pub logs: Vec<PathBuf>,
    /// Lines buffered per program in live mode
    pub channel_capacity: usize,
    /// Run programs on the rayon pool in one-shot mode
    pub parallel: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            progs: None,
            logs: Vec::new(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            parallel: true,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::Config("channel_capacity must be at least 1".into()));
        }
        Ok(())
    }
}

/// Everything a [`Runtime`](crate::Runtime) is built from.
///
/// The store is injected so callers (and tests) decide its lifetime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub config: RuntimeConfig,
    pub store: Arc<Store>,
}

impl RuntimeOptions {
    pub fn new(config: RuntimeConfig, store: Arc<Store>) -> Self {
        Self { config, store }
    }
}
