//! Program file discovery

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// File extension of program sources.
pub const PROGRAM_EXTENSION: &str = "tally";

/// Outcome of loading a set of program files.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names of programs that loaded, in load order
    pub loaded: Vec<String>,
    /// One entry per file that failed
    pub failed: Vec<Error>,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Resolve a program file, directory or glob pattern to sorted paths.
///
/// A directory yields its `*.tally` files (not recursive). A glob yields
/// every matching file. Anything else is taken as a single file path.
pub fn resolve_programs(pattern: &str) -> Result<Vec<PathBuf>> {
    let path = Path::new(pattern);

    let mut paths = if path.is_dir() {
        std::fs::read_dir(path)
            .map_err(|e| Error::io(path, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == PROGRAM_EXTENSION))
            .collect::<Vec<_>>()
    } else if pattern.contains(['*', '?', '[']) {
        let entries = glob::glob(pattern).map_err(|e| Error::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(p) if p.is_file() => paths.push(p),
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().to_path_buf();
                    return Err(Error::io(path, e.into()));
                }
            }
        }
        paths
    } else {
        vec![path.to_path_buf()]
    };

    paths.sort();
    Ok(paths)
}
