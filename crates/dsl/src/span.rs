//! Source location tracking for diagnostics.
//!
//! # Design
//!
//! - `Span`: byte range into a program's source text
//! - `SourceFile`: one program source with a line index for line/column lookup
//!
//! # Examples
//!
//! ```
//! # use logtally_dsl::span::*;
//! let file = SourceFile::new("test.tally", "counter a\n/x/ { a++ }\n");
//! let span = Span::new(10, 13);
//!
//! assert_eq!(file.snippet(span), "/x/");
//! assert_eq!(file.line_col(span.start), (2, 1));
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Byte range in a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset of start position
    pub start: u32,
    /// Byte offset of end position (exclusive)
    pub end: u32,
}

impl Span {
    /// Create a new span.
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Zero-length span at `offset`.
    pub fn point(offset: u32) -> Self {
        Self::new(offset, offset)
    }

    /// Check if this span is zero-length.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Merge two spans (returns span covering both).
    pub fn merge(&self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Byte range, for slicing the source.
    pub fn range(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

impl From<Range<usize>> for Span {
    fn from(range: Range<usize>) -> Self {
        Span::new(
            u32::try_from(range.start).unwrap_or(u32::MAX),
            u32::try_from(range.end).unwrap_or(u32::MAX),
        )
    }
}

/// A single program source with line indexing.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Display name (usually the file path)
    pub name: String,
    /// Original source text
    pub source: String,
    /// Byte offsets of each line start; `line_starts[0]` is always 0.
    line_starts: Vec<u32>,
}

impl SourceFile {
    /// Create a new source file with precomputed line starts.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let line_starts = compute_line_starts(&source);
        Self {
            name: name.into(),
            source,
            line_starts,
        }
    }

    /// Get (line, column) for a byte offset. Both are 1-based; the column
    /// counts characters, not bytes.
    ///
    /// Offsets past the end of the source clamp to the end.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let offset = offset.min(self.source.len() as u32);
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx.max(1) - 1,
        };
        let line_start = self.line_starts[line_idx] as usize;
        let column = self
            .source
            .get(line_start..offset as usize)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0);

        (line_idx as u32 + 1, column as u32 + 1)
    }

    /// Get the source snippet for a span.
    pub fn snippet(&self, span: Span) -> &str {
        self.source.get(span.range()).unwrap_or("")
    }

    /// Get the number of lines in this file.
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

fn compute_line_starts(source: &str) -> Vec<u32> {
    std::iter::once(0)
        .chain(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i as u32 + 1),
        )
        .collect()
}
