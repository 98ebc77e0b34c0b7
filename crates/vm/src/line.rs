//! Input lines

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// One line of log text and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    /// Line text without the trailing newline
    pub text: String,
    /// Source identity (usually the log file path)
    pub source: Arc<str>,
    /// 1-based line number within the source
    pub line_number: u64,
    /// Timestamp supplied by the line source, if any
    pub timestamp: Option<DateTime<Utc>>,
}

impl LogLine {
    pub fn new(source: impl Into<Arc<str>>, line_number: u64, text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        Self {
            text,
            source: source.into(),
            line_number,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_newline_stripped() {
        let line = LogLine::new("app.log", 3, "GET /index\r\n");
        assert_eq!(line.text, "GET /index");
        assert_eq!(line.to_string(), "app.log:3");
    }
}
