//! Timestamped device lines and their two textual forms.
//!
//! - log record: `[timestamp] line`
//! - broadcast:  `{index}[timestamp] line`

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::ClockOffset;
use crate::error::{DomainError, DomainResult};

/// One device line stamped with the (offset-corrected) time it arrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedMessage {
    pub source: usize,
    pub timestamp: String,
    pub line: String,
}

impl TimestampedMessage {
    pub fn new(source: usize, timestamp: impl Into<String>, line: impl Into<String>) -> Self {
        Self {
            source,
            timestamp: timestamp.into(),
            line: line.into(),
        }
    }

    /// Stamps `line` with `clock.now()`.
    pub fn stamp(source: usize, clock: &ClockOffset, line: impl Into<String>) -> Self {
        Self::new(source, clock.timestamp(), line)
    }

    /// Text written to the persisted log (without line terminator).
    pub fn log_record(&self) -> String {
        format!("[{}] {}", self.timestamp, self.line)
    }

    /// Text published to subscribers.
    pub fn broadcast_text(&self) -> String {
        format!("{{{}}}[{}] {}", self.source, self.timestamp, self.line)
    }

    /// Parses the broadcast form back into its parts.
    pub fn parse_broadcast(text: &str) -> DomainResult<Self> {
        let parse_err = |reason: &str| DomainError::ParseError {
            field: "broadcast message".to_string(),
            reason: reason.to_string(),
        };

        let rest = text
            .strip_prefix('{')
            .ok_or_else(|| parse_err("missing '{'"))?;
        let (index, rest) = rest
            .split_once('}')
            .ok_or_else(|| parse_err("missing '}'"))?;
        let source = index
            .parse::<usize>()
            .map_err(|e| parse_err(&format!("bad index {index:?}: {e}")))?;

        let rest = rest
            .strip_prefix('[')
            .ok_or_else(|| parse_err("missing '['"))?;
        let (timestamp, rest) = rest
            .split_once("] ")
            .ok_or_else(|| parse_err("missing '] '"))?;

        Ok(Self::new(source, timestamp, rest))
    }
}

impl fmt::Display for TimestampedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.broadcast_text())
    }
}
