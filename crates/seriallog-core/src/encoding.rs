//! Character encoding of persisted log files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// How log text is turned into bytes on disk.
///
/// The broadcast stream is always UTF-8; this only affects persisted logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogEncoding {
    /// Text is written unchanged.
    #[default]
    #[serde(rename = "utf-8")]
    Utf8,

    /// ISO-8859-1 for single-byte viewers. Characters above U+00FF are
    /// dropped silently.
    #[serde(rename = "latin-1")]
    Latin1,
}

impl LogEncoding {
    /// Encodes `text` for writing to a log file.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            Self::Utf8 => text.as_bytes().to_vec(),
            Self::Latin1 => text
                .chars()
                .filter_map(|c| u8::try_from(u32::from(c)).ok())
                .collect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf-8",
            Self::Latin1 => "latin-1",
        }
    }
}

impl fmt::Display for LogEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogEncoding {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            other => Err(DomainError::InvalidFieldValue {
                field: "log_encoding".to_string(),
                value: other.to_string(),
                expected: "utf-8 or latin-1".to_string(),
            }),
        }
    }
}
