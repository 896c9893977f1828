//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },

    /// Parse error for incoming data
    #[error("Failed to parse {field}: {reason}")]
    ParseError { field: String, reason: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Errors produced while framing a device byte stream into lines.
///
/// Both variants are terminal for the current ingestion cycle.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The underlying device read failed
    #[error("Device read failed: {0}")]
    Io(#[from] std::io::Error),

    /// A chunk grew past the line ceiling without a terminator
    #[error("Line exceeds {max} bytes without a terminator")]
    LineTooLong { max: usize },
}
