//! seriallog Core - Shared types for serial line logging
//!
//! This crate provides the domain types shared by the ingestion daemon
//! (seriallogd) and anything that consumes its broadcast stream.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod clock;
pub mod device;
pub mod encoding;
pub mod error;
pub mod framer;
pub mod line;
pub mod message;

// Re-exports for convenience
pub use clock::{ClockOffset, TIMESTAMP_FORMAT};
pub use device::{DeviceDescriptor, FrameFormat, Parity, DEFAULT_BAUD_RATE};
pub use encoding::LogEncoding;
pub use error::{DomainError, DomainResult, FrameError};
pub use framer::{LineFramer, LINE_TERMINATOR, MAX_LINE_LENGTH};
pub use line::{parse_device_timestamp, sanitize_line, DEVICE_TIME_FORMAT, SENTINEL_BYTE};
pub use message::TimestampedMessage;
