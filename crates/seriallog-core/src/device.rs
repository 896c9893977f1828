//! Device descriptors: which serial port an ingestor owns and how to open it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Baud rate used when none is configured.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Parity setting of a serial frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Character framing of a serial line (data bits, parity, stop bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFormat {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl FrameFormat {
    /// 8 data bits, no parity, one stop bit.
    pub const EIGHT_N_ONE: Self = Self {
        data_bits: 8,
        parity: Parity::None,
        stop_bits: 1,
    };

    /// Checks that the format is one a UART can actually be configured with.
    pub fn validate(&self) -> DomainResult<()> {
        if !(5..=8).contains(&self.data_bits) {
            return Err(DomainError::InvalidFieldValue {
                field: "data_bits".to_string(),
                value: self.data_bits.to_string(),
                expected: "5..=8".to_string(),
            });
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(DomainError::InvalidFieldValue {
                field: "stop_bits".to_string(),
                value: self.stop_bits.to_string(),
                expected: "1 or 2".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::EIGHT_N_ONE
    }
}

impl fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(f, "{}{}{}", self.data_bits, parity, self.stop_bits)
    }
}

/// One configured device.
///
/// The index is stable for the process lifetime and keys both the
/// persisted log file and the `{index}` prefix of broadcast messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub index: usize,
    pub path: String,
    pub baud_rate: u32,
    #[serde(default)]
    pub frame: FrameFormat,
}

impl DeviceDescriptor {
    /// Creates a descriptor with the default 9600 8N1 parameters.
    pub fn new(index: usize, path: impl Into<String>) -> Self {
        Self {
            index,
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            frame: FrameFormat::EIGHT_N_ONE,
        }
    }

    /// Overrides the baud rate.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} @ {} {}",
            self.index, self.path, self.baud_rate, self.frame
        )
    }
}
