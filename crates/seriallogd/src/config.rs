//! Daemon configuration.
//!
//! Read from an optional TOML file; every field has a default, so an empty
//! file (or no file) is valid apart from needing at least one port, which
//! is checked when the daemon starts rather than here.
//!
//! ```toml
//! bind = "0.0.0.0:9669"
//! log_dir = "/var/log/serial"
//! log_encoding = "latin-1"
//! ports = ["/dev/ttyUSB0", "/dev/ttyUSB1"]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use seriallog_core::{DeviceDescriptor, LogEncoding, DEFAULT_BAUD_RATE};

use crate::hub::{MAILBOX_CAPACITY, PUBLISH_QUEUE, SEND_TIMEOUT};
use crate::ingest::RESTART_DELAY;
use crate::persist::LogStore;

/// Default HTTP listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:9669";

/// Devices served at most; extra ports are ignored.
pub const MAX_ACTIVE_DEVICES: usize = 3;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Everything the daemon needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// HTTP/WebSocket listen address
    pub bind: SocketAddr,
    /// Directory holding the per-device logs
    pub log_dir: PathBuf,
    pub log_prefix: String,
    pub log_extension: String,
    pub log_encoding: LogEncoding,
    pub baud_rate: u32,
    /// Serial device paths; the position in this list is the device index
    pub ports: Vec<String>,
    pub max_devices: usize,
    pub restart_delay_secs: u64,
    pub send_timeout_secs: u64,
    pub mailbox_capacity: usize,
    pub publish_queue: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 9669)),
            log_dir: PathBuf::from("."),
            log_prefix: "differentmind".to_string(),
            log_extension: "txt".to_string(),
            log_encoding: LogEncoding::default(),
            baud_rate: DEFAULT_BAUD_RATE,
            ports: Vec::new(),
            max_devices: MAX_ACTIVE_DEVICES,
            restart_delay_secs: RESTART_DELAY.as_secs(),
            send_timeout_secs: SEND_TIMEOUT.as_secs(),
            mailbox_capacity: MAILBOX_CAPACITY,
            publish_queue: PUBLISH_QUEUE,
        }
    }
}

impl DaemonConfig {
    /// Loads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::Invalid(
                "mailbox_capacity must be at least 1".to_string(),
            ));
        }
        if self.publish_queue == 0 {
            return Err(ConfigError::Invalid(
                "publish_queue must be at least 1".to_string(),
            ));
        }
        if self.log_prefix.is_empty() {
            return Err(ConfigError::Invalid("log_prefix must not be empty".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Device descriptors for the configured ports, capped at `max_devices`.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        if self.ports.len() > self.max_devices {
            warn!(
                configured = self.ports.len(),
                max = self.max_devices,
                ignored = ?self.ports.get(self.max_devices..).unwrap_or_default(),
                "Too many ports configured, ignoring the rest"
            );
        }

        self.ports
            .iter()
            .take(self.max_devices)
            .enumerate()
            .map(|(index, path)| DeviceDescriptor::new(index, path).with_baud_rate(self.baud_rate))
            .collect()
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn log_store(&self) -> LogStore {
        LogStore::new(
            &self.log_dir,
            &self.log_prefix,
            &self.log_extension,
            self.log_encoding,
        )
    }
}
