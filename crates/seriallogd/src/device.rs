//! Opening device byte streams.
//!
//! Ingestors only need something that yields bytes; [`DeviceOpener`] hides
//! whether that is a real UART or an in-memory pipe in tests.
//!
//! The serial implementation bridges the blocking `serialport` API onto
//! tokio: a blocking task reads the port with a short timeout and forwards
//! bytes into a duplex pipe whose read half is handed to the ingestor.
//! Dropping the returned stream stops the blocking task and releases the port.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use seriallog_core::{DeviceDescriptor, Parity};

/// Byte stream of an opened device.
pub type DeviceStream = Box<dyn AsyncRead + Send + Unpin>;

/// How long a blocking serial read waits before checking for shutdown.
const SERIAL_POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// Capacity of the pipe between the blocking reader and the ingestor.
const BRIDGE_BUFFER: usize = 4096;

/// Errors that can occur while opening a device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Failed to open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Unsupported setting for {path}: {reason}")]
    Unsupported { path: String, reason: String },
}

/// Opens the byte stream for a device descriptor.
#[async_trait]
pub trait DeviceOpener: Send + Sync {
    async fn open(&self, device: &DeviceDescriptor) -> Result<DeviceStream, DeviceError>;
}

/// Opens real serial ports through the `serialport` crate.
#[derive(Debug, Clone, Default)]
pub struct SerialOpener;

impl SerialOpener {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeviceOpener for SerialOpener {
    async fn open(&self, device: &DeviceDescriptor) -> Result<DeviceStream, DeviceError> {
        let builder = port_builder(device)?;
        let path = device.path.clone();

        let port = tokio::task::spawn_blocking(move || builder.open())
            .await
            .map_err(|e| DeviceError::Open {
                path: path.clone(),
                reason: e.to_string(),
            })?
            .map_err(|e| DeviceError::Open {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        debug!(device = %device, "Serial port opened");

        let (reader, writer) = tokio::io::duplex(BRIDGE_BUFFER);
        let stop = CancellationToken::new();
        let handle = Handle::current();
        let stop_reader = stop.clone();
        tokio::task::spawn_blocking(move || pump_serial(port, writer, stop_reader, handle, path));

        Ok(Box::new(SerialStream {
            inner: reader,
            _stop: stop.drop_guard(),
        }))
    }
}

/// Translates a descriptor into serialport settings.
fn port_builder(device: &DeviceDescriptor) -> Result<serialport::SerialPortBuilder, DeviceError> {
    let unsupported = |reason: String| DeviceError::Unsupported {
        path: device.path.clone(),
        reason,
    };

    device
        .frame
        .validate()
        .map_err(|e| unsupported(e.to_string()))?;

    let data_bits = match device.frame.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    };
    let stop_bits = match device.frame.stop_bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    };
    let parity = match device.frame.parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    };

    Ok(serialport::new(device.path.as_str(), device.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .timeout(SERIAL_POLL_TIMEOUT))
}

/// Blocking loop forwarding serial bytes into the async pipe.
///
/// Ends on EOF, on a read error, when the pipe's read half is gone, or when
/// `stop` is cancelled. Dropping `writer` surfaces as EOF to the ingestor.
fn pump_serial(
    mut port: Box<dyn serialport::SerialPort>,
    mut writer: DuplexStream,
    stop: CancellationToken,
    handle: Handle,
    path: String,
) {
    let mut buf = [0u8; 1024];

    while !stop.is_cancelled() {
        match port.read(&mut buf) {
            Ok(0) => {
                debug!(path = %path, "Serial port reported EOF");
                break;
            }
            Ok(n) => {
                let chunk = buf.get(..n).unwrap_or_default();
                if handle.block_on(writer.write_all(chunk)).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                warn!(path = %path, error = %e, "Serial read failed");
                break;
            }
        }
    }

    debug!(path = %path, "Serial reader stopped");
}

/// Read half handed to the ingestor; stops the blocking reader on drop.
struct SerialStream {
    inner: DuplexStream,
    _stop: DropGuard,
}

impl AsyncRead for SerialStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}
