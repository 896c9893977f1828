//! One ingestion cycle for one device.
//!
//! ```text
//! Opening ──open failed──────────────────────────────▶ Terminated
//!    │
//!    ▼ log opened, start marker written
//! Ingesting ──line──▶ stamp ─▶ append ─▶ offer ─┐
//!    │  ▲                                        │
//!    │  └────────────────────────────────────────┘
//!    ▼ delete request / read error / EOF / shutdown
//! Draining ──delete──▶ remove log ───────────────────▶ Terminated
//!          └─other───▶ end marker ───────────────────▶ Terminated
//! ```
//!
//! A delete request wins over a read failure observed at the same time.

use std::fmt;

use futures_util::StreamExt;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use seriallog_core::{parse_device_timestamp, DeviceDescriptor, LineFramer, TimestampedMessage};

use super::IngestContext;
use crate::delete::DeleteListener;
use crate::persist::LogFile;

/// How an ingestion cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A delete request removed the log
    Deleted,
    /// The daemon is shutting down
    Shutdown,
    /// The device could not be opened
    DeviceOpenFailed(String),
    /// The log file could not be opened
    LogOpenFailed(String),
    /// The device stream ended
    SourceClosed,
    /// Reading or framing the device stream failed
    ReadFailed(String),
}

impl CycleOutcome {
    /// Deletes and shutdowns are requested endings; everything else is a failure.
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Deleted | CycleOutcome::Shutdown)
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Deleted => write!(f, "log deleted"),
            CycleOutcome::Shutdown => write!(f, "shutdown"),
            CycleOutcome::DeviceOpenFailed(reason) => write!(f, "device open failed: {reason}"),
            CycleOutcome::LogOpenFailed(reason) => write!(f, "log open failed: {reason}"),
            CycleOutcome::SourceClosed => write!(f, "device closed"),
            CycleOutcome::ReadFailed(reason) => write!(f, "read failed: {reason}"),
        }
    }
}

/// Why the ingesting loop stopped.
#[derive(Debug, PartialEq, Eq)]
enum Drain {
    Delete,
    Shutdown,
    Closed,
    Failed(String),
}

/// Reads one device, persists and publishes its lines.
pub struct SourceIngestor {
    device: DeviceDescriptor,
    ctx: IngestContext,
}

impl SourceIngestor {
    pub fn new(device: DeviceDescriptor, ctx: IngestContext) -> Self {
        Self { device, ctx }
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// Runs Opening through Draining once. Never fails; the outcome says why it ended.
    pub async fn run_cycle(&self, shutdown: &CancellationToken) -> CycleOutcome {
        let index = self.device.index;

        let stream = match self.ctx.opener.open(&self.device).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(index, device = %self.device, error = %e, "Device open failed");
                return CycleOutcome::DeviceOpenFailed(e.to_string());
            }
        };

        // Listen before the log exists so no request for it is missed
        let mut deletes = self.ctx.deletes.listen(index);
        let mut deletes_open = true;

        let mut log = match self.ctx.store.open(index).await {
            Ok(log) => log,
            Err(e) => {
                warn!(index, error = %e, "Log open failed");
                return CycleOutcome::LogOpenFailed(e.to_string());
            }
        };
        if let Err(e) = log.write_start_marker().await {
            warn!(index, error = %e, "Failed to write start marker");
        }

        let mut lines = FramedRead::new(stream, LineFramer::new());

        info!(index, device = %self.device, path = %log.path().display(), "Ingestion started");

        let drain = loop {
            tokio::select! {
                biased;

                requested = deletes.requested(), if deletes_open => {
                    if requested {
                        break Drain::Delete;
                    }
                    deletes_open = false;
                }

                _ = shutdown.cancelled() => break Drain::Shutdown,

                next = lines.next() => match next {
                    Some(Ok(line)) => self.handle_line(&mut log, line).await,
                    Some(Err(e)) => break Drain::Failed(e.to_string()),
                    None => break Drain::Closed,
                },
            }
        };

        let drain = settle(drain, &mut deletes);

        // Release the device before touching the log
        drop(lines);

        match drain {
            Drain::Delete => {
                match log.remove().await {
                    Ok(removed) => info!(index, removed, "Log deleted on request"),
                    Err(e) => warn!(index, error = %e, "Failed to delete log"),
                }
                CycleOutcome::Deleted
            }
            Drain::Shutdown => {
                finish(log, index).await;
                CycleOutcome::Shutdown
            }
            Drain::Closed => {
                finish(log, index).await;
                CycleOutcome::SourceClosed
            }
            Drain::Failed(reason) => {
                warn!(index, error = %reason, "Device read failed");
                finish(log, index).await;
                CycleOutcome::ReadFailed(reason)
            }
        }
    }

    async fn handle_line(&self, log: &mut LogFile, line: String) {
        let index = self.device.index;
        debug!(index, line = %line, "Device line");

        if let Some(device_time) = parse_device_timestamp(&line) {
            let offset = self.ctx.clock.sync_to(device_time);
            info!(
                index,
                device_time = %device_time,
                offset_ms = offset.num_milliseconds(),
                "Clock synced to device"
            );
        }

        let message = TimestampedMessage::stamp(index, &self.ctx.clock, line);

        if let Err(e) = log.append(&message).await {
            warn!(index, error = %e, "Failed to persist line");
        }

        self.ctx.publisher.offer(message.broadcast_text());
    }
}

/// A delete already delivered overrides a read error or EOF.
fn settle(drain: Drain, deletes: &mut DeleteListener) -> Drain {
    match drain {
        Drain::Closed | Drain::Failed(_) if deletes.try_requested() => Drain::Delete,
        other => other,
    }
}

async fn finish(log: LogFile, index: usize) {
    if let Err(e) = log.finish().await {
        warn!(index, error = %e, "Failed to write end marker");
    }
}
