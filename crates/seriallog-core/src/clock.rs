//! Process-wide clock correction shared by all ingestors.
//!
//! Devices occasionally print their own notion of the current time. When an
//! ingestor recognises such a line it overwrites the offset so that every
//! subsequent timestamp, from any device, approximates the device clock.
//!
//! # Consistency
//!
//! The offset is a single atomically replaced value. Writers do not
//! coordinate: the last `write` wins regardless of which device issued it,
//! and readers may observe a slightly stale value. Timestamps are human log
//! annotations, so this is the whole contract.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Local};

/// Format of every timestamp written to logs and broadcast messages.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Shared, atomically replaceable offset applied to the wall clock.
///
/// Cloning yields another handle to the same value.
#[derive(Debug, Clone, Default)]
pub struct ClockOffset {
    millis: Arc<AtomicI64>,
}

impl ClockOffset {
    /// Creates an offset of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current offset.
    pub fn read(&self) -> Duration {
        Duration::milliseconds(self.millis.load(Ordering::Relaxed))
    }

    /// Replaces the offset. Last writer wins.
    pub fn write(&self, offset: Duration) {
        self.millis
            .store(offset.num_milliseconds(), Ordering::Relaxed);
    }

    /// Wall clock plus offset.
    ///
    /// An offset that would overflow the representable range is ignored.
    pub fn now(&self) -> DateTime<Local> {
        let wall = Local::now();
        wall.checked_add_signed(self.read()).unwrap_or(wall)
    }

    /// `now()` rendered with [`TIMESTAMP_FORMAT`].
    pub fn timestamp(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }

    /// Sets the offset so that `now()` tracks `device_time`.
    ///
    /// Returns the offset that was written (`device_time - wall clock`).
    pub fn sync_to(&self, device_time: DateTime<Local>) -> Duration {
        let offset = device_time.signed_duration_since(Local::now());
        self.write(offset);
        offset
    }
}
