//! Line sanitization and device timestamp recognition.
//!
//! Byte-level rules applied to every framed chunk, in order:
//! 1. a single leading [`SENTINEL_BYTE`] (`0x00`) is dropped
//! 2. every carriage return and line feed is removed
//! 3. the rest is decoded as UTF-8, replacing invalid sequences
//! 4. a chunk that is empty after the above is discarded

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Leading byte some firmwares emit after a reset.
pub const SENTINEL_BYTE: u8 = 0x00;

/// Comment marker stripped before looking for a device timestamp.
pub const COMMENT_PREFIX: &str = "# ";

/// Layout of a timestamp line printed by a device.
pub const DEVICE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Cleans one framed chunk. Returns `None` for lines that are empty once cleaned.
pub fn sanitize_line(raw: &[u8]) -> Option<String> {
    let raw = match raw.split_first() {
        Some((&SENTINEL_BYTE, rest)) => rest,
        _ => raw,
    };

    let cleaned: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| *b != b'\r' && *b != b'\n')
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Some(String::from_utf8_lossy(&cleaned).into_owned())
}

/// Recognises a device clock line such as `# 2023-06-01 10:00:00`.
///
/// Every `"# "` occurrence is removed before matching, and the whole
/// remaining line must be the timestamp. The device time is taken to be
/// in the local time zone.
pub fn parse_device_timestamp(line: &str) -> Option<DateTime<Local>> {
    let candidate = line.replace(COMMENT_PREFIX, "");
    let naive = NaiveDateTime::parse_from_str(candidate.trim(), DEVICE_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}
