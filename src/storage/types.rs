//! Core data types for the storage layer.
//!
//! - [`LogRecord`]: One line captured from one device, stored in the `log` table
//! - [`LogQuery`]: Time window and optional device filter for range scans

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single captured line stored in the `log` table.
///
/// Records are append-only: once written they are never updated or deleted.
///
/// # Example
///
/// ```
/// use seriallog::LogRecord;
///
/// let record = LogRecord::now("/dev/ttyUSB0", "boot ok");
/// assert_eq!(record.device, "/dev/ttyUSB0");
/// assert_eq!(record.message, "boot ok");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LogRecord {
    /// Capture time in milliseconds since the Unix epoch.
    pub ts: i64,
    /// Originating device identifier (port path or name).
    pub device: String,
    /// Raw line content without the line terminator.
    #[sqlx(rename = "msg")]
    #[serde(rename = "msg")]
    pub message: String,
}

impl LogRecord {
    /// Create a record with an explicit timestamp.
    pub fn new(ts: i64, device: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts,
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a record stamped with the current wall-clock time.
    pub fn now(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Utc::now().timestamp_millis(), device, message)
    }

    /// Capture time as a UTC datetime, if representable.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.ts)
    }
}

/// Range query over the `log` table.
///
/// Matches records with `since <= ts < until`, optionally restricted to one
/// device. Results are always returned newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    /// Inclusive lower bound (Unix millis).
    pub since: i64,
    /// Exclusive upper bound (Unix millis).
    pub until: i64,
    /// Restrict results to this device.
    pub device: Option<String>,
}

impl LogQuery {
    /// Query all devices in `[since, until)` (Unix millis).
    pub fn new(since: i64, until: i64) -> Self {
        Self {
            since,
            until,
            device: None,
        }
    }

    /// Query all devices between two datetimes.
    pub fn from_datetimes(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self::new(since.timestamp_millis(), until.timestamp_millis())
    }

    /// Query the window ending at `until` and reaching `window` into the past.
    ///
    /// A window longer than the representable range saturates at the earliest
    /// timestamp instead of failing.
    pub fn window_before(until: DateTime<Utc>, window: Duration) -> Self {
        let until = until.timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        Self::new(until.saturating_sub(window_ms), until)
    }

    /// Query the window ending now and reaching `window` into the past.
    ///
    /// The upper bound is one millisecond past now so lines captured in the
    /// current millisecond are included.
    pub fn last(window: Duration) -> Self {
        let now = Utc::now().timestamp_millis();
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        Self::new(now.saturating_sub(window_ms), now.saturating_add(1))
    }

    /// Restrict the query to a single device.
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }
}
