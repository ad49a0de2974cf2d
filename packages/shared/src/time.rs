//! Time-related utilities with clock abstraction for testability.
//!
//! Timestamps travel as Unix milliseconds; display uses Korea Standard Time.

use chrono::{DateTime, FixedOffset, Offset, Utc};

const KST_OFFSET_SECS: i32 = 9 * 3600;

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Current Unix timestamp (milliseconds)
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fixed clock implementation for testing (returns a fixed time)
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    fixed_time: i64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: fixed_time_millis,
        }
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.fixed_time
    }
}

fn kst() -> FixedOffset {
    // 9h is always within the valid ±24h range
    FixedOffset::east_opt(KST_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Convert Unix timestamp (milliseconds) to KST RFC 3339 format.
///
/// Out-of-range timestamps render as `"-"`.
pub fn timestamp_to_kst_rfc3339(timestamp_millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_millis) {
        Some(dt) => dt.with_timezone(&kst()).to_rfc3339(),
        None => "-".to_string(),
    }
}

/// Convert Unix timestamp (milliseconds) to a short KST `HH:MM` label.
pub fn timestamp_to_kst_clock(timestamp_millis: i64) -> String {
    match DateTime::<Utc>::from_timestamp_millis(timestamp_millis) {
        Some(dt) => dt.with_timezone(&kst()).format("%H:%M").to_string(),
        None => "--:--".to_string(),
    }
}
