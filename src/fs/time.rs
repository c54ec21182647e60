//! On-disk timestamps.
//!
//! A timestamp is 32 bits of UTC seconds since 2000-01-01 00:00:00. The
//! width matches the inode layout; formatting happens only on display.

use chrono::{DateTime, Utc};

/// 2000-01-01 00:00:00 UTC as a Unix timestamp.
const EPOCH_2000: i64 = 946_684_800;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Timestamp(pub u32);

impl Timestamp {
    /// The not-yet-built sentinel the allocator leaves behind.
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        let secs = Utc::now().timestamp() - EPOCH_2000;
        Timestamp(secs.max(0) as u32)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match DateTime::<Utc>::from_timestamp(EPOCH_2000 + self.0 as i64, 0) {
            Some(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "(invalid time)"),
        }
    }
}
