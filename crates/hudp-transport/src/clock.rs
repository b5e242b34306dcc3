//! # Sequence & Timestamp Sources
//!
//! One [`SequenceGenerator`] per sender instance feeds *both* channels, so a
//! reliable and an unreliable send issued back to back consume adjacent
//! sequence numbers. [`TimestampClock`] stamps packets with wall-clock epoch
//! milliseconds for the receiver's jitter estimate.

use std::time::{SystemTime, UNIX_EPOCH};

// ─── SequenceGenerator ──────────────────────────────────────────────────────

/// Monotonic per-sender sequence counter, starting at 0.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    next: u64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        SequenceGenerator { next: 0 }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> u64 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// The sequence number the next call to [`next`](Self::next) returns.
    pub fn current(&self) -> u64 {
        self.next
    }
}

// ─── TimestampClock ─────────────────────────────────────────────────────────

/// Wall clock for the 8-byte sender timestamp field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampClock;

impl TimestampClock {
    pub fn new() -> Self {
        TimestampClock
    }

    /// Milliseconds since the Unix epoch. A clock set before 1970 reads as 0.
    pub fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
