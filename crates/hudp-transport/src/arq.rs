//! # ARQ — Automatic Repeat reQuest
//!
//! Timeout-driven retransmission on the sender and bounded-wait gap tracking
//! on the receiver.
//!
//! - **Sender**: every reliable packet is tracked until its ACK arrives. A
//!   periodic scan resends anything unacknowledged for longer than the
//!   retransmit timeout and abandons it once the give-up bound is exceeded.
//!   The retry interval is fixed; there is no backoff.
//! - **Receiver**: a hole in the sequence space starts its clock the moment a
//!   later packet reveals it. Once the hole at the delivery cursor has been
//!   awaited past the gap timeout it is skipped for good.

use bytes::Bytes;
use quanta::Instant;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

// ─── Give-Up Policy ─────────────────────────────────────────────────────────

/// Which clock the give-up bound is measured against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GiveUpPolicy {
    /// Elapsed since the original send. A packet gets a bounded number of
    /// retries, then is abandoned.
    #[default]
    SinceFirstSend,
    /// Elapsed since the most recent (re)send. Every retransmit resets the
    /// clock, so abandonment only happens if the scan itself stalls past the
    /// bound.
    SinceLastSend,
}

// ─── Retransmit Tracker (Sender-Side) ───────────────────────────────────────

/// Retransmit timing parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetransmitConfig {
    /// Unacknowledged time before a resend.
    pub timeout: Duration,
    /// Bound after which a packet is abandoned.
    pub give_up: Duration,
    pub policy: GiveUpPolicy,
}

impl Default for RetransmitConfig {
    fn default() -> Self {
        RetransmitConfig {
            timeout: Duration::from_millis(100),
            give_up: Duration::from_millis(200),
            policy: GiveUpPolicy::default(),
        }
    }
}

/// An unacknowledged reliable packet.
#[derive(Debug, Clone)]
pub struct TrackedPacket {
    /// Encoded datagram, resent verbatim.
    pub data: Bytes,
    pub first_sent: Instant,
    /// Time of the most recent (re)send; RTT is measured from here.
    pub last_sent: Instant,
    pub retries: u32,
}

/// Outcome of a retransmit scan for one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetransmitAction {
    Resend {
        sequence: u64,
        data: Bytes,
        retry: u32,
    },
    Abandon {
        sequence: u64,
        retries: u32,
    },
}

/// Store of outstanding reliable packets, keyed by sequence number.
#[derive(Debug, Default)]
pub struct RetransmitTracker {
    tracked: BTreeMap<u64, TrackedPacket>,
    config: RetransmitConfig,
}

impl RetransmitTracker {
    pub fn new(config: RetransmitConfig) -> Self {
        RetransmitTracker {
            tracked: BTreeMap::new(),
            config,
        }
    }

    /// Start tracking a freshly sent packet with zero retries.
    pub fn track(&mut self, sequence: u64, data: Bytes, now: Instant) {
        self.tracked.insert(
            sequence,
            TrackedPacket {
                data,
                first_sent: now,
                last_sent: now,
                retries: 0,
            },
        );
    }

    /// Release a packet on ACK. Returns the RTT measured from the most recent
    /// send, or `None` if the sequence is not tracked.
    pub fn acknowledge(&mut self, sequence: u64, now: Instant) -> Option<Duration> {
        let entry = self.tracked.remove(&sequence)?;
        Some(now.duration_since(entry.last_sent))
    }

    /// Scan every tracked packet once.
    pub fn poll(&mut self, now: Instant) -> Vec<RetransmitAction> {
        let config = self.config;
        let mut actions = Vec::new();

        self.tracked.retain(|&sequence, entry| {
            let since_last = now.duration_since(entry.last_sent);
            if since_last <= config.timeout {
                return true;
            }

            let elapsed = match config.policy {
                GiveUpPolicy::SinceFirstSend => now.duration_since(entry.first_sent),
                GiveUpPolicy::SinceLastSend => since_last,
            };

            if elapsed > config.give_up {
                actions.push(RetransmitAction::Abandon {
                    sequence,
                    retries: entry.retries,
                });
                return false;
            }

            entry.last_sent = now;
            entry.retries += 1;
            actions.push(RetransmitAction::Resend {
                sequence,
                data: entry.data.clone(),
                retry: entry.retries,
            });
            true
        });

        actions
    }

    pub fn get(&self, sequence: u64) -> Option<&TrackedPacket> {
        self.tracked.get(&sequence)
    }

    pub fn retry_count(&self, sequence: u64) -> Option<u32> {
        self.tracked.get(&sequence).map(|e| e.retries)
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.tracked.contains_key(&sequence)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    pub fn config(&self) -> &RetransmitConfig {
        &self.config
    }
}

// ─── Gap Tracker (Receiver-Side) ────────────────────────────────────────────

/// Missing reliable sequence numbers and when each started being awaited.
///
/// Holes revealed by the same arrival share a reveal time, so they are kept
/// as one half-open range `start..end`. Memory grows with the number of
/// distinct ranges, not with the width of the sequence space they cover.
#[derive(Debug)]
pub struct GapTracker {
    /// `start -> (end, revealed_at)`; ranges never overlap.
    ranges: BTreeMap<u64, (u64, Instant)>,
    waiting: u64,
    timeout: Duration,
}

impl GapTracker {
    pub fn new(timeout: Duration) -> Self {
        GapTracker {
            ranges: BTreeMap::new(),
            waiting: 0,
            timeout,
        }
    }

    /// Start awaiting every sequence in `start..end` from `now`. Sequences
    /// already awaited keep their original reveal time. Returns how many new
    /// waits were opened.
    pub fn open_range(&mut self, start: u64, end: u64, now: Instant) -> u64 {
        let mut opened = 0;
        let mut cursor = start;
        while cursor < end {
            if let Some(existing_end) = self.range_containing(cursor).map(|(_, e, _)| e) {
                cursor = existing_end;
                continue;
            }
            let next_start = self
                .ranges
                .range(cursor..end)
                .next()
                .map_or(end, |(&s, _)| s);
            self.ranges.insert(cursor, (next_start, now));
            opened += next_start - cursor;
            cursor = next_start;
        }
        self.waiting += opened;
        opened
    }

    /// Start awaiting a single `sequence` unless it already is. Returns
    /// `true` if a new wait was opened.
    pub fn open(&mut self, sequence: u64, now: Instant) -> bool {
        self.open_range(sequence, sequence.saturating_add(1), now) == 1
    }

    /// Stop awaiting `sequence` (it arrived, or was resolved). The range it
    /// sat in is split around it.
    pub fn close(&mut self, sequence: u64) -> bool {
        let Some((start, end, revealed_at)) = self.range_containing(sequence) else {
            return false;
        };
        self.ranges.remove(&start);
        if start < sequence {
            self.ranges.insert(start, (sequence, revealed_at));
        }
        if sequence + 1 < end {
            self.ranges.insert(sequence + 1, (end, revealed_at));
        }
        self.waiting -= 1;
        true
    }

    pub fn is_waiting(&self, sequence: u64) -> bool {
        self.range_containing(sequence).is_some()
    }

    pub fn started_at(&self, sequence: u64) -> Option<Instant> {
        self.range_containing(sequence).map(|(_, _, at)| at)
    }

    /// Whether `sequence` is awaited and its wait exceeds the gap timeout.
    pub fn is_expired(&self, sequence: u64, now: Instant) -> bool {
        self.started_at(sequence)
            .is_some_and(|start| now.duration_since(start) > self.timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of awaited sequence numbers.
    pub fn len(&self) -> u64 {
        self.waiting
    }

    /// Number of stored ranges.
    pub fn ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting == 0
    }

    fn range_containing(&self, sequence: u64) -> Option<(u64, u64, Instant)> {
        self.ranges
            .range(..=sequence)
            .next_back()
            .filter(|(_, (end, _))| sequence < *end)
            .map(|(&start, &(end, at))| (start, end, at))
    }
}

impl Default for GapTracker {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn tracker(policy: GiveUpPolicy) -> RetransmitTracker {
        RetransmitTracker::new(RetransmitConfig {
            timeout: ms(100),
            give_up: ms(200),
            policy,
        })
    }

    // ─── Retransmit Tracker Tests ───────────────────────────────────────

    #[test]
    fn nothing_due_before_timeout() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceFirstSend);
        rt.track(0, Bytes::from_static(b"a"), t0);

        assert!(rt.poll(t0 + ms(50)).is_empty());
        assert!(rt.poll(t0 + ms(100)).is_empty(), "timeout is strict");
        assert_eq!(rt.retry_count(0), Some(0));
    }

    #[test]
    fn resend_after_timeout_resets_clock() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceFirstSend);
        rt.track(3, Bytes::from_static(b"abc"), t0);

        let actions = rt.poll(t0 + ms(150));
        assert_eq!(
            actions,
            vec![RetransmitAction::Resend {
                sequence: 3,
                data: Bytes::from_static(b"abc"),
                retry: 1
            }]
        );
        assert_eq!(rt.retry_count(3), Some(1));

        // 50ms after the resend: not due again yet.
        assert!(rt.poll(t0 + ms(200)).is_empty());
    }

    #[test]
    fn cumulative_policy_abandons_after_bound() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceFirstSend);
        rt.track(1, Bytes::from_static(b"x"), t0);

        // Scan on a 50ms period.
        let mut resent = 0;
        let mut abandoned = None;
        for tick in 1..=8 {
            for action in rt.poll(t0 + ms(50 * tick)) {
                match action {
                    RetransmitAction::Resend { .. } => resent += 1,
                    RetransmitAction::Abandon { retries, .. } => abandoned = Some(retries),
                }
            }
        }

        assert_eq!(resent, 1);
        assert_eq!(abandoned, Some(1));
        assert!(rt.is_empty());
    }

    #[test]
    fn literal_policy_keeps_retrying_on_a_healthy_scan() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceLastSend);
        rt.track(1, Bytes::from_static(b"x"), t0);

        for tick in 1..=40 {
            for action in rt.poll(t0 + ms(50 * tick)) {
                assert!(matches!(action, RetransmitAction::Resend { .. }));
            }
        }
        assert!(rt.contains(1));
        assert!(rt.retry_count(1).unwrap() >= 10);
    }

    #[test]
    fn literal_policy_abandons_when_scan_stalls() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceLastSend);
        rt.track(9, Bytes::from_static(b"x"), t0);

        let actions = rt.poll(t0 + ms(250));
        assert_eq!(
            actions,
            vec![RetransmitAction::Abandon {
                sequence: 9,
                retries: 0
            }]
        );
        assert!(rt.is_empty());
    }

    #[test]
    fn acknowledge_returns_rtt_from_last_send() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceFirstSend);
        rt.track(0, Bytes::from_static(b"a"), t0);
        rt.poll(t0 + ms(120));

        let rtt = rt.acknowledge(0, t0 + ms(130)).unwrap();
        assert_eq!(rtt, ms(10));
        assert!(rt.is_empty());
    }

    #[test]
    fn acknowledge_unknown_is_none() {
        let mut rt = tracker(GiveUpPolicy::SinceFirstSend);
        assert!(rt.acknowledge(77, Instant::now()).is_none());
    }

    #[test]
    fn scan_order_is_ascending() {
        let t0 = Instant::now();
        let mut rt = tracker(GiveUpPolicy::SinceFirstSend);
        for seq in [5u64, 1, 3] {
            rt.track(seq, Bytes::new(), t0);
        }
        let seqs: Vec<u64> = rt
            .poll(t0 + ms(150))
            .into_iter()
            .map(|a| match a {
                RetransmitAction::Resend { sequence, .. } => sequence,
                RetransmitAction::Abandon { sequence, .. } => sequence,
            })
            .collect();
        assert_eq!(seqs, vec![1, 3, 5]);
    }

    // ─── Gap Tracker Tests ──────────────────────────────────────────────

    #[test]
    fn gap_open_is_idempotent() {
        let t0 = Instant::now();
        let mut gaps = GapTracker::new(ms(200));
        assert!(gaps.open(4, t0));
        assert!(!gaps.open(4, t0 + ms(50)));
        assert_eq!(gaps.started_at(4), Some(t0));
    }

    #[test]
    fn gap_expires_strictly_after_timeout() {
        let t0 = Instant::now();
        let mut gaps = GapTracker::new(ms(200));
        gaps.open(2, t0);

        assert!(!gaps.is_expired(2, t0 + ms(200)));
        assert!(gaps.is_expired(2, t0 + ms(201)));
        assert!(!gaps.is_expired(3, t0 + ms(500)), "unknown seq never expires");
    }

    #[test]
    fn gap_close() {
        let mut gaps = GapTracker::default();
        gaps.open(1, Instant::now());
        assert!(gaps.close(1));
        assert!(!gaps.close(1));
        assert!(gaps.is_empty());
    }

    #[test]
    fn wide_range_is_one_entry() {
        let t0 = Instant::now();
        let mut gaps = GapTracker::default();
        assert_eq!(gaps.open_range(0, 1_000_000, t0), 1_000_000);
        assert_eq!(gaps.len(), 1_000_000);
        assert_eq!(gaps.ranges(), 1);
        assert!(gaps.is_waiting(999_999));
        assert!(!gaps.is_waiting(1_000_000));
    }

    #[test]
    fn close_splits_range_and_keeps_reveal_time() {
        let t0 = Instant::now();
        let mut gaps = GapTracker::default();
        gaps.open_range(10, 20, t0);

        assert!(gaps.close(15));
        assert!(gaps.close(10));
        assert!(gaps.close(19));
        assert_eq!(gaps.len(), 7);
        assert_eq!(gaps.ranges(), 2);
        assert!(!gaps.is_waiting(15));
        assert_eq!(gaps.started_at(11), Some(t0));
        assert_eq!(gaps.started_at(18), Some(t0));
    }

    #[test]
    fn overlapping_open_keeps_earlier_waits() {
        let t0 = Instant::now();
        let mut gaps = GapTracker::default();
        gaps.open_range(4, 6, t0);
        gaps.open_range(8, 9, t0);

        assert_eq!(gaps.open_range(0, 10, t0 + ms(30)), 7);
        assert_eq!(gaps.len(), 10);
        assert_eq!(gaps.started_at(5), Some(t0));
        assert_eq!(gaps.started_at(8), Some(t0));
        assert_eq!(gaps.started_at(0), Some(t0 + ms(30)));
        assert_eq!(gaps.started_at(7), Some(t0 + ms(30)));
        assert_eq!(gaps.started_at(9), Some(t0 + ms(30)));
    }
}
