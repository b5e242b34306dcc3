//! # Reliable Receiver State Machine
//!
//! Pure logic — no I/O. Accepts decoded reliable-channel packets, produces
//! the ACK to send back, reorders out-of-sequence arrivals, and hands
//! payloads to the application strictly in sequence order.
//!
//! ## Responsibilities
//!
//! 1. **Acknowledgment**: every arrival is ACKed, duplicates included
//! 2. **Reordering Buffer**: hold packets that arrive ahead of the cursor
//! 3. **Gap Tracking**: a hole starts its clock when a later arrival reveals it
//! 4. **Gap Skipping**: a hole at the cursor awaited past the gap timeout is
//!    abandoned for good; a late copy is then a stale duplicate
//! 5. **Jitter**: RFC 3550 estimate over reliable arrivals
//!
//! The delivery cursor never decreases and moves by exactly one per delivery
//! or skip.

use quanta::Instant;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::arq::GapTracker;
use crate::jitter::JitterEstimator;
use crate::stats::{ReceiverStats, TransportEvent};
use crate::wire::{AckRecord, ChannelType, Packet};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Receiver configuration parameters.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// How long a hole at the cursor is awaited before it is skipped.
    pub gap_timeout: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            gap_timeout: Duration::from_millis(200),
        }
    }
}

// ─── Delivered Packet ───────────────────────────────────────────────────────

/// A payload handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    pub sequence: u64,
    pub payload: String,
}

/// What the receiver did with an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Stored in the reorder buffer.
    Buffered,
    /// Below the cursor or already buffered; discarded.
    Duplicate,
}

// ─── Receiver ───────────────────────────────────────────────────────────────

/// Server-side reliable-channel state.
pub struct ReliableReceiver {
    config: ReceiverConfig,
    reorder_buf: BTreeMap<u64, String>,
    gaps: GapTracker,
    next_expected: u64,
    /// One past the highest sequence seen; everything at or above it is
    /// not yet known to be missing.
    revealed: u64,
    jitter: JitterEstimator,
    /// Origin of the local arrival timeline (first arrival).
    epoch: Option<Instant>,
    stats: ReceiverStats,
    events: Vec<TransportEvent>,
}

impl ReliableReceiver {
    pub fn new(config: ReceiverConfig) -> Self {
        let gaps = GapTracker::new(config.gap_timeout);
        ReliableReceiver {
            config,
            reorder_buf: BTreeMap::new(),
            gaps,
            next_expected: 0,
            revealed: 0,
            jitter: JitterEstimator::new(),
            epoch: None,
            stats: ReceiverStats::default(),
            events: Vec::new(),
        }
    }

    /// Convenience wrapper over [`on_packet`](Self::on_packet) for a decoded
    /// packet. Non-reliable packets are ignored and produce no ACK.
    pub fn receive_packet(&mut self, pkt: Packet, now: Instant) -> Option<(AckRecord, Arrival)> {
        if pkt.header.channel != ChannelType::Reliable {
            return None;
        }
        Some(self.on_packet(
            pkt.header.sequence,
            pkt.header.timestamp_ms,
            pkt.payload,
            now,
        ))
    }

    /// Process one reliable arrival. The returned ACK must be sent to the
    /// packet's source regardless of the [`Arrival`] outcome.
    pub fn on_packet(
        &mut self,
        sequence: u64,
        timestamp_ms: u64,
        payload: String,
        now: Instant,
    ) -> (AckRecord, Arrival) {
        self.stats.packets_received += 1;
        self.stats.bytes_received += payload.len() as u64;
        self.events.push(TransportEvent::PacketReceived {
            channel: ChannelType::Reliable,
            sequence,
            bytes: payload.len(),
        });
        self.update_jitter(timestamp_ms, now);

        let ack = AckRecord::new(sequence);

        if sequence < self.next_expected || self.reorder_buf.contains_key(&sequence) {
            self.stats.duplicates += 1;
            debug!(seq = sequence, "duplicate, ignoring");
            return (ack, Arrival::Duplicate);
        }

        self.reorder_buf.insert(sequence, payload);
        self.gaps.close(sequence);

        // Holes between the cursor and the previous high-water mark are
        // already awaited; only the newly revealed stretch opens a wait.
        let reveal_from = self.revealed.max(self.next_expected);
        if sequence > reveal_from {
            let opened = self.gaps.open_range(reveal_from, sequence, now);
            debug!(from = reveal_from, to = sequence, opened, "gap opened");
        }
        self.revealed = self.revealed.max(sequence.saturating_add(1));

        debug!(seq = sequence, "received reliable packet");
        (ack, Arrival::Buffered)
    }

    /// Non-blocking poll for the next in-order payload.
    pub fn receive(&mut self) -> Option<Delivered> {
        let sequence = self.next_expected;
        let payload = self.reorder_buf.remove(&sequence)?;

        self.next_expected += 1;
        self.gaps.close(sequence);
        self.stats.packets_delivered += 1;
        self.events.push(TransportEvent::PacketDelivered {
            channel: ChannelType::Reliable,
            sequence,
        });

        Some(Delivered { sequence, payload })
    }

    /// Gap-skip check, run on a short fixed period.
    ///
    /// If the sequence at the cursor has been awaited past the gap timeout it
    /// is given up on and the cursor advances by one. Returns the skipped
    /// sequence number.
    pub fn poll_gaps(&mut self, now: Instant) -> Option<u64> {
        let sequence = self.next_expected;
        if !self.gaps.is_expired(sequence, now) {
            return None;
        }

        self.gaps.close(sequence);
        self.next_expected += 1;
        self.stats.packets_skipped += 1;
        self.events.push(TransportEvent::PacketSkipped { sequence });
        warn!(seq = sequence, "timeout waiting for packet, skipping");
        Some(sequence)
    }

    /// Count a datagram that failed to decode. It is dropped without an ACK.
    pub fn record_malformed(&mut self, len: usize) {
        self.stats.malformed += 1;
        self.events.push(TransportEvent::MalformedDatagram { len });
        debug!(len, "malformed datagram, dropping");
    }

    /// Drain buffered events for the metrics layer.
    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.events.drain(..)
    }

    /// The delivery cursor.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Packets held ahead of (or at) the cursor.
    pub fn buffered(&self) -> usize {
        self.reorder_buf.len()
    }

    pub fn is_buffered(&self, sequence: u64) -> bool {
        self.reorder_buf.contains_key(&sequence)
    }

    pub fn is_awaiting(&self, sequence: u64) -> bool {
        self.gaps.is_waiting(sequence)
    }

    pub fn gap_started_at(&self, sequence: u64) -> Option<Instant> {
        self.gaps.started_at(sequence)
    }

    /// Number of sequence numbers currently awaited.
    pub fn open_gaps(&self) -> u64 {
        self.gaps.len()
    }

    pub fn jitter_ms(&self) -> f64 {
        self.jitter.jitter_ms()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    // ─── Internal Helpers ────────────────────────────────────────────────

    fn update_jitter(&mut self, timestamp_ms: u64, now: Instant) {
        let epoch = *self.epoch.get_or_insert(now);
        let arrival_ms = now.duration_since(epoch).as_secs_f64() * 1000.0;
        if let Some(jitter_ms) = self.jitter.update(arrival_ms, timestamp_ms) {
            self.stats.jitter_ms = jitter_ms;
            self.events.push(TransportEvent::JitterUpdated { jitter_ms });
        }
    }
}

impl Default for ReliableReceiver {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::PacketHeader;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn arrive(rx: &mut ReliableReceiver, seq: u64, now: Instant) -> Arrival {
        let (ack, arrival) = rx.on_packet(seq, 1_000 + seq, format!("p{seq}"), now);
        assert_eq!(ack.sequence, seq, "every arrival is acknowledged");
        arrival
    }

    fn drain(rx: &mut ReliableReceiver) -> Vec<u64> {
        std::iter::from_fn(|| rx.receive()).map(|d| d.sequence).collect()
    }

    // ─── In-Order Delivery ──────────────────────────────────────────────

    #[test]
    fn in_order_delivery() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        for seq in 0..5 {
            assert_eq!(arrive(&mut rx, seq, t0), Arrival::Buffered);
        }
        let d = rx.receive().unwrap();
        assert_eq!(d, Delivered { sequence: 0, payload: "p0".into() });
        assert_eq!(drain(&mut rx), vec![1, 2, 3, 4]);
        assert_eq!(rx.next_expected(), 5);
        assert_eq!(rx.open_gaps(), 0);
    }

    #[test]
    fn receive_is_non_blocking_when_empty() {
        let mut rx = ReliableReceiver::default();
        assert!(rx.receive().is_none());
        assert_eq!(rx.next_expected(), 0);
    }

    #[test]
    fn reordered_arrivals_deliver_in_sequence() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        for seq in [3, 1, 4, 0, 2] {
            arrive(&mut rx, seq, t0);
        }
        assert_eq!(drain(&mut rx), vec![0, 1, 2, 3, 4]);
    }

    // ─── Duplicates ─────────────────────────────────────────────────────

    #[test]
    fn duplicates_are_acked_and_discarded() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 0, t0);
        assert_eq!(arrive(&mut rx, 0, t0), Arrival::Duplicate, "already buffered");
        rx.receive();
        assert_eq!(arrive(&mut rx, 0, t0), Arrival::Duplicate, "below cursor");

        assert_eq!(rx.stats().duplicates, 2);
        assert_eq!(rx.stats().packets_received, 3);
        assert!(rx.receive().is_none());
    }

    // ─── Gap Tracking ───────────────────────────────────────────────────

    #[test]
    fn later_arrival_opens_gaps_at_reveal_time() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 0, t0);
        arrive(&mut rx, 3, t0 + ms(40));

        assert!(!rx.is_awaiting(0), "buffered seqs are not holes");
        assert_eq!(rx.gap_started_at(1), Some(t0 + ms(40)));
        assert_eq!(rx.gap_started_at(2), Some(t0 + ms(40)));

        // A further arrival does not restart existing waits.
        arrive(&mut rx, 5, t0 + ms(90));
        assert_eq!(rx.gap_started_at(1), Some(t0 + ms(40)));
        assert_eq!(rx.gap_started_at(4), Some(t0 + ms(90)));
    }

    #[test]
    fn filled_gap_is_cleared() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 2, t0);
        assert!(rx.is_awaiting(1));
        arrive(&mut rx, 1, t0 + ms(10));
        assert!(!rx.is_awaiting(1));
        assert!(rx.is_awaiting(0));
    }

    #[test]
    fn no_skip_before_gap_timeout() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 1, t0);
        assert_eq!(rx.poll_gaps(t0 + ms(100)), None);
        assert_eq!(rx.poll_gaps(t0 + ms(200)), None);
        assert_eq!(rx.next_expected(), 0);
        assert_eq!(rx.poll_gaps(t0 + ms(201)), Some(0));
        assert_eq!(rx.next_expected(), 1);
    }

    #[test]
    fn skip_advances_one_per_poll() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 3, t0);

        let later = t0 + ms(300);
        assert_eq!(rx.poll_gaps(later), Some(0));
        assert_eq!(rx.poll_gaps(later), Some(1));
        assert_eq!(rx.poll_gaps(later), Some(2));
        assert_eq!(rx.poll_gaps(later), None, "3 is buffered, not a hole");
        assert_eq!(drain(&mut rx), vec![3]);
        assert_eq!(rx.stats().packets_skipped, 3);
    }

    #[test]
    fn skip_requires_hole_at_cursor() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 0, t0);
        arrive(&mut rx, 2, t0);
        // Cursor still at 0 (buffered, not yet pulled): nothing to skip.
        assert_eq!(rx.poll_gaps(t0 + ms(500)), None);
        assert_eq!(rx.receive().map(|d| d.sequence), Some(0));
        assert_eq!(rx.poll_gaps(t0 + ms(500)), Some(1));
        assert_eq!(rx.receive().map(|d| d.sequence), Some(2));
    }

    #[test]
    fn dropped_packet_scenario() {
        // Sends 0..4, packet 2 lost, then arrives late after the skip.
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        for seq in [0, 1, 3, 4] {
            arrive(&mut rx, seq, t0);
        }

        assert_eq!(drain(&mut rx), vec![0, 1]);
        assert_eq!(rx.poll_gaps(t0 + ms(250)), Some(2));
        assert_eq!(drain(&mut rx), vec![3, 4]);

        assert_eq!(arrive(&mut rx, 2, t0 + ms(260)), Arrival::Duplicate);
        assert!(rx.receive().is_none());
        assert_eq!(rx.next_expected(), 5);
    }

    #[test]
    fn far_ahead_arrival_is_buffered_and_reached_by_skipping() {
        // 70 000 unreliable sends consumed the shared counter before this
        // reliable packet went out.
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        assert_eq!(arrive(&mut rx, 70_000, t0), Arrival::Buffered);
        assert_eq!(rx.open_gaps(), 70_000);
        assert_eq!(rx.gap_started_at(0), Some(t0));
        assert_eq!(rx.gap_started_at(69_999), Some(t0));

        let mut now = t0 + ms(201);
        let mut skipped = 0;
        while rx.poll_gaps(now).is_some() {
            skipped += 1;
            now += ms(10);
        }
        assert_eq!(skipped, 70_000);
        assert_eq!(drain(&mut rx), vec![70_000]);
        assert_eq!(rx.open_gaps(), 0);

        // The channel keeps working afterwards.
        assert_eq!(arrive(&mut rx, 70_001, now), Arrival::Buffered);
        assert_eq!(drain(&mut rx), vec![70_001]);
    }

    #[test]
    fn arrival_inside_revealed_gap_keeps_other_waits() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 10, t0);
        arrive(&mut rx, 4, t0 + ms(50));
        arrive(&mut rx, 12, t0 + ms(80));

        assert!(!rx.is_awaiting(4));
        assert_eq!(rx.gap_started_at(3), Some(t0));
        assert_eq!(rx.gap_started_at(5), Some(t0));
        assert_eq!(rx.gap_started_at(11), Some(t0 + ms(80)));
        assert_eq!(rx.open_gaps(), 10);
    }

    // ─── Packet Wrapper & Events ────────────────────────────────────────

    #[test]
    fn unreliable_packet_never_enters_reliable_stream() {
        let mut rx = ReliableReceiver::default();
        let pkt = Packet::new(PacketHeader::new(ChannelType::Unreliable, 0, 0), "u");
        assert!(rx.receive_packet(pkt, Instant::now()).is_none());
        assert_eq!(rx.buffered(), 0);
        assert!(rx.receive().is_none());
    }

    #[test]
    fn jitter_fed_from_reliable_arrivals() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        rx.on_packet(0, 1_000, "a".into(), t0);
        assert_eq!(rx.jitter_ms(), 0.0);
        // Sent 10ms apart, arrived 30ms apart: |D| = 20.
        rx.on_packet(1, 1_010, "b".into(), t0 + ms(30));
        assert!((rx.jitter_ms() - 20.0 / 16.0).abs() < 1e-6);
        assert!(rx
            .drain_events()
            .any(|e| matches!(e, TransportEvent::JitterUpdated { .. })));
    }

    #[test]
    fn delivery_and_skip_emit_events() {
        let t0 = Instant::now();
        let mut rx = ReliableReceiver::default();
        arrive(&mut rx, 1, t0);
        rx.poll_gaps(t0 + ms(201));
        rx.receive();

        let events: Vec<_> = rx
            .drain_events()
            .filter(|e| {
                matches!(
                    e,
                    TransportEvent::PacketSkipped { .. } | TransportEvent::PacketDelivered { .. }
                )
            })
            .collect();
        assert_eq!(
            events,
            vec![
                TransportEvent::PacketSkipped { sequence: 0 },
                TransportEvent::PacketDelivered {
                    channel: ChannelType::Reliable,
                    sequence: 1
                },
            ]
        );
    }

    #[test]
    fn malformed_datagram_is_counted_without_touching_state() {
        let mut rx = ReliableReceiver::default();
        rx.record_malformed(5);

        assert_eq!(rx.stats().malformed, 1);
        assert_eq!(rx.stats().packets_received, 0);
        assert_eq!(rx.next_expected(), 0);
        assert_eq!(
            rx.drain_events().collect::<Vec<_>>(),
            vec![TransportEvent::MalformedDatagram { len: 5 }]
        );
    }
}
