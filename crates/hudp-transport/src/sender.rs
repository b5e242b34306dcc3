//! # Sender State Machine
//!
//! Pure logic — no I/O. Assigns sequence numbers from the single shared
//! counter, serializes packets for either channel, tracks reliable packets
//! until acknowledged, matches incoming ACKs, and schedules retransmissions.
//!
//! ## Responsibilities
//!
//! 1. **Packetisation**: sequence number + epoch-ms timestamp + payload
//! 2. **Tracking**: reliable packets stay in the [`RetransmitTracker`] until
//!    ACKed or abandoned; unreliable packets are never tracked
//! 3. **ACK Matching**: RTT sample, release tracked state, count
//! 4. **Retransmission**: fixed-interval resend, bounded give-up
//!
//! The caller owns the socket and the timers and must serialize access to a
//! `ReliableSender` (the tracked store is shared by the application, the ACK
//! listener and the retransmit scan).

use bytes::Bytes;
use quanta::Instant;
use std::time::Duration;
use tracing::{debug, warn};

use crate::arq::{RetransmitAction, RetransmitConfig, RetransmitTracker};
use crate::clock::{SequenceGenerator, TimestampClock};
use crate::stats::{SenderStats, TransportEvent};
use crate::wire::{AckRecord, ChannelType, Packet, PacketHeader, WireError};

// ─── Output Packet ──────────────────────────────────────────────────────────

/// A datagram ready for the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPacket {
    /// Serialized wire-format bytes (header + payload).
    pub data: Bytes,
    pub channel: ChannelType,
    pub sequence: u64,
    pub is_retransmit: bool,
}

// ─── Sender ─────────────────────────────────────────────────────────────────

/// Client-side protocol state.
pub struct ReliableSender {
    seq_gen: SequenceGenerator,
    clock: TimestampClock,
    retransmit: RetransmitTracker,
    stats: SenderStats,
    events: Vec<TransportEvent>,
    abandoned: Vec<u64>,
}

impl ReliableSender {
    pub fn new(config: RetransmitConfig) -> Self {
        ReliableSender {
            seq_gen: SequenceGenerator::new(),
            clock: TimestampClock::new(),
            retransmit: RetransmitTracker::new(config),
            stats: SenderStats::default(),
            events: Vec::new(),
            abandoned: Vec::new(),
        }
    }

    /// Build a reliable packet and start tracking it.
    ///
    /// Oversized payloads are rejected before a sequence number is consumed.
    pub fn send_reliable(
        &mut self,
        payload: &str,
        now: Instant,
    ) -> Result<OutputPacket, WireError> {
        let out = self.packetise(ChannelType::Reliable, payload)?;
        self.retransmit.track(out.sequence, out.data.clone(), now);
        self.stats.reliable_sent += 1;
        Ok(out)
    }

    /// Build an unreliable packet. It shares the sequence space with the
    /// reliable channel but is never tracked or acknowledged.
    pub fn send_unreliable(&mut self, payload: &str) -> Result<OutputPacket, WireError> {
        let out = self.packetise(ChannelType::Unreliable, payload)?;
        self.stats.unreliable_sent += 1;
        Ok(out)
    }

    /// Match an ACK against the tracked store.
    ///
    /// Returns the RTT when the ACK released a tracked packet. ACKs for
    /// sequences that were already acknowledged, abandoned, or never tracked
    /// are ignored.
    pub fn process_ack(&mut self, ack: &AckRecord, now: Instant) -> Option<Duration> {
        let Some(rtt) = self.retransmit.acknowledge(ack.sequence, now) else {
            self.stats.stray_acks += 1;
            debug!(seq = ack.sequence, "ACK for untracked packet, ignoring");
            return None;
        };

        self.stats.packets_acked += 1;
        self.stats.rtt.record(rtt);
        self.events.push(TransportEvent::PacketAcked {
            sequence: ack.sequence,
            rtt,
        });
        debug!(
            seq = ack.sequence,
            rtt_ms = rtt.as_secs_f64() * 1000.0,
            "ACK received"
        );
        Some(rtt)
    }

    /// Run one retransmit scan. Returns the datagrams to resend; abandoned
    /// packets are reported through events and [`drain_abandoned`](Self::drain_abandoned).
    pub fn poll_retransmits(&mut self, now: Instant) -> Vec<OutputPacket> {
        let mut resend = Vec::new();

        for action in self.retransmit.poll(now) {
            match action {
                RetransmitAction::Resend {
                    sequence,
                    data,
                    retry,
                } => {
                    debug!(seq = sequence, retry, "retransmitting");
                    self.stats.retransmissions += 1;
                    self.events
                        .push(TransportEvent::Retransmitted { sequence, retry });
                    self.events.push(TransportEvent::PacketSent {
                        channel: ChannelType::Reliable,
                        sequence,
                        bytes: data.len(),
                    });
                    resend.push(OutputPacket {
                        data,
                        channel: ChannelType::Reliable,
                        sequence,
                        is_retransmit: true,
                    });
                }
                RetransmitAction::Abandon { sequence, retries } => {
                    warn!(seq = sequence, retries, "gave up on packet");
                    self.stats.packets_abandoned += 1;
                    self.abandoned.push(sequence);
                    self.events
                        .push(TransportEvent::PacketAbandoned { sequence, retries });
                }
            }
        }

        resend
    }

    /// Drain buffered events for the metrics layer.
    pub fn drain_events(&mut self) -> impl Iterator<Item = TransportEvent> + '_ {
        self.events.drain(..)
    }

    /// Sequence numbers abandoned since the last call.
    pub fn drain_abandoned(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.abandoned)
    }

    /// Number of reliable packets awaiting an ACK.
    pub fn in_flight(&self) -> usize {
        self.retransmit.len()
    }

    pub fn is_tracked(&self, sequence: u64) -> bool {
        self.retransmit.contains(sequence)
    }

    pub fn retry_count(&self, sequence: u64) -> Option<u32> {
        self.retransmit.retry_count(sequence)
    }

    /// Next sequence number that will be assigned.
    pub fn next_sequence(&self) -> u64 {
        self.seq_gen.current()
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    // ─── Internal Helpers ────────────────────────────────────────────────

    fn packetise(
        &mut self,
        channel: ChannelType,
        payload: &str,
    ) -> Result<OutputPacket, WireError> {
        let sequence = self.seq_gen.current();
        let header = PacketHeader::new(channel, sequence, self.clock.now_ms());
        let data = Packet::new(header, payload).encode()?;
        self.seq_gen.next();

        self.stats.bytes_sent += data.len() as u64;
        self.events.push(TransportEvent::PacketSent {
            channel,
            sequence,
            bytes: data.len(),
        });
        debug!(seq = sequence, %channel, bytes = data.len(), "sent packet");

        Ok(OutputPacket {
            data,
            channel,
            sequence,
            is_retransmit: false,
        })
    }
}

impl Default for ReliableSender {
    fn default() -> Self {
        Self::new(RetransmitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arq::GiveUpPolicy;
    use crate::wire::MAX_PAYLOAD_LEN;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // ─── Send & Output ──────────────────────────────────────────────────

    #[test]
    fn reliable_send_is_tracked() {
        let mut tx = ReliableSender::default();
        let out = tx.send_reliable("hello", Instant::now()).unwrap();

        assert_eq!(out.sequence, 0);
        assert_eq!(out.channel, ChannelType::Reliable);
        assert!(!out.is_retransmit);
        assert!(tx.is_tracked(0));
        assert_eq!(tx.retry_count(0), Some(0));
        assert_eq!(tx.in_flight(), 1);

        let pkt = Packet::decode(&out.data).unwrap();
        assert_eq!(pkt.payload, "hello");
        assert_eq!(pkt.header.channel, ChannelType::Reliable);
    }

    #[test]
    fn unreliable_send_is_not_tracked() {
        let mut tx = ReliableSender::default();
        let out = tx.send_unreliable("fire").unwrap();
        assert_eq!(out.channel, ChannelType::Unreliable);
        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.stats().unreliable_sent, 1);
    }

    #[test]
    fn channels_share_one_sequence_space() {
        let mut tx = ReliableSender::default();
        let now = Instant::now();
        let a = tx.send_reliable("a", now).unwrap();
        let b = tx.send_unreliable("b").unwrap();
        let c = tx.send_reliable("c", now).unwrap();
        assert_eq!((a.sequence, b.sequence, c.sequence), (0, 1, 2));
        assert_eq!(tx.next_sequence(), 3);
    }

    #[test]
    fn oversized_payload_consumes_no_sequence() {
        let mut tx = ReliableSender::default();
        let big = "x".repeat(MAX_PAYLOAD_LEN + 1);
        assert!(tx.send_reliable(&big, Instant::now()).is_err());
        assert_eq!(tx.next_sequence(), 0);
        assert_eq!(tx.in_flight(), 0);
    }

    #[test]
    fn send_counts_bytes_and_emits_event() {
        let mut tx = ReliableSender::default();
        tx.send_reliable("abcd", Instant::now()).unwrap();
        assert_eq!(tx.stats().bytes_sent, 17 + 4);

        let events: Vec<_> = tx.drain_events().collect();
        assert_eq!(
            events,
            vec![TransportEvent::PacketSent {
                channel: ChannelType::Reliable,
                sequence: 0,
                bytes: 21
            }]
        );
    }

    // ─── ACK Matching ───────────────────────────────────────────────────

    #[test]
    fn ack_releases_and_measures_rtt() {
        let t0 = Instant::now();
        let mut tx = ReliableSender::default();
        tx.send_reliable("x", t0).unwrap();

        let rtt = tx.process_ack(&AckRecord::new(0), t0 + ms(7)).unwrap();
        assert_eq!(rtt, ms(7));
        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.stats().packets_acked, 1);
        assert_eq!(tx.stats().rtt.samples, 1);
    }

    #[test]
    fn duplicate_ack_ignored() {
        let t0 = Instant::now();
        let mut tx = ReliableSender::default();
        tx.send_reliable("x", t0).unwrap();

        assert!(tx.process_ack(&AckRecord::new(0), t0 + ms(1)).is_some());
        assert!(tx.process_ack(&AckRecord::new(0), t0 + ms(2)).is_none());
        assert_eq!(tx.stats().packets_acked, 1);
        assert_eq!(tx.stats().stray_acks, 1);
    }

    #[test]
    fn ack_for_unreliable_sequence_ignored() {
        let mut tx = ReliableSender::default();
        let out = tx.send_unreliable("u").unwrap();
        assert!(tx.process_ack(&AckRecord::new(out.sequence), Instant::now()).is_none());
    }

    // ─── Retransmission ─────────────────────────────────────────────────

    #[test]
    fn timely_acks_produce_no_retransmissions() {
        let t0 = Instant::now();
        let mut tx = ReliableSender::default();
        tx.send_reliable("one", t0).unwrap();
        tx.send_reliable("two", t0).unwrap();

        assert!(tx.poll_retransmits(t0 + ms(50)).is_empty());
        tx.process_ack(&AckRecord::new(0), t0 + ms(60));
        tx.process_ack(&AckRecord::new(1), t0 + ms(70));

        for tick in 2..10 {
            assert!(tx.poll_retransmits(t0 + ms(50 * tick)).is_empty());
        }
        assert_eq!(tx.stats().retransmissions, 0);
    }

    #[test]
    fn lost_ack_triggers_identical_resend() {
        let t0 = Instant::now();
        let mut tx = ReliableSender::default();
        let original = tx.send_reliable("payload", t0).unwrap();

        let resent = tx.poll_retransmits(t0 + ms(150));
        assert_eq!(resent.len(), 1);
        assert_eq!(resent[0].data, original.data);
        assert!(resent[0].is_retransmit);
        assert_eq!(tx.retry_count(0), Some(1));
        assert_eq!(tx.stats().retransmissions, 1);
    }

    #[test]
    fn abandoned_packet_is_reported() {
        let t0 = Instant::now();
        let mut tx = ReliableSender::new(RetransmitConfig {
            policy: GiveUpPolicy::SinceFirstSend,
            ..RetransmitConfig::default()
        });
        tx.send_reliable("doomed", t0).unwrap();

        for tick in 1..=8 {
            tx.poll_retransmits(t0 + ms(50 * tick));
        }

        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.stats().packets_abandoned, 1);
        assert_eq!(tx.drain_abandoned(), vec![0]);
        assert!(tx.drain_abandoned().is_empty());
        assert!(tx
            .drain_events()
            .any(|e| matches!(e, TransportEvent::PacketAbandoned { sequence: 0, .. })));

        // A late ACK after abandonment is a no-op.
        assert!(tx.process_ack(&AckRecord::new(0), t0 + ms(500)).is_none());
    }
}
