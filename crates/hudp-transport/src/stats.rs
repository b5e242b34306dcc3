//! # Transport Statistics & Events
//!
//! Counters owned by the state machines plus the push-style event interface
//! consumed by the metrics layer. Events are observational only: nothing an
//! [`EventSink`] does can influence protocol behaviour.

use serde::Serialize;
use std::time::Duration;

use crate::wire::ChannelType;

// ─── Events ─────────────────────────────────────────────────────────────────

/// Something observable happened inside the protocol core.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A datagram left the sender (original send or retransmission).
    PacketSent {
        channel: ChannelType,
        sequence: u64,
        bytes: usize,
    },
    /// An ACK matched a tracked reliable packet.
    PacketAcked { sequence: u64, rtt: Duration },
    /// A tracked packet was resent after the retransmit timeout.
    Retransmitted { sequence: u64, retry: u32 },
    /// A tracked packet was dropped without ever being acknowledged.
    PacketAbandoned { sequence: u64, retries: u32 },
    /// A data packet arrived at the receiver.
    PacketReceived {
        channel: ChannelType,
        sequence: u64,
        bytes: usize,
    },
    /// A payload was handed to the application.
    PacketDelivered { channel: ChannelType, sequence: u64 },
    /// The receiver gave up waiting for a reliable sequence number.
    PacketSkipped { sequence: u64 },
    /// The jitter estimate changed.
    JitterUpdated { jitter_ms: f64 },
    /// A datagram could not be decoded and was dropped.
    MalformedDatagram { len: usize },
}

/// Push-style collaborator notified of every [`TransportEvent`].
pub trait EventSink: Send + Sync {
    fn record(&self, event: &TransportEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn record(&self, _event: &TransportEvent) {}
}

impl EventSink for crossbeam_channel::Sender<TransportEvent> {
    fn record(&self, event: &TransportEvent) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(event.clone());
    }
}

// ─── RTT Summary ────────────────────────────────────────────────────────────

/// Running min / max / mean of round-trip samples.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RttSummary {
    pub samples: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub total_us: u64,
    pub last_us: u64,
}

impl RttSummary {
    pub fn record(&mut self, rtt: Duration) {
        let us = rtt.as_micros() as u64;
        if self.samples == 0 || us < self.min_us {
            self.min_us = us;
        }
        if us > self.max_us {
            self.max_us = us;
        }
        self.samples += 1;
        self.total_us += us;
        self.last_us = us;
    }

    pub fn mean_us(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total_us as f64 / self.samples as f64
        }
    }
}

// ─── Sender Stats ───────────────────────────────────────────────────────────

/// Sender-side counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Original reliable sends.
    pub reliable_sent: u64,
    /// Original unreliable sends.
    pub unreliable_sent: u64,
    /// Encoded bytes of original sends (header + payload).
    pub bytes_sent: u64,
    /// Reliable packets acknowledged.
    pub packets_acked: u64,
    /// Resends triggered by the retransmit timeout.
    pub retransmissions: u64,
    /// Tracked packets dropped without an ACK.
    pub packets_abandoned: u64,
    /// ACKs that matched nothing (duplicate, late, or stray).
    pub stray_acks: u64,
    pub rtt: RttSummary,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_sent(&self) -> u64 {
        self.reliable_sent + self.unreliable_sent
    }

    /// Retransmission overhead relative to original reliable sends.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.reliable_sent == 0 {
            0.0
        } else {
            self.retransmissions as f64 / self.reliable_sent as f64
        }
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

/// Reliable-channel receiver counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Reliable packets received, duplicates included.
    pub packets_received: u64,
    /// Payload bytes received on the reliable channel.
    pub bytes_received: u64,
    /// Payloads handed to the application.
    pub packets_delivered: u64,
    /// Arrivals below the cursor or already buffered.
    pub duplicates: u64,
    /// Sequence numbers permanently given up on.
    pub packets_skipped: u64,
    /// Datagrams dropped because they failed to decode.
    pub malformed: u64,
    /// Current smoothed jitter in milliseconds.
    pub jitter_ms: f64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivered / received, as a fraction.
    pub fn delivery_ratio(&self) -> f64 {
        if self.packets_received == 0 {
            0.0
        } else {
            self.packets_delivered as f64 / self.packets_received as f64
        }
    }
}
