//! # Endpoint Metrics
//!
//! [`MetricsCollector`] is the [`EventSink`] both endpoints report to. It only
//! counts; nothing it does feeds back into the protocol. A
//! [`MetricsSnapshot`] is a point-in-time copy with derived rates, printable
//! as a summary block or serialisable as JSON.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use quanta::Instant;
use serde::Serialize;

use hudp_transport::stats::{EventSink, RttSummary, TransportEvent};
use hudp_transport::wire::ChannelType;

/// Per-channel counter pair.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelCounts {
    pub reliable: u64,
    pub unreliable: u64,
}

impl ChannelCounts {
    fn bump(&mut self, channel: ChannelType) {
        match channel {
            ChannelType::Reliable => self.reliable += 1,
            ChannelType::Unreliable => self.unreliable += 1,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    datagrams_sent: ChannelCounts,
    bytes_sent: u64,
    packets_acked: u64,
    retransmissions: u64,
    packets_abandoned: u64,
    packets_received: ChannelCounts,
    bytes_received: u64,
    packets_delivered: ChannelCounts,
    packets_skipped: u64,
    malformed: u64,
    jitter_ms: f64,
    rtt: RttSummary,
}

/// Aggregates [`TransportEvent`]s from one endpoint.
pub struct MetricsCollector {
    started: Instant,
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Time since the collector was created.
    pub fn elapsed(&self) -> Duration {
        Instant::now().duration_since(self.started)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = self.elapsed().as_secs_f64();

        let throughput_bps = if elapsed > 0.0 {
            c.bytes_received as f64 / elapsed
        } else {
            0.0
        };
        let delivery_ratio_pct = if c.packets_received.reliable > 0 {
            c.packets_delivered.reliable as f64 / c.packets_received.reliable as f64 * 100.0
        } else {
            0.0
        };

        MetricsSnapshot {
            elapsed_secs: elapsed,
            packets_sent: ChannelCounts {
                reliable: c.datagrams_sent.reliable.saturating_sub(c.retransmissions),
                unreliable: c.datagrams_sent.unreliable,
            },
            bytes_sent: c.bytes_sent,
            packets_acked: c.packets_acked,
            retransmissions: c.retransmissions,
            packets_abandoned: c.packets_abandoned,
            packets_received: c.packets_received,
            bytes_received: c.bytes_received,
            packets_delivered: c.packets_delivered,
            packets_skipped: c.packets_skipped,
            malformed: c.malformed,
            jitter_ms: c.jitter_ms,
            throughput_bps,
            delivery_ratio_pct,
            rtt_samples: c.rtt.samples,
            rtt_min_ms: c.rtt.min_us as f64 / 1000.0,
            rtt_avg_ms: c.rtt.mean_us() / 1000.0,
            rtt_max_ms: c.rtt.max_us as f64 / 1000.0,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MetricsCollector {
    fn record(&self, event: &TransportEvent) {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        match *event {
            TransportEvent::PacketSent { channel, bytes, .. } => {
                c.datagrams_sent.bump(channel);
                c.bytes_sent += bytes as u64;
            }
            TransportEvent::PacketAcked { rtt, .. } => {
                c.packets_acked += 1;
                c.rtt.record(rtt);
            }
            TransportEvent::Retransmitted { .. } => c.retransmissions += 1,
            TransportEvent::PacketAbandoned { .. } => c.packets_abandoned += 1,
            TransportEvent::PacketReceived { channel, bytes, .. } => {
                c.packets_received.bump(channel);
                c.bytes_received += bytes as u64;
            }
            TransportEvent::PacketDelivered { channel, .. } => c.packets_delivered.bump(channel),
            TransportEvent::PacketSkipped { .. } => c.packets_skipped += 1,
            TransportEvent::JitterUpdated { jitter_ms } => c.jitter_ms = jitter_ms,
            TransportEvent::MalformedDatagram { .. } => c.malformed += 1,
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Point-in-time view of a [`MetricsCollector`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub elapsed_secs: f64,
    /// Original sends; retransmissions are counted separately.
    pub packets_sent: ChannelCounts,
    /// Wire bytes, retransmissions included.
    pub bytes_sent: u64,
    pub packets_acked: u64,
    pub retransmissions: u64,
    pub packets_abandoned: u64,
    pub packets_received: ChannelCounts,
    /// Payload bytes.
    pub bytes_received: u64,
    pub packets_delivered: ChannelCounts,
    pub packets_skipped: u64,
    pub malformed: u64,
    pub jitter_ms: f64,
    /// Received payload bytes per second over the collector's lifetime.
    pub throughput_bps: f64,
    /// Reliable delivered / reliable received, in percent.
    pub delivery_ratio_pct: f64,
    pub rtt_samples: u64,
    pub rtt_min_ms: f64,
    pub rtt_avg_ms: f64,
    pub rtt_max_ms: f64,
}

impl MetricsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "packets sent:      reliable={} unreliable={}",
            self.packets_sent.reliable, self.packets_sent.unreliable
        )?;
        writeln!(f, "packets acked:     {}", self.packets_acked)?;
        writeln!(f, "retransmissions:   {}", self.retransmissions)?;
        writeln!(f, "abandoned:         {}", self.packets_abandoned)?;
        if self.rtt_samples > 0 {
            writeln!(
                f,
                "rtt:               min={:.2}ms avg={:.2}ms max={:.2}ms",
                self.rtt_min_ms, self.rtt_avg_ms, self.rtt_max_ms
            )?;
        }
        writeln!(
            f,
            "packets received:  reliable={} unreliable={}",
            self.packets_received.reliable, self.packets_received.unreliable
        )?;
        writeln!(
            f,
            "delivered:         reliable={} unreliable={}",
            self.packets_delivered.reliable, self.packets_delivered.unreliable
        )?;
        writeln!(f, "skipped:           {}", self.packets_skipped)?;
        writeln!(f, "bytes received:    {}", self.bytes_received)?;
        writeln!(f, "throughput:        {:.2} bytes/sec", self.throughput_bps)?;
        writeln!(f, "jitter:            {:.2} ms", self.jitter_ms)?;
        write!(f, "delivery ratio:    {:.2}%", self.delivery_ratio_pct)
    }
}
