//! # HUDP Wire Format
//!
//! Fixed-width, little-endian framing shared by both channels.
//!
//! ## Data Packet (17-byte header + UTF-8 payload)
//!
//! ```text
//!  0       1                               9                              17
//! +-------+-------------------------------+-------------------------------+----------
//! |  Ch   |   Sequence Number (u64 LE)    | Sender Timestamp (u64 LE, ms) | Payload…
//! +-------+-------------------------------+-------------------------------+----------
//!   Ch: 0 = reliable, 1 = unreliable
//! ```
//!
//! ## Acknowledgment (9 bytes)
//!
//! ```text
//! +-------+-------------------------------+
//! | 0xFF  |  Acked Sequence (u64 LE)      |
//! +-------+-------------------------------+
//! ```
//!
//! There is no checksum beyond what UDP provides; corruption that preserves
//! length goes undetected.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Data packet header size: 1 (channel) + 8 (sequence) + 8 (timestamp).
pub const HEADER_SIZE: usize = 17;

/// Acknowledgment record size: 1 (marker) + 8 (sequence).
pub const ACK_SIZE: usize = 9;

/// Sentinel in the first byte that distinguishes an ACK from data.
pub const ACK_MARKER: u8 = 255;

/// Receive buffer per datagram.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Largest payload that fits in a single datagram.
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_SIZE - HEADER_SIZE;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Reasons a datagram fails to encode or decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("datagram truncated: {len} bytes, need at least {need}")]
    Truncated { len: usize, need: usize },
    #[error("unknown channel tag {0}")]
    UnknownChannel(u8),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

// ─── Channel Type ────────────────────────────────────────────────────────────

/// Delivery channel carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelType {
    /// Acknowledged, retransmitted, delivered in sequence order.
    Reliable = 0,
    /// Best-effort, arrival order, no acknowledgment.
    Unreliable = 1,
}

impl ChannelType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ChannelType::Reliable),
            1 => Some(ChannelType::Unreliable),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelType::Reliable => "reliable",
            ChannelType::Unreliable => "unreliable",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Packet Header ──────────────────────────────────────────────────────────

/// Decoded data packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Which channel the packet belongs to.
    pub channel: ChannelType,
    /// Sequence number from the sender's single (cross-channel) counter.
    pub sequence: u64,
    /// Sender wall-clock time, epoch milliseconds.
    pub timestamp_ms: u64,
}

impl PacketHeader {
    pub fn new(channel: ChannelType, sequence: u64, timestamp_ms: u64) -> Self {
        PacketHeader {
            channel,
            sequence,
            timestamp_ms,
        }
    }

    /// Encode the header into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.channel as u8);
        buf.put_u64_le(self.sequence);
        buf.put_u64_le(self.timestamp_ms);
    }

    /// Decode a header, consuming exactly [`HEADER_SIZE`] bytes.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < HEADER_SIZE {
            return Err(WireError::Truncated {
                len: buf.remaining(),
                need: HEADER_SIZE,
            });
        }

        let tag = buf.get_u8();
        let channel = ChannelType::from_byte(tag).ok_or(WireError::UnknownChannel(tag))?;
        let sequence = buf.get_u64_le();
        let timestamp_ms = buf.get_u64_le();

        Ok(PacketHeader {
            channel,
            sequence,
            timestamp_ms,
        })
    }
}

// ─── Data Packet ────────────────────────────────────────────────────────────

/// A full data packet: header + text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: String,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: impl Into<String>) -> Self {
        Packet {
            header,
            payload: payload.into(),
        }
    }

    /// Serialize into a single datagram.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let len = self.payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let mut buf = BytesMut::with_capacity(HEADER_SIZE + len);
        self.header.encode(&mut buf);
        buf.put_slice(self.payload.as_bytes());
        Ok(buf.freeze())
    }

    /// Decode a datagram. Everything after the header is the payload.
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let mut buf = datagram;
        let header = PacketHeader::decode(&mut buf)?;
        let payload = std::str::from_utf8(buf)
            .map_err(|_| WireError::InvalidUtf8)?
            .to_owned();
        Ok(Packet { header, payload })
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

// ─── Acknowledgment ─────────────────────────────────────────────────────────

/// Per-packet acknowledgment for the reliable channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRecord {
    pub sequence: u64,
}

impl AckRecord {
    pub fn new(sequence: u64) -> Self {
        AckRecord { sequence }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ACK_SIZE);
        buf.put_u8(ACK_MARKER);
        buf.put_u64_le(self.sequence);
        buf.freeze()
    }

    /// Decode an ACK. Returns `Ok(None)` when the datagram is long enough but
    /// does not carry the ACK marker.
    pub fn decode(datagram: &[u8]) -> Result<Option<Self>, WireError> {
        if datagram.len() < ACK_SIZE {
            return Err(WireError::Truncated {
                len: datagram.len(),
                need: ACK_SIZE,
            });
        }
        let mut buf = datagram;
        if buf.get_u8() != ACK_MARKER {
            return Ok(None);
        }
        Ok(Some(AckRecord {
            sequence: buf.get_u64_le(),
        }))
    }
}

// ─── Datagram ───────────────────────────────────────────────────────────────

/// Either kind of datagram, classified by the first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    Data(Packet),
    Ack(AckRecord),
}

impl Datagram {
    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        match datagram.first() {
            None => Err(WireError::Truncated {
                len: 0,
                need: ACK_SIZE,
            }),
            Some(&ACK_MARKER) => AckRecord::decode(datagram)?
                .map(Datagram::Ack)
                .ok_or(WireError::UnknownChannel(ACK_MARKER)),
            Some(_) => Packet::decode(datagram).map(Datagram::Data),
        }
    }
}
