//! # hudp-transport
//!
//! Hybrid UDP transport core: one datagram socket, two delivery channels.
//!
//! - **Reliable**: acknowledged per packet, retransmitted on a fixed timeout,
//!   delivered in sequence order; a hole that outlives the gap timeout is
//!   skipped permanently.
//! - **Unreliable**: best effort, delivered in arrival order.
//!
//! Both channels draw sequence numbers from one counter per sender.
//!
//! ## Crate structure
//!
//! - [`wire`] — Packet header and ACK serialization
//! - [`clock`] — Sequence counter, epoch-millisecond timestamps
//! - [`arq`] — Retransmit tracking (sender) and gap tracking (receiver)
//! - [`sender`] — Sender state machine + ACK matching
//! - [`receiver`] — Reliable receiver state machine
//! - [`queue`] — Unreliable arrival queue
//! - [`jitter`] — RFC 3550 interarrival jitter
//! - [`stats`] — Counters, events, and the metrics sink trait
//!
//! Everything here is pure state; sockets, threads and timers belong to the
//! caller.

pub mod arq;
pub mod clock;
pub mod jitter;
pub mod queue;
pub mod receiver;
pub mod sender;
pub mod stats;
pub mod wire;
