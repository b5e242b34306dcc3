//! # hudp-endpoint
//!
//! Socket and thread runtime around the `hudp-transport` state machines.
//!
//! - [`client::HudpClient`] — fixed-peer sender with an ACK listener and a
//!   retransmit scheduler.
//! - [`server::HudpServer`] — bound receiver with a gap-skip scheduler and
//!   non-blocking polls for both channels.
//! - [`config`] — TOML protocol configuration.
//! - [`metrics`] — event aggregation and summaries.

pub mod client;
pub mod config;
pub mod metrics;
pub mod server;

use std::io;

use hudp_transport::stats::{EventSink, TransportEvent};

/// Read timeouts surface as `WouldBlock` on Unix and `TimedOut` on Windows.
pub(crate) fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Hand drained events to the sink. Called with no state lock held.
pub(crate) fn forward_events(sink: &dyn EventSink, events: Vec<TransportEvent>) {
    for event in &events {
        sink.record(event);
    }
}
