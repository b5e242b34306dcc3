#![no_main]

use hudp_transport::receiver::{ReceiverConfig, ReliableReceiver};
use hudp_transport::wire::Packet;
use libfuzzer_sys::fuzz_target;
use quanta::Instant;
use std::time::Duration;

/// Fuzz the reliable receiver with arbitrary wire-format bytes.
///
/// The input is split into 20-byte chunks, each treated as one datagram.
/// Every chunk that decodes is fed to the receiver, followed by a gap scan
/// and a drain. Delivery must stay strictly ascending.
fuzz_target!(|data: &[u8]| {
    let t0 = Instant::now();
    let mut rx = ReliableReceiver::new(ReceiverConfig {
        gap_timeout: Duration::from_millis(20),
    });
    let mut last: Option<u64> = None;

    for (i, chunk) in data.chunks(20).enumerate() {
        let now = t0 + Duration::from_millis(10 * i as u64);
        if let Ok(pkt) = Packet::decode(chunk) {
            let _ = rx.receive_packet(pkt, now);
        }
        rx.poll_gaps(now);
        while let Some(d) = rx.receive() {
            if let Some(prev) = last {
                assert!(d.sequence > prev, "delivery went backwards");
            }
            last = Some(d.sequence);
        }
        for _ in rx.drain_events() {}
    }
});
