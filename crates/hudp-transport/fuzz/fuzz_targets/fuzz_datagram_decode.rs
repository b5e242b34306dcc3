#![no_main]

use hudp_transport::wire::{AckRecord, Datagram, Packet, PacketHeader, MAX_DATAGRAM_SIZE};
use libfuzzer_sys::fuzz_target;

/// Fuzz every decode path on arbitrary bytes.
///
/// None of these may panic. A successfully decoded datagram must re-encode
/// to bytes that decode to the same value.
fuzz_target!(|data: &[u8]| {
    let _ = PacketHeader::decode(&mut &data[..]);
    let _ = AckRecord::decode(data);

    match Datagram::decode(data) {
        // Anything longer would have been cut off by the socket buffer.
        Ok(Datagram::Data(pkt)) if data.len() <= MAX_DATAGRAM_SIZE => {
            let encoded = pkt.encode().expect("decoded packet must re-encode");
            assert_eq!(Packet::decode(&encoded), Ok(pkt));
        }
        Ok(Datagram::Ack(ack)) => {
            assert_eq!(AckRecord::decode(&ack.encode()), Ok(Some(ack)));
        }
        _ => {}
    }
});
