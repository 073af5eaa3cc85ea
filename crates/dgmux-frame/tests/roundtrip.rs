//! Property tests for fragmentation and reassembly.

use dgmux_frame::{
    decode_packet, Fragmenter, MessageIdCounter, ReassemblyBuffer, ReassemblyConfig,
};
use proptest::prelude::*;

const MAX_PAYLOAD: usize = 7;
const MAX_FRAGMENTS: usize = 16;

fn fragmenter() -> Fragmenter {
    Fragmenter::new(MAX_PAYLOAD, MAX_FRAGMENTS).expect("valid fragmenter")
}

fn message_and_order() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
    prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD * MAX_FRAGMENTS).prop_flat_map(|data| {
        let count = fragmenter().fragment_count(data.len());
        (
            Just(data),
            Just((0..count).collect::<Vec<usize>>()).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn prop_any_arrival_order_reassembles((data, order) in message_and_order()) {
        let mut ids = MessageIdCounter::new();
        let packets = fragmenter().fragment(&mut ids, &data).expect("within budget");
        let mut buf = ReassemblyBuffer::new(ReassemblyConfig {
            max_fragments: MAX_FRAGMENTS,
            ..ReassemblyConfig::default()
        });

        let mut completed = Vec::new();
        for &i in &order {
            // Go through the wire format so the codec is covered too.
            let wire = packets[i].to_bytes();
            let packet = decode_packet(wire).expect("decodes");
            if let Some(done) = buf.insert(("peer", 0u8), packet).expect("in range") {
                completed.push(done);
            }
        }

        prop_assert_eq!(completed.len(), 1);
        prop_assert_eq!(completed[0].payload.as_ref(), data.as_slice());
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn prop_oversized_messages_rejected(extra in 1usize..64) {
        let data = vec![0u8; MAX_PAYLOAD * MAX_FRAGMENTS + extra];
        let mut ids = MessageIdCounter::new();
        prop_assert!(fragmenter().fragment(&mut ids, &data).is_err());
        prop_assert_eq!(ids.peek(), 0);
    }
}

#[test]
fn two_messages_interleaved_in_reverse() {
    let mut ids = MessageIdCounter::new();
    let first = fragmenter().fragment(&mut ids, &[1u8; 20]).unwrap();
    let second = fragmenter().fragment(&mut ids, &[2u8; 20]).unwrap();
    let mut buf = ReassemblyBuffer::default();

    let mut arrivals: Vec<_> = first.iter().zip(second.iter()).flat_map(|(a, b)| [a, b]).collect();
    arrivals.reverse();

    let completed: Vec<_> = arrivals
        .into_iter()
        .filter_map(|p| buf.insert(("peer", 1u8), p.clone()).unwrap())
        .collect();

    assert_eq!(completed.len(), 2);
    // Second message's fragment 0 arrives before the first's, so it completes first.
    assert_eq!(completed[0].payload.as_ref(), &[2u8; 20]);
    assert_eq!(completed[1].payload.as_ref(), &[1u8; 20]);
}
