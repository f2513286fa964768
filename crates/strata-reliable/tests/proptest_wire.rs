//! Property-based tests for the wire unit format.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use strata_reliable::seq::Seq;
use strata_reliable::wire::*;
use strata_reliable::WireError;

fn segment() -> impl Strategy<Value = Segment> {
    (
        any::<u16>(),
        proptest::collection::vec(any::<u16>(), 1..8),
        proptest::collection::vec(any::<u8>(), 0..64),
    )
        .prop_map(|(data_id, txs, payload)| Segment {
            data_id: Seq::new(data_id),
            transmission_ids: txs.into_iter().map(Seq::new).collect(),
            payload: Bytes::from(payload),
        })
}

fn unit() -> impl Strategy<Value = WireUnit> {
    (
        any::<u16>(),
        any::<u32>(),
        proptest::collection::vec(segment(), 0..16),
    )
        .prop_map(|(ack, ack_bitmap, segments)| WireUnit {
            ack: Seq::new(ack),
            ack_bitmap,
            segments,
        })
}

proptest! {
    #[test]
    fn unit_roundtrip(unit in unit()) {
        let encoded = unit.encode();
        prop_assert_eq!(encoded.len(), unit.encoded_len());
        let decoded = WireUnit::decode(&mut encoded.freeze()).unwrap();
        prop_assert_eq!(decoded, unit);
    }

    #[test]
    fn every_strict_prefix_is_truncated(unit in unit()) {
        let encoded = unit.encode();
        for cut in 0..encoded.len() {
            let err = WireUnit::decode(&mut &encoded[..cut]).unwrap_err();
            prop_assert!(matches!(err, WireError::Truncated { .. }), "cut {}", cut);
        }
    }

    #[test]
    fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let _ = WireUnit::decode(&mut &data[..]);
    }

    #[test]
    fn trailing_garbage_rejected(unit in unit(), extra in proptest::collection::vec(any::<u8>(), 1..16)) {
        let mut encoded: BytesMut = unit.encode();
        encoded.extend_from_slice(&extra);
        let err = WireUnit::decode(&mut encoded.freeze()).unwrap_err();
        prop_assert_eq!(err, WireError::TrailingBytes(extra.len()));
    }
}
