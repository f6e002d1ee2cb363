use glam::Vec3;
use proptest::prelude::*;
use tandem::Packet;
use tandem::net::{OBJECT_STATE_SIZE, ObjectState, STATE_HEADER_SIZE, decode_state, encode_state};

fn object_strategy() -> impl Strategy<Value = ObjectState> {
    (
        any::<u32>(),
        prop::array::uniform3(-1000.0f32..1000.0),
        prop::array::uniform3(-360.0f32..360.0),
    )
        .prop_map(|(id, p, r)| ObjectState::new(id, Vec3::from_array(p), Vec3::from_array(r)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..1500)) {
        let _ = Packet::decode(&bytes);
        let _ = decode_state(&bytes);
    }

    #[test]
    fn decode_rejects_truncated_state(
        objects in prop::collection::vec(object_strategy(), 1..20),
        cut in 1usize..OBJECT_STATE_SIZE,
    ) {
        let bytes = encode_state(7, &objects);
        prop_assert_eq!(bytes.len(), STATE_HEADER_SIZE + objects.len() * OBJECT_STATE_SIZE);

        let truncated = &bytes[..bytes.len() - cut];
        prop_assert!(decode_state(truncated).is_err());
    }

    #[test]
    fn state_count_field_never_overreads(
        count in any::<u32>(),
        tail in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut bytes = vec![0u8; STATE_HEADER_SIZE];
        bytes[0] = tandem::PacketKind::State as u8;
        bytes[5..9].copy_from_slice(&count.to_le_bytes());
        bytes.extend_from_slice(&tail);

        let fits = (count as usize)
            .checked_mul(OBJECT_STATE_SIZE)
            .is_some_and(|needed| needed <= tail.len());
        prop_assert_eq!(decode_state(&bytes).is_ok(), fits);
    }
}
