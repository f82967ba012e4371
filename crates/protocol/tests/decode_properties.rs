//! Property tests for the report decoder
//!
//! Run with: `cargo test -p protocol --test decode_properties`

use proptest::prelude::*;
use protocol::{PEN_REPORT_TAG, PenEvent, RawPacket, decode, decode_bytes};

proptest! {
    #[test]
    fn pen_reports_decode_little_endian_fields(
        buttons in any::<u8>(),
        x in any::<u16>(),
        y in any::<u16>(),
        pressure in any::<u16>(),
    ) {
        let [x0, x1] = x.to_le_bytes();
        let [y0, y1] = y.to_le_bytes();
        let [p0, p1] = pressure.to_le_bytes();
        let packet = RawPacket::new([PEN_REPORT_TAG, buttons, x0, x1, y0, y1, p0, p1]);

        match decode(&packet) {
            PenEvent::PositionPressure(state) => {
                prop_assert_eq!(state.x, x);
                prop_assert_eq!(state.y, y);
                prop_assert_eq!(state.pressure, pressure);
                prop_assert_eq!(state.primary_button, buttons & 0x01 != 0);
                prop_assert_eq!(state.aux0, buttons & 0x02 != 0);
                prop_assert_eq!(state.aux1, buttons & 0x04 != 0);
            }
            other => prop_assert!(false, "unexpected event {:?}", other),
        }
    }

    #[test]
    fn high_button_bits_do_not_change_the_result(
        payload in any::<[u8; 6]>(),
        low in 0u8..8,
        high in any::<u8>(),
    ) {
        let mut a = [PEN_REPORT_TAG, low, 0, 0, 0, 0, 0, 0];
        a[2..].copy_from_slice(&payload);
        let mut b = a;
        b[1] = low | (high & 0xf8);

        prop_assert_eq!(decode(&RawPacket::new(a)), decode(&RawPacket::new(b)));
    }

    #[test]
    fn other_tags_are_unrecognized(tag in any::<u8>(), rest in any::<[u8; 7]>()) {
        prop_assume!(tag != PEN_REPORT_TAG);
        let mut bytes = [tag, 0, 0, 0, 0, 0, 0, 0];
        bytes[1..].copy_from_slice(&rest);

        prop_assert_eq!(decode(&RawPacket::new(bytes)), PenEvent::Unrecognized { tag });
    }

    #[test]
    fn short_input_with_other_tags_is_unrecognized(
        bytes in proptest::collection::vec(any::<u8>(), 1..8),
    ) {
        let tag = bytes[0];
        let result = decode_bytes(&bytes);
        if tag == PEN_REPORT_TAG {
            prop_assert!(result.is_err());
        } else {
            prop_assert_eq!(result, Ok(PenEvent::Unrecognized { tag }));
        }
    }
}

#[test]
fn every_tag_is_handled() {
    for tag in 0..=u8::MAX {
        let event = decode(&RawPacket::new([tag, 0x07, 1, 0, 2, 0, 3, 0]));
        if tag == PEN_REPORT_TAG {
            assert!(matches!(event, PenEvent::PositionPressure(_)));
        } else {
            assert_eq!(event, PenEvent::Unrecognized { tag });
        }
    }
}
