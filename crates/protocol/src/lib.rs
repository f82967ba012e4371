//! Report protocol for XP-Pen graphics tablets
//!
//! This crate defines the 8-byte interrupt report the tablet sends on every
//! poll and the pure decoder that turns it into typed pen-state events.
//! It performs no I/O and has no notion of transfers or devices.
//!
//! # Example
//!
//! ```
//! use protocol::{PenEvent, RawPacket, decode};
//!
//! let packet = RawPacket::new([0x09, 0x05, 0x34, 0x12, 0x78, 0x56, 0xab, 0x03]);
//!
//! match decode(&packet) {
//!     PenEvent::PositionPressure(state) => {
//!         assert_eq!(state.x, 0x1234);
//!         assert_eq!(state.y, 0x5678);
//!         assert_eq!(state.pressure, 0x03ab);
//!         assert!(state.primary_button);
//!     }
//!     PenEvent::Unrecognized { tag } => panic!("unexpected tag {tag:#x}"),
//! }
//! ```
//!
//! # Short buffers
//!
//! Transports may deliver fewer bytes than a full report. Use
//! [`decode_bytes`], which never reads past the slice it is given:
//!
//! ```
//! use protocol::{PenEvent, decode_bytes};
//!
//! // Unknown tag: only byte 0 is inspected
//! assert_eq!(decode_bytes(&[0xff]).unwrap(), PenEvent::Unrecognized { tag: 0xff });
//!
//! // Known tag but truncated: rejected
//! assert!(decode_bytes(&[0x09, 0x00, 0x10]).is_err());
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{G540Format, ReportFormat, decode, decode_bytes, format_for_product};
pub use error::{ProtocolError, Result};
pub use types::{
    G540_PRODUCT_ID, MAX_ABS_X, MAX_ABS_Y, MAX_PRESSURE, PACKET_LEN, PEN_REPORT_TAG, PenEvent,
    PenState, RawPacket, UsbId, XPPEN_VENDOR_ID,
};
