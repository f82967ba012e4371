//! Report and pen-state type definitions
//!
//! Wire layout of the interrupt report (device -> host):
//!
//! | Offset | Size | Field          | Encoding                         |
//! |--------|------|----------------|----------------------------------|
//! | 0      | 1    | report tag     | `0x09` for pen reports           |
//! | 1      | 1    | button bitmap  | bit0 primary, bit1/bit2 aux      |
//! | 2      | 2    | X position     | little-endian, 0..=0x7FFF        |
//! | 4      | 2    | Y position     | little-endian, 0..=0x7FFF        |
//! | 6      | 2    | pressure       | little-endian, 0..=0x07FF        |

use crate::error::{ProtocolError, Result};

/// Length of every interrupt report
pub const PACKET_LEN: usize = 8;

/// Report tag for position/pressure reports
pub const PEN_REPORT_TAG: u8 = 0x09;

/// Upper bound of the X axis as declared to the input stack
pub const MAX_ABS_X: u16 = 0x7fff;

/// Upper bound of the Y axis as declared to the input stack
pub const MAX_ABS_Y: u16 = 0x7fff;

/// Upper bound of the pressure axis as declared to the input stack
pub const MAX_PRESSURE: u16 = 0x07ff;

/// XP-Pen USB vendor ID
pub const XPPEN_VENDOR_ID: u16 = 0x28bd;

/// XP-Pen G540 product ID
pub const G540_PRODUCT_ID: u16 = 0x0075;

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    /// Vendor ID
    pub vendor_id: u16,
    /// Product ID
    pub product_id: u16,
}

impl UsbId {
    /// The only tablet model with a known report layout
    pub const G540: UsbId = UsbId {
        vendor_id: XPPEN_VENDOR_ID,
        product_id: G540_PRODUCT_ID,
    };
}

/// One raw interrupt report, exactly [`PACKET_LEN`] bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPacket([u8; PACKET_LEN]);

impl RawPacket {
    pub const fn new(bytes: [u8; PACKET_LEN]) -> Self {
        Self(bytes)
    }

    /// Copy a report out of a slice that must be exactly one report long
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let array: [u8; PACKET_LEN] =
            bytes
                .try_into()
                .map_err(|_| ProtocolError::InvalidLength {
                    expected: PACKET_LEN,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; PACKET_LEN] {
        &self.0
    }

    /// Byte 0: selects how the rest of the report is interpreted
    pub fn report_tag(&self) -> u8 {
        self.0[0]
    }

    /// Byte 1: bit 0 primary, bit 1 aux 0, bit 2 aux 1
    pub fn button_bits(&self) -> u8 {
        self.0[1]
    }

    pub fn x(&self) -> u16 {
        u16::from_le_bytes([self.0[2], self.0[3]])
    }

    pub fn y(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    pub fn pressure(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }
}

impl From<[u8; PACKET_LEN]> for RawPacket {
    fn from(bytes: [u8; PACKET_LEN]) -> Self {
        Self(bytes)
    }
}

/// Decoded pen state from one position/pressure report
///
/// Values are passed through exactly as the device sent them; they are
/// not clamped to [`MAX_ABS_X`], [`MAX_ABS_Y`] or [`MAX_PRESSURE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PenState {
    pub x: u16,
    pub y: u16,
    pub pressure: u16,
    /// Tip / primary button (bit 0)
    pub primary_button: bool,
    /// First barrel button (bit 1)
    pub aux0: bool,
    /// Second barrel button (bit 2)
    pub aux1: bool,
}

/// Decoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenEvent {
    /// Position, pressure and button state
    PositionPressure(PenState),
    /// Report tag this decoder does not understand
    Unrecognized { tag: u8 },
}

impl PenEvent {
    /// Report tag of an unrecognized report, if any
    pub fn unrecognized_tag(&self) -> Option<u8> {
        match self {
            PenEvent::Unrecognized { tag } => Some(*tag),
            PenEvent::PositionPressure(_) => None,
        }
    }
}
