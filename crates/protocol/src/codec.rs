//! Report decoding
//!
//! [`decode`] is total over every possible 8-byte report. Report formats are
//! selected per product through [`ReportFormat`]; only the G540 layout exists.

use crate::error::{ProtocolError, Result};
use crate::types::{PACKET_LEN, PEN_REPORT_TAG, PenEvent, PenState, RawPacket};

const BUTTON_PRIMARY: u8 = 0x01;
const BUTTON_AUX0: u8 = 0x02;
const BUTTON_AUX1: u8 = 0x04;

/// Packet layout of one tablet model
pub trait ReportFormat: Send + Sync {
    /// Human-readable format name for diagnostics
    fn name(&self) -> &'static str;

    /// Decode one report. Must be pure and total.
    fn decode(&self, packet: &RawPacket) -> PenEvent;
}

/// XP-Pen G540 report layout
#[derive(Debug, Clone, Copy, Default)]
pub struct G540Format;

impl ReportFormat for G540Format {
    fn name(&self) -> &'static str {
        "xp-pen g540"
    }

    fn decode(&self, packet: &RawPacket) -> PenEvent {
        decode(packet)
    }
}

static G540: G540Format = G540Format;

/// Select the report format for a product ID
///
/// Every known product currently shares the G540 layout.
pub fn format_for_product(_product_id: u16) -> &'static dyn ReportFormat {
    &G540
}

/// Decode a full report
pub fn decode(packet: &RawPacket) -> PenEvent {
    let tag = packet.report_tag();
    if tag != PEN_REPORT_TAG {
        return PenEvent::Unrecognized { tag };
    }

    let buttons = packet.button_bits();
    PenEvent::PositionPressure(PenState {
        x: packet.x(),
        y: packet.y(),
        pressure: packet.pressure(),
        primary_button: buttons & BUTTON_PRIMARY != 0,
        aux0: buttons & BUTTON_AUX0 != 0,
        aux1: buttons & BUTTON_AUX1 != 0,
    })
}

/// Decode a report from a slice of whatever length the transport delivered
///
/// Only byte 0 is read unless it carries the pen report tag. Bytes past
/// [`PACKET_LEN`] are ignored.
pub fn decode_bytes(bytes: &[u8]) -> Result<PenEvent> {
    let tag = *bytes.first().ok_or(ProtocolError::Empty)?;
    if tag != PEN_REPORT_TAG {
        return Ok(PenEvent::Unrecognized { tag });
    }

    let report = bytes
        .get(..PACKET_LEN)
        .ok_or(ProtocolError::Truncated {
            tag,
            needed: PACKET_LEN,
            available: bytes.len(),
        })?;

    Ok(decode(&RawPacket::from_bytes(report)?))
}
