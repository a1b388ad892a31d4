//! Packet and transfer-frame codec
//!
//! Converts between structured packet records and the fixed byte layouts used
//! on the uplink, on the downlink and between in-process tasks.
//!
//! ## Layouts
//!
//! 1. **Primary header** (6 bytes) - packet id, sequence control, data length
//! 2. **Secondary header** (8 bytes) - T-field seconds/milliseconds, reserved
//!    byte, P-field
//! 3. **Telemetry packet** (1080 bytes) - headers + 1064 bytes user data +
//!    error control
//! 4. **Telemetry transfer frame** (1089 bytes) - 9 bytes of routing metadata
//!    + telemetry packet
//! 5. **Telecommand packet** (20 bytes) - headers + 4 bytes application data +
//!    error control
//! 6. **Command transfer frame** (15 bytes) - decoded command routing record
//!
//! Multi-byte fields are little-endian. Bit-fields are packed LSB-first
//! inside their little-endian word by explicit shift/mask routines.
//!
//! The error control field is carried but never computed: it is written as
//! `0xFFFF` and returned undecoded on the read side.

pub mod command;
pub mod header;
pub mod telemetry;

pub use command::{CommandTransferFrame, Telecommand, Timing};
pub use header::{GroupingFlag, PField, PacketHeader, PacketType, SecondaryHeader};
pub use telemetry::{
    TelemetryPacket, TelemetryTransferFrame, decode_telemetry_packet, encode_idle_packet,
    encode_telemetry_packet,
};

use crate::error::CodecError;

/// Value written into every error control field.
pub const ERROR_CONTROL_UNSET: u16 = 0xFFFF;

fn require_len(what: &'static str, data: &[u8], expected: usize) -> Result<(), CodecError> {
    if data.len() < expected {
        return Err(CodecError::Truncated { what, expected, actual: data.len() });
    }
    Ok(())
}

/// Safe byte parsing helpers with bounds checking
fn read_u16_le(data: &[u8], offset: usize) -> Result<u16, CodecError> {
    match data.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(CodecError::Truncated { what: "u16 field", expected: offset + 2, actual: data.len() }),
    }
}

fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, CodecError> {
    match data.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(CodecError::Truncated { what: "u32 field", expected: offset + 4, actual: data.len() }),
    }
}

/// Reject values that would spill out of a `bits`-wide field.
fn check_width(field: &'static str, value: u32, bits: u32) -> Result<(), CodecError> {
    if value >> bits != 0 {
        return Err(CodecError::FieldOverflow { field, value, bits });
    }
    Ok(())
}

fn expect_field(field: &'static str, expected: u32, found: u32) -> Result<(), CodecError> {
    if expected != found {
        return Err(CodecError::UnexpectedField { field, expected, found });
    }
    Ok(())
}
