//! Primary and secondary packet headers

use serde::{Deserialize, Serialize};

use super::{check_width, read_u16_le, read_u32_le, require_len};
use crate::clock::MissionTime;
use crate::error::CodecError;

/// APID reserved for idle packets (all eleven bits set).
pub const IDLE_APID: u16 = 0x7FF;

/// Largest 14-bit sequence count / packet name.
pub const MAX_SEQUENCE: u16 = 0x3FFF;

/// Packet type bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Telemetry = 0,
    Telecommand = 1,
}

/// Sequence grouping flags for payloads spread over several packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupingFlag {
    Continuation = 0,
    First = 1,
    Last = 2,
    Unsegmented = 3,
}

impl GroupingFlag {
    /// Decode the low two bits.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => GroupingFlag::Continuation,
            1 => GroupingFlag::First,
            2 => GroupingFlag::Last,
            _ => GroupingFlag::Unsegmented,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// Packet primary header.
///
/// ```text
/// word 0 (LE): version[0..3] type[3] sec_hdr[4] apid[5..16]
/// word 1 (LE): grouping[0..2] sequence[2..16]
/// word 2 (LE): packet data length - 1
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub packet_type: PacketType,
    pub secondary_header: bool,
    pub apid: u16,
    pub grouping: GroupingFlag,
    /// Sequence count for telemetry, packet name for telecommands.
    pub sequence: u16,
    /// Octets in the packet data field minus one.
    pub data_length: u16,
}

impl PacketHeader {
    pub const LEN: usize = 6;

    pub fn encode(&self) -> Result<[u8; Self::LEN], CodecError> {
        check_width("version", u32::from(self.version), 3)?;
        check_width("apid", u32::from(self.apid), 11)?;
        check_width("sequence", u32::from(self.sequence), 14)?;

        let id = u16::from(self.version)
            | (self.packet_type as u16) << 3
            | u16::from(self.secondary_header) << 4
            | self.apid << 5;
        let seq = u16::from(self.grouping.bits()) | self.sequence << 2;

        let mut out = [0u8; Self::LEN];
        out[0..2].copy_from_slice(&id.to_le_bytes());
        out[2..4].copy_from_slice(&seq.to_le_bytes());
        out[4..6].copy_from_slice(&self.data_length.to_le_bytes());
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        require_len("primary header", data, Self::LEN)?;
        let id = read_u16_le(data, 0)?;
        let seq = read_u16_le(data, 2)?;
        let data_length = read_u16_le(data, 4)?;

        let packet_type =
            if (id >> 3) & 1 == 1 { PacketType::Telecommand } else { PacketType::Telemetry };

        Ok(Self {
            version: (id & 0x7) as u8,
            packet_type,
            secondary_header: (id >> 4) & 1 == 1,
            apid: id >> 5,
            grouping: GroupingFlag::from_bits((seq & 0x3) as u8),
            sequence: seq >> 2,
            data_length,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.apid == IDLE_APID
    }
}

/// Secondary header P-field describing the T-field encoding.
///
/// ```text
/// ext[0] time_code_id[1..4] basic_octets[4..6] fraction_octets[6..8]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PField {
    pub extension: bool,
    pub time_code_id: u8,
    /// Octets of basic time unit minus one.
    pub basic_octets: u8,
    /// Octets of fractional time unit.
    pub fraction_octets: u8,
}

impl PField {
    /// The only P-field this mission produces or accepts.
    pub const MISSION: PField =
        PField { extension: false, time_code_id: 2, basic_octets: 3, fraction_octets: 2 };

    pub fn encode(&self) -> Result<u8, CodecError> {
        check_width("p-field time code id", u32::from(self.time_code_id), 3)?;
        check_width("p-field basic octets", u32::from(self.basic_octets), 2)?;
        check_width("p-field fraction octets", u32::from(self.fraction_octets), 2)?;
        Ok(u8::from(self.extension)
            | self.time_code_id << 1
            | self.basic_octets << 4
            | self.fraction_octets << 6)
    }

    pub fn decode(byte: u8) -> Self {
        Self {
            extension: byte & 1 == 1,
            time_code_id: (byte >> 1) & 0x7,
            basic_octets: (byte >> 4) & 0x3,
            fraction_octets: (byte >> 6) & 0x3,
        }
    }
}

/// Secondary header: T-field (seconds, milliseconds, reserved byte) and P-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryHeader {
    pub time: MissionTime,
    pub reserved: u8,
    pub p_field: PField,
}

impl SecondaryHeader {
    pub const LEN: usize = 8;

    pub fn new(time: MissionTime) -> Self {
        Self { time, reserved: 0xFF, p_field: PField::MISSION }
    }

    pub fn encode(&self) -> Result<[u8; Self::LEN], CodecError> {
        let mut out = [0u8; Self::LEN];
        out[0..4].copy_from_slice(&self.time.seconds.to_le_bytes());
        out[4..6].copy_from_slice(&self.time.millis.to_le_bytes());
        out[6] = self.reserved;
        out[7] = self.p_field.encode()?;
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        require_len("secondary header", data, Self::LEN)?;
        let seconds = read_u32_le(data, 0)?;
        let millis = read_u16_le(data, 4)?;
        Ok(Self {
            time: MissionTime { seconds, millis },
            reserved: data[6],
            p_field: PField::decode(data[7]),
        })
    }
}
