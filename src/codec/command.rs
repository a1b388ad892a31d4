//! Uplinked telecommand packets and the command transfer frames built from them.

use super::header::{GroupingFlag, PField, PacketHeader, PacketType, SecondaryHeader};
use super::{ERROR_CONTROL_UNSET, check_width, expect_field, read_u16_le, read_u32_le, require_len};
use crate::clock::MissionTime;
use crate::error::{CodecError, CommandError};

/// Size of one uplinked telecommand packet.
pub const TELECOMMAND_PACKET_LEN: usize = 20;

/// Largest 31-bit command argument.
pub const MAX_ARGUMENT: u32 = 0x7FFF_FFFF;

const APP_DATA_OFFSET: usize = PacketHeader::LEN + SecondaryHeader::LEN;
const ERROR_CONTROL_OFFSET: usize = APP_DATA_OFFSET + 4;
const TELECOMMAND_DATA_LENGTH: u16 = (TELECOMMAND_PACKET_LEN - PacketHeader::LEN - 1) as u16;

/// When a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    /// ATC flag 0: dispatch on arrival.
    Immediate,
    /// ATC flag 1: hold until the execution time.
    Absolute,
}

/// Decoded 20-byte telecommand.
///
/// Application data word: bit 0 is the ATC flag, bits 1..32 the argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Telecommand {
    pub header: PacketHeader,
    pub secondary: SecondaryHeader,
    pub atc: bool,
    pub argument: u32,
    pub error_control: u16,
}

impl Telecommand {
    /// Ground-side constructor with mission header defaults.
    pub fn new(apid: u16, packet_name: u16, execution_time: MissionTime, atc: bool, argument: u32) -> Self {
        Self {
            header: PacketHeader {
                version: 0,
                packet_type: PacketType::Telecommand,
                secondary_header: true,
                apid,
                grouping: GroupingFlag::Unsegmented,
                sequence: packet_name,
                data_length: TELECOMMAND_DATA_LENGTH,
            },
            secondary: SecondaryHeader::new(execution_time),
            atc,
            argument,
            error_control: ERROR_CONTROL_UNSET,
        }
    }

    pub fn packet_name(&self) -> u16 {
        self.header.sequence
    }

    pub fn execution_time(&self) -> MissionTime {
        self.secondary.time
    }

    pub fn encode(&self) -> Result<[u8; TELECOMMAND_PACKET_LEN], CodecError> {
        check_width("argument", self.argument, 31)?;
        let app_data = u32::from(self.atc) | self.argument << 1;

        let mut out = [0u8; TELECOMMAND_PACKET_LEN];
        out[..PacketHeader::LEN].copy_from_slice(&self.header.encode()?);
        out[PacketHeader::LEN..APP_DATA_OFFSET].copy_from_slice(&self.secondary.encode()?);
        out[APP_DATA_OFFSET..ERROR_CONTROL_OFFSET].copy_from_slice(&app_data.to_le_bytes());
        out[ERROR_CONTROL_OFFSET..].copy_from_slice(&self.error_control.to_le_bytes());
        Ok(out)
    }

    /// Parse and check the fixed header fields.
    ///
    /// Version must be 0, type telecommand, secondary header present,
    /// data length 13 and the P-field the mission one. The execution time is
    /// checked against the clock by the command processor, not here.
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        require_len("telecommand packet", data, TELECOMMAND_PACKET_LEN)?;

        let header = PacketHeader::decode(data)?;
        expect_field("version", 0, u32::from(header.version))?;
        expect_field("packet type", PacketType::Telecommand as u32, header.packet_type as u32)?;
        expect_field("secondary header flag", 1, u32::from(header.secondary_header))?;
        expect_field(
            "telecommand data length",
            u32::from(TELECOMMAND_DATA_LENGTH),
            u32::from(header.data_length),
        )?;

        let secondary = SecondaryHeader::decode(&data[PacketHeader::LEN..])?;
        let expected = PField::MISSION.encode()?;
        let found = secondary.p_field.encode()?;
        expect_field("p-field", u32::from(expected), u32::from(found))?;

        let app_data = read_u32_le(data, APP_DATA_OFFSET)?;
        let error_control = read_u16_le(data, ERROR_CONTROL_OFFSET)?;

        Ok(Self { header, secondary, atc: app_data & 1 == 1, argument: app_data >> 1, error_control })
    }

    pub fn to_transfer_frame(&self) -> CommandTransferFrame {
        CommandTransferFrame {
            apid: self.header.apid,
            packet_name: self.header.sequence,
            atc_flag: u8::from(self.atc),
            execution_time: self.secondary.time,
            argument: self.argument,
        }
    }
}

/// Decoded command as passed between command tasks.
///
/// ```text
/// offset  0: apid u16 LE
/// offset  2: packet name u16 LE
/// offset  4: ATC flag u8
/// offset  5: execution seconds u32 LE
/// offset  9: execution milliseconds u16 LE
/// offset 11: argument u32 LE
/// ```
///
/// `atc_flag` stays a raw byte so out-of-range values can be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTransferFrame {
    pub apid: u16,
    pub packet_name: u16,
    pub atc_flag: u8,
    pub execution_time: MissionTime,
    pub argument: u32,
}

impl CommandTransferFrame {
    pub const LEN: usize = 15;

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..2].copy_from_slice(&self.apid.to_le_bytes());
        out[2..4].copy_from_slice(&self.packet_name.to_le_bytes());
        out[4] = self.atc_flag;
        out[5..9].copy_from_slice(&self.execution_time.seconds.to_le_bytes());
        out[9..11].copy_from_slice(&self.execution_time.millis.to_le_bytes());
        out[11..15].copy_from_slice(&self.argument.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        require_len("command transfer frame", data, Self::LEN)?;
        Ok(Self {
            apid: read_u16_le(data, 0)?,
            packet_name: read_u16_le(data, 2)?,
            atc_flag: data[4],
            execution_time: MissionTime { seconds: read_u32_le(data, 5)?, millis: read_u16_le(data, 9)? },
            argument: read_u32_le(data, 11)?,
        })
    }

    pub fn timing(&self) -> Result<Timing, CommandError> {
        match self.atc_flag {
            0 => Ok(Timing::Immediate),
            1 => Ok(Timing::Absolute),
            other => Err(CommandError::invalid(format!("ATC flag {other} is neither 0 nor 1"))),
        }
    }

    /// Copy marked for immediate dispatch.
    pub fn released(&self) -> Self {
        Self { atc_flag: 0, ..*self }
    }
}
