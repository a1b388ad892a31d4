//! Telemetry packets and the transfer frames that carry them between tasks.

use std::sync::Arc;

use super::header::{GroupingFlag, IDLE_APID, PacketHeader, PacketType, SecondaryHeader};
use super::{ERROR_CONTROL_UNSET, expect_field, read_u16_le, read_u32_le, require_len};
use crate::clock::MissionTime;
use crate::error::CodecError;

/// Bytes of application data in every telemetry packet.
pub const USER_DATA_LEN: usize = 1064;

/// Total telemetry packet size on the downlink.
pub const TELEMETRY_PACKET_LEN: usize =
    PacketHeader::LEN + SecondaryHeader::LEN + USER_DATA_LEN + ERROR_CONTROL_LEN;

/// Routing metadata in front of every in-process telemetry packet.
pub const TRANSFER_PREFIX_LEN: usize = 9;

pub const TRANSFER_FRAME_LEN: usize = TRANSFER_PREFIX_LEN + TELEMETRY_PACKET_LEN;

/// Unused user data is padded with ASCII 'E'.
pub const FILLER_BYTE: u8 = b'E';

const ERROR_CONTROL_LEN: usize = 2;
const USER_DATA_OFFSET: usize = PacketHeader::LEN + SecondaryHeader::LEN;
const ERROR_CONTROL_OFFSET: usize = USER_DATA_OFFSET + USER_DATA_LEN;
const TELEMETRY_DATA_LENGTH: u16 = (TELEMETRY_PACKET_LEN - PacketHeader::LEN - 1) as u16;

/// Decoded telemetry packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryPacket {
    pub header: PacketHeader,
    pub secondary: SecondaryHeader,
    /// Always [`USER_DATA_LEN`] bytes, filler included.
    pub user_data: Vec<u8>,
    pub error_control: u16,
}

/// Build a 1080-byte telemetry packet.
///
/// `payload` shorter than the user data field is padded with [`FILLER_BYTE`].
/// The idle APID is refused here; use [`encode_idle_packet`].
pub fn encode_telemetry_packet(
    payload: &[u8],
    apid: u16,
    grouping: GroupingFlag,
    sequence: u16,
    time: MissionTime,
) -> Result<[u8; TELEMETRY_PACKET_LEN], CodecError> {
    if apid == IDLE_APID {
        return Err(CodecError::ReservedApid { apid });
    }
    build_packet(payload, apid, grouping, sequence, time)
}

/// Build an idle packet: reserved APID, all user data filler.
pub fn encode_idle_packet(
    sequence: u16,
    time: MissionTime,
) -> Result<[u8; TELEMETRY_PACKET_LEN], CodecError> {
    build_packet(&[], IDLE_APID, GroupingFlag::Unsegmented, sequence, time)
}

fn build_packet(
    payload: &[u8],
    apid: u16,
    grouping: GroupingFlag,
    sequence: u16,
    time: MissionTime,
) -> Result<[u8; TELEMETRY_PACKET_LEN], CodecError> {
    if payload.len() > USER_DATA_LEN {
        return Err(CodecError::PayloadTooLarge { len: payload.len(), max: USER_DATA_LEN });
    }

    let header = PacketHeader {
        version: 0,
        packet_type: PacketType::Telemetry,
        secondary_header: true,
        apid,
        grouping,
        sequence,
        data_length: TELEMETRY_DATA_LENGTH,
    };

    let mut out = [FILLER_BYTE; TELEMETRY_PACKET_LEN];
    out[..PacketHeader::LEN].copy_from_slice(&header.encode()?);
    out[PacketHeader::LEN..USER_DATA_OFFSET].copy_from_slice(&SecondaryHeader::new(time).encode()?);
    out[USER_DATA_OFFSET..USER_DATA_OFFSET + payload.len()].copy_from_slice(payload);
    out[ERROR_CONTROL_OFFSET..].copy_from_slice(&ERROR_CONTROL_UNSET.to_le_bytes());
    Ok(out)
}

/// Parse a telemetry packet. Trailing bytes past [`TELEMETRY_PACKET_LEN`] are ignored.
pub fn decode_telemetry_packet(data: &[u8]) -> Result<TelemetryPacket, CodecError> {
    require_len("telemetry packet", data, TELEMETRY_PACKET_LEN)?;

    let header = PacketHeader::decode(data)?;
    expect_field("packet type", PacketType::Telemetry as u32, header.packet_type as u32)?;
    expect_field(
        "telemetry data length",
        u32::from(TELEMETRY_DATA_LENGTH),
        u32::from(header.data_length),
    )?;

    let secondary = SecondaryHeader::decode(&data[PacketHeader::LEN..])?;
    let user_data = data[USER_DATA_OFFSET..ERROR_CONTROL_OFFSET].to_vec();
    let error_control = read_u16_le(data, ERROR_CONTROL_OFFSET)?;

    Ok(TelemetryPacket { header, secondary, user_data, error_control })
}

/// A telemetry packet plus its routing metadata.
///
/// ```text
/// offset 0: apid u16 LE
/// offset 2: grouping flag u8
/// offset 3: creation seconds u32 LE
/// offset 7: creation milliseconds u16 LE
/// offset 9: telemetry packet (1080 bytes)
/// ```
///
/// Immutable once built; clones share the packet bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryTransferFrame {
    apid: u16,
    grouping: GroupingFlag,
    created: MissionTime,
    packet: Arc<[u8]>,
}

impl TelemetryTransferFrame {
    /// Encode `payload` into a packet and wrap it.
    pub fn new(
        payload: &[u8],
        apid: u16,
        grouping: GroupingFlag,
        sequence: u16,
        created: MissionTime,
    ) -> Result<Self, CodecError> {
        let packet = encode_telemetry_packet(payload, apid, grouping, sequence, created)?;
        Ok(Self { apid, grouping, created, packet: Arc::from(&packet[..]) })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        require_len("telemetry transfer frame", data, TRANSFER_FRAME_LEN)?;
        let apid = read_u16_le(data, 0)?;
        let grouping = GroupingFlag::from_bits(data[2]);
        let created = MissionTime { seconds: read_u32_le(data, 3)?, millis: read_u16_le(data, 7)? };
        let packet = Arc::from(&data[TRANSFER_PREFIX_LEN..TRANSFER_FRAME_LEN]);
        Ok(Self { apid, grouping, created, packet })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TRANSFER_FRAME_LEN);
        out.extend_from_slice(&self.apid.to_le_bytes());
        out.push(self.grouping.bits());
        out.extend_from_slice(&self.created.seconds.to_le_bytes());
        out.extend_from_slice(&self.created.millis.to_le_bytes());
        out.extend_from_slice(&self.packet);
        out
    }

    pub fn apid(&self) -> u16 {
        self.apid
    }

    pub fn grouping(&self) -> GroupingFlag {
        self.grouping
    }

    pub fn created(&self) -> MissionTime {
        self.created
    }

    /// The 1080 bytes that go out on the downlink.
    pub fn packet(&self) -> &[u8] {
        &self.packet
    }

    pub fn decode_packet(&self) -> Result<TelemetryPacket, CodecError> {
        decode_telemetry_packet(&self.packet)
    }
}
