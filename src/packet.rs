//! Packet framing and validation, and the retried packet exchanges the
//! engines are built from.
//!
//! A packet on the wire is:
//!
//! ```text
//! | marker: u16 | payload: 0..N bytes | crc16(marker + payload): u16 |
//! ```
//!
//! The marker says which of the four packet types this is, so a receiver
//! can reject anything other than the packet it expects next.
//!
//! Header packets carry a [`Header`].  Data packets carry a 32-bit length
//! followed by the data itself, and are built in place in the engine's
//! local buffer, with the data at [`DATA_OFFSET`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use crate::checksum::crc16;
use crate::timeout::TimeoutPolicy;
use crate::transport::Transport;
use crate::{Error, MIN_PACKET_SIZE, Result};

/// Size of the marker at the start of every packet
pub const MARKER_LEN: usize = 2;

/// Size of the checksum at the end of every packet
pub const CRC_LEN: usize = 2;

/// Size of the control word at the start of every engine payload
pub const CONTROL_LEN: usize = 4;

/// Bytes a packet adds around its payload
pub const FRAME_OVERHEAD: usize = MARKER_LEN + CRC_LEN;

/// Size of a complete header packet
pub const HEADER_PACKET_SIZE: usize = FRAME_OVERHEAD + Header::SIZE;

/// Bytes a data packet adds around its data
pub const DATA_PACKET_OVERHEAD: usize = FRAME_OVERHEAD + CONTROL_LEN;

/// Offset of the data within a data packet
pub const DATA_OFFSET: usize = MARKER_LEN + CONTROL_LEN;

/// Packet type markers.  Values are fixed by the wire protocol.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    CommandHeader = 0x1209,
    CommandData = 0xABD1,
    ResultHeader = 0x9021,
    ResultData = 0x1DBA,
}

impl Marker {
    pub const fn value(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Marker {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0x1209 => Ok(Marker::CommandHeader),
            0xABD1 => Ok(Marker::CommandData),
            0x9021 => Ok(Marker::ResultHeader),
            0x1DBA => Ok(Marker::ResultData),
            _ => Err(Error::MarkerMismatch),
        }
    }
}

/// Contents of a command-header or result-header packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Call identifier.  A result header echoes the identifier of the
    /// command it answers.
    pub rpc_id: u32,
    /// Length of the data in the data packet that follows
    pub data_len: u32,
}

impl Header {
    pub const SIZE: usize = 8;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..4].copy_from_slice(&self.rpc_id.to_le_bytes());
        bytes[4..].copy_from_slice(&self.data_len.to_le_bytes());
        bytes
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::SIZE {
            return Err(Error::Truncated);
        }
        Ok(Self {
            rpc_id: read_u32(&payload[..4]),
            data_len: read_u32(&payload[4..]),
        })
    }
}

/// Data bytes a local buffer of `buf_len` bytes can carry in one packet.
pub const fn data_capacity(buf_len: usize) -> usize {
    buf_len.saturating_sub(DATA_PACKET_OVERHEAD)
}

/// Frame `payload` as a packet of type `marker` into `out`.
///
/// Returns the length of the packet.
pub fn encode(marker: Marker, payload: &[u8], out: &mut [u8]) -> Result<usize> {
    let frame_len = payload.len() + FRAME_OVERHEAD;
    if out.len() < frame_len {
        return Err(Error::BufferTooSmall);
    }
    out[MARKER_LEN..MARKER_LEN + payload.len()].copy_from_slice(payload);
    encode_in_place(marker, payload.len(), out)
}

/// Frame a payload which is already at `buf[MARKER_LEN..]`, writing the
/// marker in front of it and the checksum behind it.
///
/// Returns the length of the packet.
pub fn encode_in_place(marker: Marker, payload_len: usize, buf: &mut [u8]) -> Result<usize> {
    let crc_offset = MARKER_LEN + payload_len;
    let frame_len = crc_offset + CRC_LEN;
    if buf.len() < frame_len {
        return Err(Error::BufferTooSmall);
    }
    buf[..MARKER_LEN].copy_from_slice(&marker.value().to_le_bytes());
    let crc = crc16(&buf[..crc_offset]);
    buf[crc_offset..frame_len].copy_from_slice(&crc.to_le_bytes());
    Ok(frame_len)
}

/// Validate `frame` as a packet of type `expected`, returning its payload.
pub fn decode(frame: &[u8], expected: Marker) -> Result<&[u8]> {
    if frame.len() < MIN_PACKET_SIZE {
        return Err(Error::Truncated);
    }
    let marker = u16::from_le_bytes([frame[0], frame[1]]);
    if marker != expected.value() {
        trace!("Expected marker {:#06X}, got {marker:#06X}", expected.value());
        return Err(Error::MarkerMismatch);
    }
    let crc_offset = frame.len() - CRC_LEN;
    let received = u16::from_le_bytes([frame[crc_offset], frame[crc_offset + 1]]);
    let computed = crc16(&frame[..crc_offset]);
    if received != computed {
        trace!("Checksum {received:#06X} != computed {computed:#06X}");
        return Err(Error::ChecksumMismatch);
    }
    Ok(&frame[MARKER_LEN..crc_offset])
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Build a complete header packet.
pub fn encode_header(marker: Marker, header: &Header) -> [u8; HEADER_PACKET_SIZE] {
    const CRC_OFFSET: usize = MARKER_LEN + Header::SIZE;

    let mut frame = [0u8; HEADER_PACKET_SIZE];
    frame[..MARKER_LEN].copy_from_slice(&marker.value().to_le_bytes());
    frame[MARKER_LEN..CRC_OFFSET].copy_from_slice(&header.to_bytes());
    let crc = crc16(&frame[..CRC_OFFSET]);
    frame[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Frame the `data_len` bytes of data at `buf[DATA_OFFSET..]` as a data
/// packet.  Returns the length of the packet.
pub fn encode_data_in_place(marker: Marker, data_len: usize, buf: &mut [u8]) -> Result<usize> {
    if data_len > data_capacity(buf.len()) {
        return Err(Error::PayloadTooLarge);
    }
    buf[MARKER_LEN..DATA_OFFSET].copy_from_slice(&(data_len as u32).to_le_bytes());
    encode_in_place(marker, CONTROL_LEN + data_len, buf)
}

/// Validate a data packet of type `expected` carrying `data_len` bytes of
/// data.  The data is left at `frame[DATA_OFFSET..]`.
pub fn decode_data(frame: &[u8], expected: Marker, data_len: usize) -> Result<()> {
    let payload = decode(frame, expected)?;
    if payload.len() != CONTROL_LEN + data_len || read_u32(payload) as usize != data_len {
        return Err(Error::SequenceMismatch);
    }
    Ok(())
}

/// Send a complete packet, retrying as `policy` dictates.
pub(crate) fn put_packet<T: Transport>(
    transport: &mut T,
    policy: &TimeoutPolicy,
    budget_ms: u32,
    frame: &[u8],
) -> Result<()> {
    policy
        .run(budget_ms, |timeout, _| transport.put_bytes(frame, timeout))
        .inspect_err(|e| error!("Failed to send {} byte packet: {e}", frame.len()))
}

/// Check a received header carries the identifier the receiver is waiting
/// for, if it is waiting for one.
pub(crate) fn check_echo(header: Header, expected_id: Option<u32>) -> Result<Header> {
    match expected_id {
        Some(rpc_id) if rpc_id != header.rpc_id => {
            trace!(
                "Header for {:#010X} while awaiting {rpc_id:#010X}",
                header.rpc_id
            );
            Err(Error::SequenceMismatch)
        }
        _ => Ok(header),
    }
}

/// Receive a header packet of type `marker`, retrying as `policy`
/// dictates.
///
/// With `expected_id` set, a header carrying any other identifier is
/// discarded and counts as a failed attempt.
pub(crate) fn get_header<T: Transport>(
    transport: &mut T,
    policy: &TimeoutPolicy,
    budget_ms: u32,
    marker: Marker,
    expected_id: Option<u32>,
) -> Result<Header> {
    let mut frame = [0u8; HEADER_PACKET_SIZE];
    policy.run(budget_ms, |timeout, _| {
        transport.get_bytes(&mut frame, timeout)?;
        decode(&frame, marker)
            .and_then(Header::from_payload)
            .and_then(|header| check_echo(header, expected_id))
            .inspect_err(|_| transport.flush())
    })
}

/// Receive a data packet of type `marker` carrying `data_len` bytes into
/// `buf`, retrying as `policy` dictates.  The data is left at
/// `buf[DATA_OFFSET..]`.
pub(crate) fn get_data<T: Transport>(
    transport: &mut T,
    policy: &TimeoutPolicy,
    budget_ms: u32,
    marker: Marker,
    buf: &mut [u8],
    data_len: usize,
) -> Result<()> {
    if data_len > data_capacity(buf.len()) {
        return Err(Error::PayloadTooLarge);
    }
    let frame = &mut buf[..data_len + DATA_PACKET_OVERHEAD];
    policy.run(budget_ms, |timeout, _| {
        transport.get_bytes(frame, timeout)?;
        decode_data(frame, marker, data_len).inspect_err(|_| transport.flush())
    })
}
