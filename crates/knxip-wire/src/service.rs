//! Connection-header service bodies: request, ack, connection state.

use knxip_types::WireError;

use crate::encoding::{chop_u8, chop_bytes};
use crate::header::KnxHeader;
use crate::hpai::Hpai;

/// Connection header length preceding request/ack payloads.
const CONNECTION_HEADER_SIZE: usize = 4;

/// KNXnet/IP error codes used by the data-endpoint protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    NoError = 0x00,
    HostProtocolType = 0x01,
    VersionNotSupported = 0x02,
    SequenceNumber = 0x04,
    ConnectionId = 0x21,
    ConnectionType = 0x22,
    ConnectionOption = 0x23,
    NoMoreConnections = 0x24,
    DataConnection = 0x26,
    KnxConnection = 0x27,
    TunnelingLayer = 0x29,
}

impl ErrorCode {
    /// Short description, for logs and status rendering.
    pub fn message(self) -> &'static str {
        match self {
            Self::NoError => "success",
            Self::HostProtocolType => "host protocol type not supported",
            Self::VersionNotSupported => "protocol version not supported",
            Self::SequenceNumber => "sequence number out of order",
            Self::ConnectionId => "no active connection with that ID",
            Self::ConnectionType => "connection type not supported",
            Self::ConnectionOption => "connection option not supported",
            Self::NoMoreConnections => "no more connections accepted",
            Self::DataConnection => "error in data connection",
            Self::KnxConnection => "error in KNX connection",
            Self::TunnelingLayer => "tunneling layer not supported",
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(code: ErrorCode) -> u8 {
        code as u8
    }
}

/// Build a complete frame from a service type and body.
pub fn to_packet(service_type: u16, body: &[u8]) -> Vec<u8> {
    let header = KnxHeader::new(service_type, body.len());
    let mut out = Vec::with_capacity(header.total_length);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(body);
    out
}

/// Tunneling or device-configuration request body: connection header plus an
/// opaque cEMI payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub channel_id: u8,
    pub seq: u8,
    pub cemi: Vec<u8>,
}

impl ServiceRequest {
    pub fn new(channel_id: u8, seq: u8, cemi: Vec<u8>) -> Self {
        Self {
            channel_id,
            seq,
            cemi,
        }
    }

    /// Decode a request body (the bytes after the KNXnet/IP header).
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut cursor = body;
        let size = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        if size as usize != CONNECTION_HEADER_SIZE {
            return Err(WireError::InvalidData);
        }
        let channel_id = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let seq = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let _reserved = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        Ok(Self {
            channel_id,
            seq,
            cemi: cursor.to_vec(),
        })
    }

    /// Encode as a complete frame under the given service type.
    pub fn to_packet(&self, service_type: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(CONNECTION_HEADER_SIZE + self.cemi.len());
        body.push(CONNECTION_HEADER_SIZE as u8);
        body.push(self.channel_id);
        body.push(self.seq);
        body.push(0);
        body.extend_from_slice(&self.cemi);
        to_packet(service_type, &body)
    }
}

/// Tunneling or device-configuration acknowledgment body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceAck {
    pub channel_id: u8,
    pub seq: u8,
    pub status: u8,
}

impl ServiceAck {
    pub fn new(channel_id: u8, seq: u8, status: ErrorCode) -> Self {
        Self {
            channel_id,
            seq,
            status: status.into(),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut cursor = body;
        let size = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        if size as usize != CONNECTION_HEADER_SIZE {
            return Err(WireError::InvalidData);
        }
        let channel_id = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let seq = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let status = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        Ok(Self {
            channel_id,
            seq,
            status,
        })
    }

    pub fn to_packet(&self, service_type: u16) -> Vec<u8> {
        to_packet(
            service_type,
            &[
                CONNECTION_HEADER_SIZE as u8,
                self.channel_id,
                self.seq,
                self.status,
            ],
        )
    }
}

/// Connection-state request body: channel id plus the client control HPAI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionstateRequest {
    pub channel_id: u8,
    pub control_endpoint: Hpai,
}

impl ConnectionstateRequest {
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut cursor = body;
        let channel_id = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let _reserved = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let control_endpoint = Hpai::decode(&mut cursor)?;
        Ok(Self {
            channel_id,
            control_endpoint,
        })
    }

    pub fn to_packet(&self, service_type: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(10);
        body.push(self.channel_id);
        body.push(0);
        self.control_endpoint.encode(&mut body);
        to_packet(service_type, &body)
    }
}

/// Connection-state response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionstateResponse {
    pub channel_id: u8,
    pub status: u8,
}

impl ConnectionstateResponse {
    pub fn new(channel_id: u8, status: ErrorCode) -> Self {
        Self {
            channel_id,
            status: status.into(),
        }
    }

    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut cursor = body;
        let channel_id = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let status = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        Ok(Self { channel_id, status })
    }

    pub fn to_packet(&self) -> Vec<u8> {
        to_packet(
            crate::header::service_type::CONNECTIONSTATE_RES,
            &[self.channel_id, self.status],
        )
    }
}

/// Split a frame into its parsed header and body slice.
pub fn split_packet(packet: &[u8]) -> Result<(KnxHeader, &[u8]), WireError> {
    let header = KnxHeader::parse(packet)?;
    if packet.len() < header.total_length {
        return Err(WireError::Truncated);
    }
    let mut cursor = &packet[crate::header::HEADER_SIZE..];
    let body = chop_bytes(&mut cursor, header.body_length()).ok_or(WireError::Truncated)?;
    Ok((header, body))
}
