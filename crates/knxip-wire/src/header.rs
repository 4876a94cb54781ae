//! KNXnet/IP frame header.

use knxip_types::{WireError, KNXNETIP_VERSION_10};

/// Length of the KNXnet/IP header, fixed for protocol version 1.0.
pub const HEADER_SIZE: usize = 6;

/// Service type identifiers used by the server core.
pub mod service_type {
    pub const CONNECT_REQ: u16 = 0x0205;
    pub const CONNECTIONSTATE_REQ: u16 = 0x0207;
    pub const CONNECTIONSTATE_RES: u16 = 0x0208;
    pub const DISCONNECT_REQ: u16 = 0x0209;

    pub const DEVICE_CONFIGURATION_REQ: u16 = 0x0310;
    pub const DEVICE_CONFIGURATION_ACK: u16 = 0x0311;

    pub const TUNNELING_REQ: u16 = 0x0420;
    pub const TUNNELING_ACK: u16 = 0x0421;
    pub const TUNNELING_FEATURE_GET: u16 = 0x0422;
    pub const TUNNELING_FEATURE_RESPONSE: u16 = 0x0423;
    pub const TUNNELING_FEATURE_SET: u16 = 0x0424;

    pub const SECURE_SVC: u16 = 0x0950;
    pub const SESSION_REQ: u16 = 0x0951;
    pub const SESSION_RES: u16 = 0x0952;
    pub const SESSION_AUTH: u16 = 0x0953;
    pub const SESSION_STATUS: u16 = 0x0954;
}

/// Parsed 6-byte KNXnet/IP header.
///
/// Layout: header size (0x06), protocol version, service type (u16 BE),
/// total frame length (u16 BE) including the header itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnxHeader {
    pub service_type: u16,
    pub version: u8,
    pub total_length: usize,
}

impl KnxHeader {
    /// Header for a new outbound frame carrying `body_len` bytes.
    pub fn new(service_type: u16, body_len: usize) -> Self {
        Self {
            service_type,
            version: KNXNETIP_VERSION_10,
            total_length: HEADER_SIZE + body_len,
        }
    }

    /// Parse a header from the start of a datagram.
    ///
    /// The header-size octet must be 0x06; the version octet is carried
    /// through and checked by the protocol layer, not here.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_SIZE {
            return Err(WireError::Truncated);
        }
        if data[0] as usize != HEADER_SIZE {
            return Err(WireError::BadHeader);
        }
        let service_type = u16::from_be_bytes([data[2], data[3]]);
        let total_length = u16::from_be_bytes([data[4], data[5]]) as usize;
        if total_length < HEADER_SIZE {
            return Err(WireError::BadHeader);
        }
        Ok(Self {
            service_type,
            version: data[1],
            total_length,
        })
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let svc = self.service_type.to_be_bytes();
        let len = (self.total_length as u16).to_be_bytes();
        [HEADER_SIZE as u8, self.version, svc[0], svc[1], len[0], len[1]]
    }

    /// Length of the frame body following the header.
    #[inline]
    pub fn body_length(&self) -> usize {
        self.total_length - HEADER_SIZE
    }

    /// True for the KNX IP Secure service family.
    #[inline]
    pub fn is_secure(&self) -> bool {
        (service_type::SECURE_SVC..=service_type::SESSION_STATUS).contains(&self.service_type)
    }

    /// True when the version octet is the supported 1.0.
    #[inline]
    pub fn is_version_10(&self) -> bool {
        self.version == KNXNETIP_VERSION_10
    }
}
