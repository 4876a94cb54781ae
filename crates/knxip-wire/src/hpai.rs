//! Host protocol address information (HPAI).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use knxip_types::WireError;

use crate::encoding::{chop_slice, chop_u16, chop_u8};

/// HPAI structure length on the wire.
pub const HPAI_SIZE: usize = 8;

/// Host protocol codes carried in an HPAI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostProtocol {
    /// IPv4 over UDP
    Udp4 = 0x01,
    /// IPv4 over TCP
    Tcp4 = 0x02,
}

impl TryFrom<u8> for HostProtocol {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::Udp4),
            0x02 => Ok(Self::Tcp4),
            _ => Err(WireError::InvalidData),
        }
    }
}

/// Endpoint host + port as carried in KNXnet/IP bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hpai {
    pub protocol: HostProtocol,
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Hpai {
    /// UDP endpoint HPAI.
    pub fn udp(address: Ipv4Addr, port: u16) -> Self {
        Self {
            protocol: HostProtocol::Udp4,
            address,
            port,
        }
    }

    /// Decode an HPAI from the cursor.
    pub fn decode(data: &mut &[u8]) -> Result<Self, WireError> {
        let size = chop_u8(data).ok_or(WireError::Truncated)?;
        if size as usize != HPAI_SIZE {
            return Err(WireError::InvalidData);
        }
        let protocol = chop_u8(data).ok_or(WireError::Truncated)?;
        let mut ip = [0u8; 4];
        if !chop_slice(&mut ip, data) {
            return Err(WireError::Truncated);
        }
        let port = chop_u16(data).ok_or(WireError::Truncated)?;
        Ok(Self {
            protocol: HostProtocol::try_from(protocol)?,
            address: Ipv4Addr::from(ip),
            port,
        })
    }

    /// Append the wire representation.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(HPAI_SIZE as u8);
        out.push(self.protocol as u8);
        out.extend_from_slice(&self.address.octets());
        out.extend_from_slice(&self.port.to_be_bytes());
    }

    /// The endpoint as a socket address.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.port))
    }

    /// True when host or port are left empty, which signals NAT traversal.
    pub fn is_route_back(&self) -> bool {
        self.address.is_unspecified() || self.port == 0
    }
}
