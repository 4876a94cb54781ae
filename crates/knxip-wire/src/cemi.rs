//! Opaque cEMI frame with a tagged message code.
//!
//! The server core does not interpret cEMI payloads beyond the message code
//! and, for L_Data frames, the source-address slot it may have to fill in.

use std::fmt;

use knxip_types::{IndividualAddress, WireError};

/// cEMI message codes the server core distinguishes.
pub mod message_code {
    pub const L_DATA_REQ: u8 = 0x11;
    pub const L_DATA_IND: u8 = 0x29;
    pub const L_DATA_CON: u8 = 0x2E;
    pub const BUSMON_IND: u8 = 0x2B;

    pub const PROPREAD_REQ: u8 = 0xFC;
    pub const PROPREAD_CON: u8 = 0xFB;
    pub const PROPWRITE_REQ: u8 = 0xF6;
    pub const PROPWRITE_CON: u8 = 0xF5;
    pub const PROPINFO_IND: u8 = 0xF7;
    pub const RESET_REQ: u8 = 0xF1;
    pub const RESET_IND: u8 = 0xF0;
}

/// Frame class a message code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CemiClass {
    /// L_Data link-layer frames
    LData,
    /// Bus monitor indications
    BusMonitor,
    /// Device-management frames
    DeviceMgmt,
}

/// An opaque cEMI frame.
#[derive(Clone, PartialEq, Eq)]
pub struct CemiFrame {
    data: Vec<u8>,
}

impl CemiFrame {
    /// Wrap raw cEMI bytes. At least the message code octet must be present.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, WireError> {
        if data.is_empty() {
            return Err(WireError::Truncated);
        }
        Ok(Self { data })
    }

    /// The tagged message code.
    #[inline]
    pub fn message_code(&self) -> u8 {
        self.data[0]
    }

    /// Frame class of the message code, if recognized.
    pub fn class(&self) -> Option<CemiClass> {
        use message_code::*;
        match self.message_code() {
            L_DATA_REQ | L_DATA_IND | L_DATA_CON => Some(CemiClass::LData),
            BUSMON_IND => Some(CemiClass::BusMonitor),
            PROPREAD_REQ | PROPREAD_CON | PROPWRITE_REQ | PROPWRITE_CON | PROPINFO_IND
            | RESET_REQ | RESET_IND => Some(CemiClass::DeviceMgmt),
            _ => None,
        }
    }

    /// Raw frame bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume into the raw bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Offset of the L_Data source address: message code, additional-info
    /// length, additional info, then the two control fields.
    fn source_offset(&self) -> Option<usize> {
        if self.class() != Some(CemiClass::LData) {
            return None;
        }
        let addl = *self.data.get(1)? as usize;
        let offset = 2 + addl + 2;
        if self.data.len() < offset + 4 {
            return None;
        }
        Some(offset)
    }

    /// Source individual address of an L_Data frame.
    pub fn source(&self) -> Option<IndividualAddress> {
        let offset = self.source_offset()?;
        Some(IndividualAddress::from_bytes([
            self.data[offset],
            self.data[offset + 1],
        ]))
    }

    /// Rewrite the source address of an L_Data frame in place. Returns false
    /// when the frame is not L_Data or too short to carry one.
    pub fn rewrite_source(&mut self, source: IndividualAddress) -> bool {
        match self.source_offset() {
            Some(offset) => {
                let bytes = source.to_bytes();
                self.data[offset] = bytes[0];
                self.data[offset + 1] = bytes[1];
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for CemiFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CemiFrame(mc 0x{:02X}, {} bytes)",
            self.message_code(),
            self.data.len()
        )
    }
}
