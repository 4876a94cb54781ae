//! KNX individual address.
//!
//! Individual addresses identify physical devices on the KNX bus.
//! Format: area.line.device, 4 + 4 + 8 bits.

use std::fmt;
use std::str::FromStr;

use crate::error::WireError;

/// KNX individual address (area.line.device).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IndividualAddress {
    raw: u16,
}

impl IndividualAddress {
    /// Create an address from its components.
    ///
    /// Returns `WireError::InvalidData` when area or line exceed 4 bits.
    pub fn new(area: u8, line: u8, device: u8) -> Result<Self, WireError> {
        if area > 0x0F || line > 0x0F {
            return Err(WireError::InvalidData);
        }
        let raw = (u16::from(area) << 12) | (u16::from(line) << 8) | u16::from(device);
        Ok(Self { raw })
    }

    /// The raw 16-bit representation.
    #[inline]
    pub fn raw(self) -> u16 {
        self.raw
    }

    /// Area component (0-15).
    #[inline]
    pub fn area(self) -> u8 {
        (self.raw >> 12) as u8
    }

    /// Line component (0-15).
    #[inline]
    pub fn line(self) -> u8 {
        ((self.raw >> 8) & 0x0F) as u8
    }

    /// Device component (0-255).
    #[inline]
    pub fn device(self) -> u8 {
        (self.raw & 0xFF) as u8
    }

    /// True for the unassigned address 0.0.0, used by clients that expect
    /// the server to fill in the source address.
    #[inline]
    pub fn is_unassigned(self) -> bool {
        self.raw == 0
    }

    /// Big-endian wire representation.
    #[inline]
    pub fn to_bytes(self) -> [u8; 2] {
        self.raw.to_be_bytes()
    }

    /// Parse from the big-endian wire representation.
    #[inline]
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self {
            raw: u16::from_be_bytes(bytes),
        }
    }
}

impl From<u16> for IndividualAddress {
    fn from(raw: u16) -> Self {
        Self { raw }
    }
}

impl From<IndividualAddress> for u16 {
    fn from(addr: IndividualAddress) -> Self {
        addr.raw
    }
}

impl fmt::Display for IndividualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.area(), self.line(), self.device())
    }
}

impl FromStr for IndividualAddress {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let area = parts.next().ok_or(WireError::InvalidData)?;
        let line = parts.next().ok_or(WireError::InvalidData)?;
        let device = parts.next().ok_or(WireError::InvalidData)?;
        if parts.next().is_some() {
            return Err(WireError::InvalidData);
        }
        let area = area.parse().map_err(|_| WireError::InvalidData)?;
        let line = line.parse().map_err(|_| WireError::InvalidData)?;
        let device = device.parse().map_err(|_| WireError::InvalidData)?;
        Self::new(area, line, device)
    }
}
