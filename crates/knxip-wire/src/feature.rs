//! Tunneling-feature service bodies.
//!
//! Feature get/set requests and their responses share the connection header
//! of the other data-endpoint services, followed by the feature identifier
//! and, depending on the service, a return code and value bytes.

use knxip_types::WireError;

use crate::encoding::chop_u8;
use crate::header::service_type;
use crate::service::to_packet;

/// Interface feature identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterfaceFeature {
    SupportedEmiTypes = 1,
    DeviceDescriptorType0 = 2,
    ConnectionStatus = 3,
    Manufacturer = 4,
    ActiveEmiType = 5,
    IndividualAddress = 6,
    MaxApduLength = 7,
    EnableFeatureInfoService = 8,
}

impl TryFrom<u8> for InterfaceFeature {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::SupportedEmiTypes),
            2 => Ok(Self::DeviceDescriptorType0),
            3 => Ok(Self::ConnectionStatus),
            4 => Ok(Self::Manufacturer),
            5 => Ok(Self::ActiveEmiType),
            6 => Ok(Self::IndividualAddress),
            7 => Ok(Self::MaxApduLength),
            8 => Ok(Self::EnableFeatureInfoService),
            _ => Err(WireError::InvalidData),
        }
    }
}

/// Return codes carried in feature responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FeatureResult {
    Success = 0x00,
    InvalidCommand = 0x01,
    ImpossibleCommand = 0x02,
    ExceedsMaxApduLength = 0x03,
    DataOverflow = 0x04,
    OutOfMinRange = 0x05,
    OutOfMaxRange = 0x06,
    DataVoid = 0x07,
    TemporarilyNotAvailable = 0x08,
    AccessWriteOnly = 0x09,
    AccessReadOnly = 0x0A,
    AccessDenied = 0x0B,
    AddressVoid = 0x0C,
    AddressIndexNotWritable = 0x0D,
}

/// A parsed tunneling-feature frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelingFeature {
    pub channel_id: u8,
    pub seq: u8,
    pub feature: InterfaceFeature,
    pub value: Vec<u8>,
}

impl TunnelingFeature {
    /// Decode a feature-get or feature-set body.
    ///
    /// Both carry one reserved byte after the feature id; a set additionally
    /// carries the value to write.
    pub fn decode(svc: u16, body: &[u8]) -> Result<Self, WireError> {
        if svc != service_type::TUNNELING_FEATURE_GET && svc != service_type::TUNNELING_FEATURE_SET
        {
            return Err(WireError::Decode);
        }
        let mut cursor = body;
        let size = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        if size != 4 {
            return Err(WireError::InvalidData);
        }
        let channel_id = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let seq = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let _reserved = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let feature = InterfaceFeature::try_from(chop_u8(&mut cursor).ok_or(WireError::Truncated)?)?;
        let _reserved = chop_u8(&mut cursor).ok_or(WireError::Truncated)?;
        let value = cursor.to_vec();
        if svc == service_type::TUNNELING_FEATURE_SET && value.is_empty() {
            return Err(WireError::Truncated);
        }
        Ok(Self {
            channel_id,
            seq,
            feature,
            value,
        })
    }

    /// Encode a feature-get or feature-set frame.
    pub fn to_packet(&self, svc: u16) -> Vec<u8> {
        let mut body = Vec::with_capacity(6 + self.value.len());
        body.push(4);
        body.push(self.channel_id);
        body.push(self.seq);
        body.push(0);
        body.push(self.feature as u8);
        body.push(0);
        body.extend_from_slice(&self.value);
        to_packet(svc, &body)
    }

    /// Build a feature-response frame.
    pub fn response(
        channel_id: u8,
        seq: u8,
        feature: InterfaceFeature,
        result: FeatureResult,
        value: &[u8],
    ) -> Vec<u8> {
        let mut body = Vec::with_capacity(6 + value.len());
        body.push(4);
        body.push(channel_id);
        body.push(seq);
        body.push(0);
        body.push(feature as u8);
        body.push(result as u8);
        body.extend_from_slice(value);
        to_packet(service_type::TUNNELING_FEATURE_RESPONSE, &body)
    }
}
