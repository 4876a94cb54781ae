//! KNXnet/IP frame and service body codec.
//!
//! Parses and serializes the 6-byte KNXnet/IP header and the service bodies
//! the data-endpoint engine and the secure session layer exchange. cEMI
//! payloads stay opaque apart from their tagged message code and the L_Data
//! source-address slot.

pub mod cemi;
mod encoding;
mod feature;
mod header;
mod hpai;
mod service;

pub use cemi::{CemiClass, CemiFrame};
pub use encoding::{chop_bytes, chop_slice, chop_u16, chop_u48, chop_u8, put_u48};
pub use feature::{FeatureResult, InterfaceFeature, TunnelingFeature};
pub use header::{service_type, KnxHeader, HEADER_SIZE};
pub use hpai::{HostProtocol, Hpai, HPAI_SIZE};
pub use service::{
    split_packet, to_packet, ConnectionstateRequest, ConnectionstateResponse, ErrorCode,
    ServiceAck, ServiceRequest,
};
