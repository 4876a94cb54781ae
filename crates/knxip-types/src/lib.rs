//! Shared types for the KNXnet/IP server core.
//!
//! This crate provides the KNX individual address, the error taxonomy used
//! across the server crates, and the datagram transport abstraction the
//! protocol engine sends through.

mod address;
mod error;
mod transport;

pub use address::IndividualAddress;
pub use error::{ConnectionError, Error, Result, SecureError, WireError};
pub use transport::{MockTransport, Transport};

/// KNXnet/IP protocol version 1.0, the only version the server speaks.
pub const KNXNETIP_VERSION_10: u8 = 0x10;

/// Default UDP port for KNXnet/IP communication.
pub const KNXNETIP_PORT: u16 = 3671;
