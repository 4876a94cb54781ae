//! Server core for KNXnet/IP tunneling and device management.
//!
//! This crate ties the subsystem crates together: the service-loop adapter
//! that demultiplexes datagrams into the secure session store and the
//! per-channel data-endpoint handlers, the dormancy sweeper, the server
//! configuration loader, and serial-number derivation.

mod config;
mod serial;
mod service;

pub use config::ServerConfig;
pub use serial::derive_serial_number;
pub use service::{process_datagram, DataEndpointService, ServiceHandler, SessionSweeper};

// Re-export commonly used types from the subsystem crates
pub use knxip_endpoint::{
    BlockingMode, ChannelRole, CloseInitiator, ConnectionState, ControlEndpoint, DataEndpoint,
    EndpointHooks,
};
pub use knxip_secure::{ConnectionType, SecureService, SessionStore, SessionStoreConfig};
pub use knxip_types::{Error, IndividualAddress, Result, Transport};
pub use knxip_wire::{CemiFrame, KnxHeader};
