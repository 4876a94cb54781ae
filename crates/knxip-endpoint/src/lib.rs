//! Per-connection data-endpoint protocol engine.
//!
//! One [`DataEndpoint`] serves a single tunneling or device-management
//! channel: it validates and acknowledges inbound service requests in
//! sequence, dispatches accepted cEMI frames to the subnet driver, and sends
//! outbound frames with the at-most-one-in-flight request/ack discipline of
//! the KNXnet/IP data-endpoint protocol.

mod handler;

pub use handler::DataEndpoint;

use std::sync::Arc;
use std::time::Duration;

use knxip_types::IndividualAddress;
use knxip_wire::{service_type, CemiClass, CemiFrame, ErrorCode};

/// A tunneling request must be acknowledged within one second.
pub const TUNNELING_REQ_TIMEOUT: Duration = Duration::from_secs(1);

/// A device-configuration request must be acknowledged within ten seconds.
pub const CONFIGURATION_REQ_TIMEOUT: Duration = Duration::from_secs(10);

/// Role of a data-endpoint channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// Tunneling on the link layer
    TunnelLinkLayer,
    /// Tunneling in bus-monitor mode
    TunnelBusMonitor,
    /// Device management
    DeviceMgmt,
}

impl ChannelRole {
    /// True for both tunneling roles.
    #[inline]
    pub fn is_tunnel(self) -> bool {
        !matches!(self, Self::DeviceMgmt)
    }

    /// True for the bus-monitor role.
    #[inline]
    pub fn is_monitor(self) -> bool {
        matches!(self, Self::TunnelBusMonitor)
    }

    /// Inbound/outbound request service type for this role.
    pub fn service_request_type(self) -> u16 {
        if self.is_tunnel() {
            service_type::TUNNELING_REQ
        } else {
            service_type::DEVICE_CONFIGURATION_REQ
        }
    }

    /// Acknowledgment service type for this role.
    pub fn service_ack_type(self) -> u16 {
        if self.is_tunnel() {
            service_type::TUNNELING_ACK
        } else {
            service_type::DEVICE_CONFIGURATION_ACK
        }
    }

    /// Acknowledgment window for one outbound request.
    pub fn ack_timeout(self) -> Duration {
        if self.is_tunnel() {
            TUNNELING_REQ_TIMEOUT
        } else {
            CONFIGURATION_REQ_TIMEOUT
        }
    }

    /// Send attempts before an outbound request fails with a timeout.
    pub fn max_send_attempts(self) -> usize {
        if self.is_tunnel() {
            3
        } else {
            2
        }
    }

    /// cEMI frame class clients of this role may produce.
    pub fn required_frame_class(self) -> CemiClass {
        match self {
            Self::TunnelLinkLayer => CemiClass::LData,
            Self::TunnelBusMonitor => CemiClass::BusMonitor,
            Self::DeviceMgmt => CemiClass::DeviceMgmt,
        }
    }

    /// Channel kind for log messages.
    pub fn kind(self) -> &'static str {
        if self.is_tunnel() {
            "tunneling"
        } else {
            "device configuration"
        }
    }
}

/// Blocking behavior of [`DataEndpoint::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingMode {
    /// Wait for the acknowledgment, with retries.
    Blocking,
    /// Post the request and return.
    NonBlocking,
}

/// Who initiated closing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseInitiator {
    User,
    Client,
    Server,
    Internal,
}

/// Connection state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Idle or acknowledged.
    Ok,
    /// One outbound request awaiting its acknowledgment.
    AckPending,
    /// Last exchange failed; the channel stays open.
    AckError,
    /// Terminal.
    Closed,
}

/// Callbacks a data endpoint fires into the surrounding server.
pub struct EndpointHooks {
    /// An accepted inbound cEMI frame, ready for the subnet driver.
    pub frame_received: Box<dyn Fn(u8, CemiFrame) + Send + Sync>,
    /// Single-shot close notification: channel id, assigned address, reason.
    pub connection_closed: Box<dyn Fn(u8, IndividualAddress, &str) + Send + Sync>,
    /// A reset request arrived on the channel.
    pub reset_request: Box<dyn Fn(u8) + Send + Sync>,
}

impl Default for EndpointHooks {
    fn default() -> Self {
        Self {
            frame_received: Box::new(|_, _| {}),
            connection_closed: Box::new(|_, _, _| {}),
            reset_request: Box::new(|_| {}),
        }
    }
}

/// The owning control-endpoint service, consulted by id to avoid reference
/// cycles between channels, sessions, and the store.
pub trait ControlEndpoint: Send + Sync {
    /// Status of the KNX subnet serving the given device address.
    fn subnet_status(&self, device: IndividualAddress) -> ErrorCode;

    /// The data endpoint serving a channel, for port-mismatch recovery.
    fn find_data_endpoint(&self, channel_id: u8) -> Option<Arc<DataEndpoint>>;
}
