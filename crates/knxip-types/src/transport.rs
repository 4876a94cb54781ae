//! Datagram transport abstraction.
//!
//! The protocol engine never touches sockets directly; it sends through this
//! trait. The surrounding server provides UDP implementations for the control
//! and data endpoints and may bind a TCP stream transport to a channel as a
//! per-peer fallback.

use std::io;
use std::net::SocketAddr;

use parking_lot::Mutex;

/// Outbound transport for KNXnet/IP packets.
pub trait Transport: Send + Sync {
    /// Send one packet to the destination.
    fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<()>;

    /// True for stream transports (a TCP connection bound to the peer).
    fn is_stream(&self) -> bool {
        false
    }

    /// Local port this transport is bound to.
    fn local_port(&self) -> u16;
}

/// Capture transport for tests and diagnostics: records every packet instead
/// of sending it.
#[derive(Debug, Default)]
pub struct MockTransport {
    port: u16,
    stream: bool,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
}

impl MockTransport {
    /// A datagram-like capture transport on the given local port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            stream: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A stream-like capture transport, as bound by the TCP fallback.
    pub fn stream(port: u16) -> Self {
        Self {
            port,
            stream: true,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// All packets sent so far, in order.
    pub fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.sent.lock().clone()
    }

    /// Drain the captured packets.
    pub fn take(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl Transport for MockTransport {
    fn send_to(&self, buf: &[u8], dst: SocketAddr) -> io::Result<()> {
        self.sent.lock().push((buf.to_vec(), dst));
        Ok(())
    }

    fn is_stream(&self) -> bool {
        self.stream
    }

    fn local_port(&self) -> u16 {
        self.port
    }
}
