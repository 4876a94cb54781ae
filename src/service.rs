//! Service-loop adapter.
//!
//! The socket loops live outside this crate; they hand every received
//! datagram to [`process_datagram`], which parses and sanitizes the KNXnet/IP
//! header and dispatches to a [`ServiceHandler`]. [`DataEndpointService`]
//! is the handler for one channel's data endpoint; the control-endpoint
//! service implements the same trait elsewhere.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use knxip_endpoint::DataEndpoint;
use knxip_secure::SessionStore;
use knxip_types::Result;
use knxip_wire::{KnxHeader, HEADER_SIZE};

/// One demultiplexing target of the service loop.
pub trait ServiceHandler: Send + Sync {
    /// Consume one parsed frame. Returns `false` when the service type is
    /// not handled here, letting the loop log it as unknown.
    fn handle_service_type(&self, header: &KnxHeader, body: &[u8], src: SocketAddr)
        -> Result<bool>;
}

/// Parse, sanitize, and dispatch one received datagram.
pub fn process_datagram(handler: &dyn ServiceHandler, data: &[u8], src: SocketAddr) {
    let header = match KnxHeader::parse(data) {
        Ok(header) => header,
        Err(e) => {
            tracing::warn!(src = %src, error = %e, "received invalid frame");
            return;
        }
    };
    if !sanitize(&header, data.len()) {
        return;
    }
    let body = &data[HEADER_SIZE..header.total_length];
    match handler.handle_service_type(&header, body, src) {
        Ok(true) => {}
        Ok(false) => tracing::info!(
            src = %src,
            service = %format_args!("0x{:04x}", header.service_type),
            "received packet with unknown service type - ignored"
        ),
        Err(e) => tracing::warn!(src = %src, error = %e, "error handling received frame"),
    }
}

fn sanitize(header: &KnxHeader, length: usize) -> bool {
    if header.total_length > length {
        tracing::warn!("received frame length does not match - ignored");
        return false;
    }
    if header.service_type == 0 {
        // unused service types of ours stay 0 by default
        tracing::warn!("received frame with service type 0 - ignored");
        return false;
    }
    true
}

/// Service handler for one channel's data endpoint.
pub struct DataEndpointService {
    endpoint: Arc<DataEndpoint>,
}

impl DataEndpointService {
    pub fn new(endpoint: Arc<DataEndpoint>) -> Self {
        Self { endpoint }
    }

    /// The channel handler behind this service.
    pub fn endpoint(&self) -> &Arc<DataEndpoint> {
        &self.endpoint
    }
}

impl ServiceHandler for DataEndpointService {
    fn handle_service_type(
        &self,
        header: &KnxHeader,
        body: &[u8],
        src: SocketAddr,
    ) -> Result<bool> {
        self.endpoint.handle_data_service(header, body, src)
    }
}

/// Background sweeper closing dormant secure sessions.
pub struct SessionSweeper {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SessionSweeper {
    /// Default interval between sweeps.
    pub const INTERVAL: Duration = Duration::from_secs(10);

    /// Spawn the sweeper thread.
    pub fn spawn(store: Arc<SessionStore>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("knxip-session-sweeper".into())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    store.sweep(Instant::now());
                }
            })
            .ok();
        Self { stop, handle }
    }

    /// Stop the sweeper and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SessionSweeper {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
