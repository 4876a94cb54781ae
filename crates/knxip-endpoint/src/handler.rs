//! Server-side handler for one KNX IP (secure) tunneling or device
//! management connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use knxip_secure::{SecureService, SessionStore};
use knxip_types::{ConnectionError, IndividualAddress, Result, Transport};
use knxip_wire::cemi::message_code;
use knxip_wire::{
    service_type, CemiFrame, ConnectionstateRequest, ConnectionstateResponse, ErrorCode,
    FeatureResult, HostProtocol, InterfaceFeature, KnxHeader, ServiceAck, ServiceRequest,
    TunnelingFeature,
};

use crate::{
    BlockingMode, ChannelRole, CloseInitiator, ConnectionState, ControlEndpoint, EndpointHooks,
};

struct Inner {
    state: ConnectionState,
    seq_send: u8,
    seq_recv: u8,
}

/// One data-endpoint channel.
pub struct DataEndpoint {
    channel_id: u8,
    role: ChannelRole,
    /// Individual address assigned to the channel (tunneling only).
    device: IndividualAddress,
    /// Remote control endpoint, target of connection-state responses.
    ctrl_endpoint: SocketAddr,
    /// Remote data endpoint, target of everything else.
    data_endpoint: SocketAddr,
    ctrl_transport: Arc<dyn Transport>,
    /// Local UDP data transport; swappable for port-mismatch recovery.
    data_transport: RwLock<Arc<dyn Transport>>,
    /// TCP fallback bound to the peer, when present it overrides UDP.
    stream: RwLock<Option<Arc<dyn Transport>>>,
    store: Arc<SessionStore>,
    /// 0 means plaintext.
    session_id: u16,
    inner: Mutex<Inner>,
    ack_waiter: Condvar,
    /// Serializes outbound requests: at most one in flight.
    send_serialize: Mutex<()>,
    last_msg: Mutex<Instant>,
    shutdown: AtomicBool,
    /// The one writable tunneling feature.
    feature_info_service: AtomicU8,
    hooks: EndpointHooks,
    control: RwLock<Option<Weak<dyn ControlEndpoint>>>,
}

impl DataEndpoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctrl_transport: Arc<dyn Transport>,
        data_transport: Arc<dyn Transport>,
        ctrl_endpoint: SocketAddr,
        data_endpoint: SocketAddr,
        channel_id: u8,
        role: ChannelRole,
        device: IndividualAddress,
        store: Arc<SessionStore>,
        session_id: u16,
        hooks: EndpointHooks,
    ) -> Arc<Self> {
        if session_id > 0 {
            store.bind_channel(session_id, channel_id);
        }
        Arc::new(Self {
            channel_id,
            role,
            device,
            ctrl_endpoint,
            data_endpoint,
            ctrl_transport,
            data_transport: RwLock::new(data_transport),
            stream: RwLock::new(None),
            store,
            session_id,
            inner: Mutex::new(Inner {
                state: ConnectionState::Ok,
                seq_send: 0,
                seq_recv: 0,
            }),
            ack_waiter: Condvar::new(),
            send_serialize: Mutex::new(()),
            last_msg: Mutex::new(Instant::now()),
            shutdown: AtomicBool::new(false),
            feature_info_service: AtomicU8::new(0),
            hooks,
            control: RwLock::new(None),
        })
    }

    /// Wire up the owning control endpoint. Held weakly; the channel keeps
    /// working (with degraded connection-state answers) if it goes away.
    pub fn set_control_endpoint(&self, control: &Arc<dyn ControlEndpoint>) {
        *self.control.write() = Some(Arc::downgrade(control));
    }

    #[inline]
    pub fn channel_id(&self) -> u8 {
        self.channel_id
    }

    #[inline]
    pub fn role(&self) -> ChannelRole {
        self.role
    }

    #[inline]
    pub fn device_address(&self) -> IndividualAddress {
        self.device
    }

    #[inline]
    pub fn session_id(&self) -> u16 {
        self.session_id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn seq_send(&self) -> u8 {
        self.inner.lock().seq_send
    }

    pub fn seq_recv(&self) -> u8 {
        self.inner.lock().seq_recv
    }

    /// Idle time since the last correctly received message, for the
    /// heartbeat sweeper.
    pub fn tick(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_msg.lock())
    }

    /// Bind a TCP stream transport to this channel; it overrides UDP until
    /// cleared or the channel closes.
    pub fn bind_stream(&self, stream: Arc<dyn Transport>) {
        *self.stream.write() = Some(stream);
    }

    /// Drop the TCP fallback binding.
    pub fn clear_stream(&self) {
        *self.stream.write() = None;
    }

    /// Replace the UDP data transport (port-mismatch recovery).
    pub fn rebind_transport(&self, transport: Arc<dyn Transport>) {
        tracing::info!(
            channel = self.channel_id,
            port = transport.local_port(),
            "rebinding data endpoint"
        );
        *self.data_transport.write() = transport;
    }

    /// Entry point for the service loop: route one inbound packet addressed
    /// to this channel's data endpoint.
    pub fn handle_data_service(
        &self,
        header: &KnxHeader,
        body: &[u8],
        src: SocketAddr,
    ) -> Result<bool> {
        if self.session_id == 0 || self.has_stream() {
            return self.accept_data_service(header, body);
        }
        if !header.is_secure() {
            tracing::warn!(
                channel = self.channel_id,
                service = %format_args!("0x{:04x}", header.service_type),
                "received non-secure packet on secure channel - discard"
            );
            return Ok(true);
        }
        self.store.accept(header, body, src, self)
    }

    /// Consume one plaintext data-endpoint service. Returns `false` only for
    /// service types this handler does not own.
    pub fn accept_data_service(&self, header: &KnxHeader, body: &[u8]) -> Result<bool> {
        let svc = header.service_type;

        let config_req = svc == service_type::DEVICE_CONFIGURATION_REQ;
        let config_ack = svc == service_type::DEVICE_CONFIGURATION_ACK;
        if self.role.is_tunnel() && (config_req || config_ack) {
            return self.redirect_configuration(header, body, config_req);
        }

        if svc == self.role.service_request_type() {
            self.accept_request(header, body)?;
        } else if svc == service_type::TUNNELING_FEATURE_GET
            || svc == service_type::TUNNELING_FEATURE_SET
        {
            self.accept_feature(header, body)?;
        } else if svc == self.role.service_ack_type() {
            self.accept_ack(header, body)?;
        } else if svc == service_type::CONNECTIONSTATE_REQ {
            self.accept_connection_state(header, body)?;
        } else {
            return Ok(false);
        }
        Ok(true)
    }

    /// Send a cEMI frame to the client.
    ///
    /// Fails with [`ConnectionError::FrameType`] when the frame class does
    /// not match the channel role. Over a bound TCP stream the mode is
    /// forced to non-blocking and the state set to OK immediately.
    pub fn send(&self, frame: &CemiFrame, mode: BlockingMode) -> Result<()> {
        self.check_frame_type(frame)?;
        if self.has_stream() {
            self.submit(frame, BlockingMode::NonBlocking)?;
            self.set_state_notify(ConnectionState::Ok);
            return Ok(());
        }
        self.submit(frame, mode)
    }

    /// Close the channel. Idempotent; cleanup and the close notification run
    /// exactly once.
    pub fn close(&self, initiator: CloseInitiator, reason: &str) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            channel = self.channel_id,
            initiator = ?initiator,
            reason,
            "close connection"
        );
        self.set_state_notify(ConnectionState::Closed);
        (self.hooks.connection_closed)(self.channel_id, self.device, reason);
        *self.stream.write() = None;
        if self.session_id > 0 {
            self.store.unbind_channel(self.session_id, self.channel_id);
        }
    }

    fn redirect_configuration(
        &self,
        header: &KnxHeader,
        body: &[u8],
        config_req: bool,
    ) -> Result<bool> {
        let recv_channel = if config_req {
            ServiceRequest::decode(body)?.channel_id
        } else {
            ServiceAck::decode(body)?.channel_id
        };
        if recv_channel == self.channel_id {
            return Ok(false);
        }
        // some clients address configuration requests for another channel to
        // this channel's UDP port; find that connection and move it here
        let transport = self.data_transport.read().clone();
        tracing::error!(
            channel = recv_channel,
            port = transport.local_port(),
            own_channel = self.channel_id,
            "configuration request for another channel on this UDP port - redirecting"
        );
        let endpoint = self
            .control()
            .and_then(|control| control.find_data_endpoint(recv_channel));
        if let Some(endpoint) = endpoint {
            endpoint.rebind_transport(transport);
            endpoint.accept_data_service(header, body)?;
        }
        Ok(true)
    }

    fn accept_request(&self, header: &KnxHeader, body: &[u8]) -> Result<()> {
        let req = ServiceRequest::decode(body)?;
        if !self.check_channel_id(req.channel_id, "request") {
            return Ok(());
        }
        if !self.acknowledge(header, req.seq)? {
            return Ok(());
        }
        // leave if we are working with an empty (broken) service request
        let Ok(cemi) = CemiFrame::from_bytes(req.cemi) else {
            return Ok(());
        };
        if self.role.is_tunnel() {
            self.dispatch_tunneling(cemi);
        } else {
            self.dispatch_configuration(cemi);
        }
        Ok(())
    }

    fn accept_feature(&self, header: &KnxHeader, body: &[u8]) -> Result<()> {
        let req = TunnelingFeature::decode(header.service_type, body)?;
        if !self.check_channel_id(req.channel_id, "request") {
            return Ok(());
        }
        if !self.acknowledge(header, req.seq)? {
            return Ok(());
        }
        tracing::debug!(
            channel = self.channel_id,
            feature = ?req.feature,
            "received tunneling feature service"
        );
        let response = self.response_for_feature(header.service_type, &req);
        self.send_packet(&response, self.data_endpoint)?;
        Ok(())
    }

    fn accept_ack(&self, header: &KnxHeader, body: &[u8]) -> Result<()> {
        let ack = ServiceAck::decode(body)?;
        if !self.check_channel_id(ack.channel_id, "acknowledgment") {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock();
            if ack.seq != inner.seq_send {
                tracing::warn!(
                    channel = self.channel_id,
                    seq = ack.seq,
                    expected = inner.seq_send,
                    "{} acknowledgment with wrong send-sequence - ignored",
                    self.role.kind()
                );
                return Ok(());
            }
            if !header.is_version_10() {
                drop(inner);
                self.close(CloseInitiator::Internal, "protocol version changed");
                return Ok(());
            }
            inner.seq_send = inner.seq_send.wrapping_add(1);
            inner.state = if ack.status == u8::from(ErrorCode::NoError) {
                ConnectionState::Ok
            } else {
                ConnectionState::AckError
            };
            self.ack_waiter.notify_all();
            if inner.state == ConnectionState::AckError {
                tracing::warn!(
                    channel = self.channel_id,
                    status = ack.status,
                    "received service acknowledgment with error status"
                );
            }
        }
        self.update_last_msg();
        tracing::trace!(
            channel = self.channel_id,
            seq = ack.seq,
            "received service acknowledgment"
        );
        Ok(())
    }

    // ETS sends a connection-state request from its data endpoint to our
    // data endpoint right after connecting, and expects the answer from the
    // control endpoint. Ignoring it delays connection establishment by the
    // client's response timeout.
    fn accept_connection_state(&self, header: &KnxHeader, body: &[u8]) -> Result<()> {
        let csr = ConnectionstateRequest::decode(body)?;
        let mut status = if header.is_version_10() {
            ErrorCode::NoError
        } else {
            ErrorCode::VersionNotSupported
        };
        if status == ErrorCode::NoError && csr.control_endpoint.protocol != HostProtocol::Udp4 {
            status = ErrorCode::HostProtocolType;
        }
        if status == ErrorCode::NoError {
            tracing::trace!(
                channel = csr.channel_id,
                from = %self.data_endpoint,
                "data endpoint received connection state request"
            );
            self.update_last_msg();
            status = self.subnet_status();
        } else {
            tracing::warn!(
                status = status.message(),
                "received invalid connection state request"
            );
        }
        let response = ConnectionstateResponse::new(csr.channel_id, status).to_packet();
        self.send_packet(&response, self.ctrl_endpoint)?;
        Ok(())
    }

    /// Sequence-validate one inbound request and acknowledge it.
    ///
    /// Returns true when the request carried the expected sequence and its
    /// payload should be dispatched. A one-behind duplicate (tunneling only)
    /// is acknowledged again but not dispatched; anything else out of window
    /// is ignored. A version mismatch is acknowledged with an error status
    /// and closes the channel.
    fn acknowledge(&self, header: &KnxHeader, seq: u8) -> Result<bool> {
        let expected = self.inner.lock().seq_recv;
        let duplicate = self.role.is_tunnel() && seq.wrapping_add(1) == expected;
        if seq != expected && !duplicate {
            tracing::warn!(
                channel = self.channel_id,
                seq,
                expected,
                "{} request with invalid receive sequence - ignored",
                self.role.kind()
            );
            return Ok(false);
        }

        let status = if header.is_version_10() {
            ErrorCode::NoError
        } else {
            ErrorCode::VersionNotSupported
        };
        let ack = ServiceAck::new(self.channel_id, seq, status).to_packet(self.role.service_ack_type());
        self.send_packet(&ack, self.data_endpoint)?;
        if status == ErrorCode::VersionNotSupported {
            self.close(CloseInitiator::Internal, "protocol version changed");
            return Ok(false);
        }
        if seq != expected {
            // acknowledged retransmit, already dispatched
            return Ok(false);
        }
        {
            let mut inner = self.inner.lock();
            inner.seq_recv = inner.seq_recv.wrapping_add(1);
        }
        self.update_last_msg();
        Ok(true)
    }

    fn dispatch_tunneling(&self, mut cemi: CemiFrame) {
        if self.role.is_monitor() {
            tracing::warn!(
                channel = self.channel_id,
                "client is not allowed to send cEMI messages in busmonitor mode - ignored"
            );
            return;
        }
        match cemi.message_code() {
            message_code::L_DATA_REQ => {
                if cemi.source().is_some_and(|src| src.is_unassigned()) {
                    cemi.rewrite_source(self.device);
                }
                (self.hooks.frame_received)(self.channel_id, cemi);
            }
            message_code::L_DATA_CON => {
                tracing::warn!(channel = self.channel_id, "received L-Data confirmation - ignored")
            }
            message_code::L_DATA_IND => {
                tracing::warn!(channel = self.channel_id, "received L-Data indication - ignored")
            }
            message_code::BUSMON_IND => {
                tracing::warn!(channel = self.channel_id, "received L-Busmon indication - ignored")
            }
            mc => tracing::warn!(
                channel = self.channel_id,
                mc,
                "unsupported cEMI message code - ignored"
            ),
        }
    }

    fn dispatch_configuration(&self, cemi: CemiFrame) {
        match cemi.message_code() {
            message_code::PROPREAD_REQ | message_code::PROPWRITE_REQ => {
                (self.hooks.frame_received)(self.channel_id, cemi);
            }
            message_code::RESET_REQ => {
                (self.hooks.frame_received)(self.channel_id, cemi);
                (self.hooks.reset_request)(self.channel_id);
            }
            message_code::PROPREAD_CON => tracing::warn!(
                channel = self.channel_id,
                "received property read confirmation - ignored"
            ),
            message_code::PROPWRITE_CON => tracing::warn!(
                channel = self.channel_id,
                "received property write confirmation - ignored"
            ),
            message_code::PROPINFO_IND => tracing::warn!(
                channel = self.channel_id,
                "received property info indication - ignored"
            ),
            message_code::RESET_IND => {
                tracing::warn!(channel = self.channel_id, "received reset indication - ignored")
            }
            mc => tracing::warn!(
                channel = self.channel_id,
                mc,
                "unsupported cEMI message code - ignored"
            ),
        }
    }

    fn response_for_feature(&self, svc: u16, req: &TunnelingFeature) -> Vec<u8> {
        let seq = self.inner.lock().seq_send;
        if svc == service_type::TUNNELING_FEATURE_GET {
            let value: Vec<u8> = match req.feature {
                InterfaceFeature::SupportedEmiTypes => vec![0, 0],
                InterfaceFeature::DeviceDescriptorType0 => vec![0x09, 0x1A],
                InterfaceFeature::ConnectionStatus => vec![1],
                InterfaceFeature::Manufacturer => vec![0, 0],
                InterfaceFeature::ActiveEmiType => vec![0],
                InterfaceFeature::IndividualAddress => self.device.to_bytes().to_vec(),
                InterfaceFeature::MaxApduLength => vec![0, 15],
                InterfaceFeature::EnableFeatureInfoService => {
                    vec![self.feature_info_service.load(Ordering::Relaxed)]
                }
            };
            return TunnelingFeature::response(
                self.channel_id,
                seq,
                req.feature,
                FeatureResult::Success,
                &value,
            );
        }
        // set: only the feature-info-service switch is writable
        if req.feature == InterfaceFeature::EnableFeatureInfoService {
            let value = req.value.first().copied().unwrap_or(0);
            self.feature_info_service.store(value, Ordering::Relaxed);
            return TunnelingFeature::response(
                self.channel_id,
                seq,
                req.feature,
                FeatureResult::Success,
                &req.value,
            );
        }
        TunnelingFeature::response(
            self.channel_id,
            seq,
            req.feature,
            FeatureResult::AccessReadOnly,
            &[],
        )
    }

    fn submit(&self, frame: &CemiFrame, mode: BlockingMode) -> Result<()> {
        let _sending = self.send_serialize.lock();
        let packet = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return Err(ConnectionError::Closed.into());
            }
            inner.state = ConnectionState::AckPending;
            ServiceRequest::new(self.channel_id, inner.seq_send, frame.as_bytes().to_vec())
                .to_packet(self.role.service_request_type())
        };
        match mode {
            BlockingMode::NonBlocking => self.send_packet(&packet, self.data_endpoint),
            BlockingMode::Blocking => self.send_and_wait(&packet),
        }
    }

    fn send_and_wait(&self, packet: &[u8]) -> Result<()> {
        let timeout = self.role.ack_timeout();
        for attempt in 0..self.role.max_send_attempts() {
            {
                let mut inner = self.inner.lock();
                if inner.state == ConnectionState::Closed {
                    return Err(ConnectionError::Closed.into());
                }
                inner.state = ConnectionState::AckPending;
            }
            self.send_packet(packet, self.data_endpoint)?;
            tracing::trace!(channel = self.channel_id, attempt, "awaiting acknowledgment");

            let deadline = Instant::now() + timeout;
            let mut inner = self.inner.lock();
            while inner.state == ConnectionState::AckPending {
                if self.ack_waiter.wait_until(&mut inner, deadline).timed_out() {
                    break;
                }
            }
            match inner.state {
                ConnectionState::Ok => return Ok(()),
                ConnectionState::Closed => return Err(ConnectionError::Closed.into()),
                // no answer or an error acknowledgment: try again
                ConnectionState::AckPending | ConnectionState::AckError => {}
            }
        }
        self.inner.lock().state = ConnectionState::AckError;
        Err(ConnectionError::Timeout.into())
    }

    fn send_packet(&self, packet: &[u8], dst: SocketAddr) -> Result<()> {
        let buf;
        let packet = if self.session_id > 0 {
            buf = self.store.wrap(self.session_id, packet)?;
            tracing::trace!(
                channel = self.channel_id,
                session = self.session_id,
                dst = %dst,
                "send secured packet"
            );
            buf.as_slice()
        } else {
            packet
        };
        let transport = if dst == self.data_endpoint {
            self.effective_data_transport()
        } else {
            self.ctrl_transport.clone()
        };
        transport.send_to(packet, dst)?;
        Ok(())
    }

    fn effective_data_transport(&self) -> Arc<dyn Transport> {
        if let Some(stream) = self.stream.read().clone() {
            return stream;
        }
        self.data_transport.read().clone()
    }

    fn has_stream(&self) -> bool {
        self.stream.read().is_some()
    }

    fn check_frame_type(&self, frame: &CemiFrame) -> Result<()> {
        if frame.class() != Some(self.role.required_frame_class()) {
            return Err(ConnectionError::FrameType.into());
        }
        Ok(())
    }

    fn check_channel_id(&self, channel_id: u8, kind: &str) -> bool {
        if channel_id == self.channel_id {
            return true;
        }
        tracing::warn!(
            received = channel_id,
            channel = self.channel_id,
            "channel id mismatch in {kind} - ignored"
        );
        false
    }

    fn subnet_status(&self) -> ErrorCode {
        match self.control() {
            Some(control) => control.subnet_status(self.device),
            None => ErrorCode::KnxConnection,
        }
    }

    fn control(&self) -> Option<Arc<dyn ControlEndpoint>> {
        self.control.read().as_ref().and_then(Weak::upgrade)
    }

    fn set_state_notify(&self, state: ConnectionState) {
        let mut inner = self.inner.lock();
        inner.state = state;
        self.ack_waiter.notify_all();
    }

    fn update_last_msg(&self) {
        *self.last_msg.lock() = Instant::now();
    }
}

impl SecureService for DataEndpoint {
    fn accept_unwrapped(
        &self,
        _session_id: u16,
        header: &KnxHeader,
        body: &[u8],
        _src: SocketAddr,
    ) -> Result<bool> {
        self.accept_data_service(header, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use knxip_secure::{unwrap_secure, SessionKey, SessionStoreConfig};
    use knxip_types::{Error, MockTransport};
    use knxip_wire::{split_packet, Hpai};

    use crate::EndpointHooks;

    fn remote_ctrl() -> SocketAddr {
        "192.168.1.50:50001".parse().unwrap()
    }

    fn remote_data() -> SocketAddr {
        "192.168.1.50:50002".parse().unwrap()
    }

    struct Harness {
        endpoint: Arc<DataEndpoint>,
        data: Arc<MockTransport>,
        ctrl: Arc<MockTransport>,
        store: Arc<SessionStore>,
        frames: Arc<Mutex<Vec<CemiFrame>>>,
        closed: Arc<AtomicUsize>,
        resets: Arc<AtomicUsize>,
    }

    fn harness(role: ChannelRole, channel_id: u8) -> Harness {
        harness_with_session(role, channel_id, 0, None)
    }

    fn harness_with_session(
        role: ChannelRole,
        channel_id: u8,
        session_id: u16,
        store: Option<Arc<SessionStore>>,
    ) -> Harness {
        let data = Arc::new(MockTransport::new(55000 + u16::from(channel_id)));
        let ctrl = Arc::new(MockTransport::new(3671));
        let store = store.unwrap_or_else(|| {
            Arc::new(SessionStore::new(ctrl.clone(), SessionStoreConfig::default()))
        });

        let frames = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let hooks = EndpointHooks {
            frame_received: {
                let frames = frames.clone();
                Box::new(move |_, frame| frames.lock().push(frame))
            },
            connection_closed: {
                let closed = closed.clone();
                Box::new(move |_, _, _| {
                    closed.fetch_add(1, Ordering::SeqCst);
                })
            },
            reset_request: {
                let resets = resets.clone();
                Box::new(move |_| {
                    resets.fetch_add(1, Ordering::SeqCst);
                })
            },
        };

        let endpoint = DataEndpoint::new(
            ctrl.clone(),
            data.clone(),
            remote_ctrl(),
            remote_data(),
            channel_id,
            role,
            IndividualAddress::new(1, 2, 3).unwrap(),
            store.clone(),
            session_id,
            hooks,
        );
        Harness {
            endpoint,
            data,
            ctrl,
            store,
            frames,
            closed,
            resets,
        }
    }

    fn ldata_req(src: u16, dst: u16) -> Vec<u8> {
        let mut frame = vec![message_code::L_DATA_REQ, 0, 0xBC, 0xE0];
        frame.extend_from_slice(&src.to_be_bytes());
        frame.extend_from_slice(&dst.to_be_bytes());
        frame.extend_from_slice(&[0x01, 0x00, 0x81]);
        frame
    }

    fn request(svc: u16, channel_id: u8, seq: u8, cemi: Vec<u8>) -> (KnxHeader, Vec<u8>) {
        let packet = ServiceRequest::new(channel_id, seq, cemi).to_packet(svc);
        let (header, body) = split_packet(&packet).unwrap();
        (header, body.to_vec())
    }

    fn ack(svc: u16, channel_id: u8, seq: u8, status: ErrorCode) -> (KnxHeader, Vec<u8>) {
        let packet = ServiceAck::new(channel_id, seq, status).to_packet(svc);
        let (header, body) = split_packet(&packet).unwrap();
        (header, body.to_vec())
    }

    /// Parse a captured ack packet into (service, channel, seq, status).
    fn parse_ack(packet: &[u8]) -> (u16, u8, u8, u8) {
        let (header, body) = split_packet(packet).unwrap();
        let ack = ServiceAck::decode(body).unwrap();
        (header.service_type, ack.channel_id, ack.seq, ack.status)
    }

    struct TestControl {
        status: ErrorCode,
        endpoints: Mutex<HashMap<u8, Arc<DataEndpoint>>>,
    }

    impl TestControl {
        fn new(status: ErrorCode) -> Self {
            Self {
                status,
                endpoints: Mutex::new(HashMap::new()),
            }
        }
    }

    impl ControlEndpoint for TestControl {
        fn subnet_status(&self, _: IndividualAddress) -> ErrorCode {
            self.status
        }

        fn find_data_endpoint(&self, channel_id: u8) -> Option<Arc<DataEndpoint>> {
            self.endpoints.lock().get(&channel_id).cloned()
        }
    }

    #[test]
    fn tunneling_request_rewrites_source_and_acks() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) = request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0, 0x1105));

        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());

        let sent = h.data.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            parse_ack(&sent[0].0),
            (service_type::TUNNELING_ACK, 7, 0, 0)
        );
        assert_eq!(sent[0].1, remote_data());

        let frames = h.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].source(),
            Some(IndividualAddress::new(1, 2, 3).unwrap())
        );
        assert_eq!(h.endpoint.seq_recv(), 1);
    }

    #[test]
    fn assigned_source_left_untouched() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) =
            request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0x1104, 0x1105));
        h.endpoint.accept_data_service(&header, &body).unwrap();
        assert_eq!(
            h.frames.lock()[0].source(),
            Some(IndividualAddress::from(0x1104))
        );
    }

    #[test]
    fn duplicate_request_acked_but_not_redispatched() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) = request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0, 0x1105));
        h.endpoint.accept_data_service(&header, &body).unwrap();
        h.data.take();

        // retransmit of sequence 0 after seq_recv advanced to 1
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        let sent = h.data.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            parse_ack(&sent[0].0),
            (service_type::TUNNELING_ACK, 7, 0, 0)
        );
        assert_eq!(h.frames.lock().len(), 1);
        assert_eq!(h.endpoint.seq_recv(), 1);
    }

    #[test]
    fn out_of_window_sequence_ignored() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) = request(service_type::TUNNELING_REQ, 7, 5, ldata_req(0, 0x1105));
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        assert!(h.data.take().is_empty());
        assert_eq!(h.endpoint.seq_recv(), 0);
        assert!(h.frames.lock().is_empty());
    }

    #[test]
    fn duplicate_window_disabled_for_device_mgmt() {
        let h = harness(ChannelRole::DeviceMgmt, 3);
        let (header, body) = request(
            service_type::DEVICE_CONFIGURATION_REQ,
            3,
            0,
            vec![message_code::PROPREAD_REQ, 0, 1, 2, 3, 4],
        );
        h.endpoint.accept_data_service(&header, &body).unwrap();
        h.data.take();

        // one-behind retransmit tolerance applies to tunneling only
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        assert!(h.data.take().is_empty());
    }

    #[test]
    fn version_mismatch_acks_error_and_closes_once() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (mut header, body) = request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0, 0x1105));
        header.version = 0x11;

        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        let sent = h.data.take();
        assert_eq!(
            parse_ack(&sent[0].0),
            (
                service_type::TUNNELING_ACK,
                7,
                0,
                ErrorCode::VersionNotSupported.into()
            )
        );
        assert_eq!(h.endpoint.state(), ConnectionState::Closed);
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
        assert!(h.frames.lock().is_empty());

        // close is latched
        h.endpoint.close(CloseInitiator::User, "again");
        assert_eq!(h.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_channel_id_ignored() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) = request(service_type::TUNNELING_REQ, 8, 0, ldata_req(0, 0x1105));
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        assert!(h.data.take().is_empty());
        assert_eq!(h.endpoint.seq_recv(), 0);
    }

    #[test]
    fn broken_cemi_acked_and_dropped() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) = request(service_type::TUNNELING_REQ, 7, 0, Vec::new());
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        assert_eq!(h.data.take().len(), 1);
        assert!(h.frames.lock().is_empty());
        assert_eq!(h.endpoint.seq_recv(), 1);
    }

    #[test]
    fn feature_get_individual_address() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let packet = TunnelingFeature {
            channel_id: 7,
            seq: 0,
            feature: InterfaceFeature::IndividualAddress,
            value: Vec::new(),
        }
        .to_packet(service_type::TUNNELING_FEATURE_GET);
        let (header, body) = split_packet(&packet).unwrap();

        assert!(h.endpoint.accept_data_service(&header, body).unwrap());
        let sent = h.data.take();
        assert_eq!(sent.len(), 2); // ack, then the response

        let (res_header, res_body) = split_packet(&sent[1].0).unwrap();
        assert_eq!(
            res_header.service_type,
            service_type::TUNNELING_FEATURE_RESPONSE
        );
        // connection header, feature id, result, value
        assert_eq!(res_body, [4, 7, 0, 0, 6, 0x00, 0x12, 0x03]);
        assert_eq!(h.endpoint.seq_recv(), 1);
    }

    #[test]
    fn feature_set_only_info_service_writable() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);

        let set = TunnelingFeature {
            channel_id: 7,
            seq: 0,
            feature: InterfaceFeature::EnableFeatureInfoService,
            value: vec![0x01],
        }
        .to_packet(service_type::TUNNELING_FEATURE_SET);
        let (header, body) = split_packet(&set).unwrap();
        h.endpoint.accept_data_service(&header, body).unwrap();
        let sent = h.data.take();
        let (_, res_body) = split_packet(&sent[1].0).unwrap();
        assert_eq!(res_body[5], FeatureResult::Success as u8);
        assert_eq!(res_body[6], 0x01);

        // read back the written value
        let get = TunnelingFeature {
            channel_id: 7,
            seq: 1,
            feature: InterfaceFeature::EnableFeatureInfoService,
            value: Vec::new(),
        }
        .to_packet(service_type::TUNNELING_FEATURE_GET);
        let (header, body) = split_packet(&get).unwrap();
        h.endpoint.accept_data_service(&header, body).unwrap();
        let sent = h.data.take();
        let (_, res_body) = split_packet(&sent[1].0).unwrap();
        assert_eq!(&res_body[5..], [FeatureResult::Success as u8, 0x01]);

        // every other feature is read-only
        let set = TunnelingFeature {
            channel_id: 7,
            seq: 2,
            feature: InterfaceFeature::IndividualAddress,
            value: vec![0x11, 0x06],
        }
        .to_packet(service_type::TUNNELING_FEATURE_SET);
        let (header, body) = split_packet(&set).unwrap();
        h.endpoint.accept_data_service(&header, body).unwrap();
        let sent = h.data.take();
        let (_, res_body) = split_packet(&sent[1].0).unwrap();
        assert_eq!(res_body[5], FeatureResult::AccessReadOnly as u8);
        assert_eq!(res_body.len(), 6);
    }

    #[test]
    fn ack_advances_send_sequence() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        h.endpoint.send(&frame, BlockingMode::NonBlocking).unwrap();
        assert_eq!(h.endpoint.state(), ConnectionState::AckPending);
        assert_eq!(h.endpoint.seq_send(), 0);

        let (header, body) = ack(service_type::TUNNELING_ACK, 7, 0, ErrorCode::NoError);
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        assert_eq!(h.endpoint.seq_send(), 1);
        assert_eq!(h.endpoint.state(), ConnectionState::Ok);
    }

    #[test]
    fn stale_ack_ignored() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let (header, body) = ack(service_type::TUNNELING_ACK, 7, 5, ErrorCode::NoError);
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        assert_eq!(h.endpoint.seq_send(), 0);
        assert_eq!(h.endpoint.state(), ConnectionState::Ok);
    }

    #[test]
    fn error_ack_sets_ack_error() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        h.endpoint.send(&frame, BlockingMode::NonBlocking).unwrap();

        let (header, body) = ack(service_type::TUNNELING_ACK, 7, 0, ErrorCode::DataConnection);
        h.endpoint.accept_data_service(&header, &body).unwrap();
        assert_eq!(h.endpoint.state(), ConnectionState::AckError);
        assert_eq!(h.endpoint.seq_send(), 1);
    }

    #[test]
    fn blocking_send_completes_on_ack() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let endpoint = h.endpoint.clone();
        let acker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let (header, body) = ack(service_type::TUNNELING_ACK, 7, 0, ErrorCode::NoError);
            endpoint.accept_data_service(&header, &body).unwrap();
        });

        let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        h.endpoint.send(&frame, BlockingMode::Blocking).unwrap();
        acker.join().unwrap();

        assert_eq!(h.endpoint.state(), ConnectionState::Ok);
        assert_eq!(h.endpoint.seq_send(), 1);
        assert_eq!(h.data.take().len(), 1);
    }

    #[test]
    fn blocking_send_times_out_after_retries() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        let started = Instant::now();
        assert!(matches!(
            h.endpoint.send(&frame, BlockingMode::Blocking),
            Err(Error::Connection(ConnectionError::Timeout))
        ));
        // three attempts, one second window each
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(h.data.take().len(), 3);
        assert_eq!(h.endpoint.state(), ConnectionState::AckError);
        // the channel stays open for the next attempt
        assert_eq!(h.closed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn busmonitor_never_dispatches_inbound_cemi() {
        let h = harness(ChannelRole::TunnelBusMonitor, 7);
        let (header, body) = request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0, 0x1105));
        assert!(h.endpoint.accept_data_service(&header, &body).unwrap());
        // acknowledged, sequence advanced, nothing forwarded
        assert_eq!(h.data.take().len(), 1);
        assert_eq!(h.endpoint.seq_recv(), 1);
        assert!(h.frames.lock().is_empty());
    }

    #[test]
    fn tunneling_drops_confirmations_and_indications() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        for (seq, mc) in [
            message_code::L_DATA_CON,
            message_code::L_DATA_IND,
            message_code::BUSMON_IND,
        ]
        .into_iter()
        .enumerate()
        {
            let (header, body) =
                request(service_type::TUNNELING_REQ, 7, seq as u8, vec![mc, 0, 0, 0]);
            h.endpoint.accept_data_service(&header, &body).unwrap();
        }
        assert!(h.frames.lock().is_empty());
        assert_eq!(h.endpoint.seq_recv(), 3);
    }

    #[test]
    fn device_mgmt_dispatch_and_reset() {
        let h = harness(ChannelRole::DeviceMgmt, 3);
        let (header, body) = request(
            service_type::DEVICE_CONFIGURATION_REQ,
            3,
            0,
            vec![message_code::PROPREAD_REQ, 0, 0, 8, 1, 0x10, 1, 1],
        );
        h.endpoint.accept_data_service(&header, &body).unwrap();
        assert_eq!(h.frames.lock().len(), 1);
        assert_eq!(h.resets.load(Ordering::SeqCst), 0);

        let (header, body) = request(
            service_type::DEVICE_CONFIGURATION_REQ,
            3,
            1,
            vec![message_code::RESET_REQ],
        );
        h.endpoint.accept_data_service(&header, &body).unwrap();
        assert_eq!(h.frames.lock().len(), 2);
        assert_eq!(h.resets.load(Ordering::SeqCst), 1);

        // confirmations are dropped
        let (header, body) = request(
            service_type::DEVICE_CONFIGURATION_REQ,
            3,
            2,
            vec![message_code::PROPREAD_CON, 0],
        );
        h.endpoint.accept_data_service(&header, &body).unwrap();
        assert_eq!(h.frames.lock().len(), 2);
    }

    #[test]
    fn frame_class_checked_against_role() {
        let monitor = harness(ChannelRole::TunnelBusMonitor, 1);
        let ldata = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        assert!(matches!(
            monitor.endpoint.send(&ldata, BlockingMode::NonBlocking),
            Err(Error::Connection(ConnectionError::FrameType))
        ));

        let busmon = CemiFrame::from_bytes(vec![message_code::BUSMON_IND, 0, 1, 2]).unwrap();
        monitor
            .endpoint
            .send(&busmon, BlockingMode::NonBlocking)
            .unwrap();

        let mgmt = harness(ChannelRole::DeviceMgmt, 2);
        assert!(matches!(
            mgmt.endpoint.send(&ldata, BlockingMode::NonBlocking),
            Err(Error::Connection(ConnectionError::FrameType))
        ));
    }

    #[test]
    fn stream_binding_forces_non_blocking_send() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let stream = Arc::new(MockTransport::stream(55100));
        h.endpoint.bind_stream(stream.clone());

        let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        // returns immediately despite blocking mode, state is OK
        h.endpoint.send(&frame, BlockingMode::Blocking).unwrap();
        assert_eq!(h.endpoint.state(), ConnectionState::Ok);
        assert_eq!(stream.take().len(), 1);
        assert!(h.data.take().is_empty());
    }

    #[test]
    fn send_on_closed_channel_fails() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        h.endpoint.close(CloseInitiator::Server, "shutdown");
        let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
        assert!(matches!(
            h.endpoint.send(&frame, BlockingMode::Blocking),
            Err(Error::Connection(ConnectionError::Closed))
        ));
    }

    #[test]
    fn connection_state_answered_on_control_endpoint() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let control: Arc<dyn ControlEndpoint> = Arc::new(TestControl::new(ErrorCode::NoError));
        h.endpoint.set_control_endpoint(&control);

        let packet = ConnectionstateRequest {
            channel_id: 7,
            control_endpoint: Hpai::udp("192.168.1.50".parse().unwrap(), 50001),
        }
        .to_packet(service_type::CONNECTIONSTATE_REQ);
        let (header, body) = split_packet(&packet).unwrap();

        assert!(h.endpoint.accept_data_service(&header, body).unwrap());
        assert!(h.data.take().is_empty());
        let sent = h.ctrl.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, remote_ctrl());
        let (res_header, res_body) = split_packet(&sent[0].0).unwrap();
        assert_eq!(res_header.service_type, service_type::CONNECTIONSTATE_RES);
        let res = ConnectionstateResponse::decode(res_body).unwrap();
        assert_eq!(res.channel_id, 7);
        assert_eq!(res.status, u8::from(ErrorCode::NoError));
    }

    #[test]
    fn connection_state_without_control_reports_knx_connection() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let packet = ConnectionstateRequest {
            channel_id: 7,
            control_endpoint: Hpai::udp("192.168.1.50".parse().unwrap(), 50001),
        }
        .to_packet(service_type::CONNECTIONSTATE_REQ);
        let (header, body) = split_packet(&packet).unwrap();
        h.endpoint.accept_data_service(&header, body).unwrap();

        let sent = h.ctrl.take();
        let (_, res_body) = split_packet(&sent[0].0).unwrap();
        let res = ConnectionstateResponse::decode(res_body).unwrap();
        assert_eq!(res.status, u8::from(ErrorCode::KnxConnection));
    }

    #[test]
    fn configuration_packet_for_other_channel_redirected() {
        let tunnel = harness(ChannelRole::TunnelLinkLayer, 1);
        let mgmt = harness(ChannelRole::DeviceMgmt, 2);

        let control = Arc::new(TestControl::new(ErrorCode::NoError));
        control
            .endpoints
            .lock()
            .insert(2, mgmt.endpoint.clone());
        let control: Arc<dyn ControlEndpoint> = control;
        tunnel.endpoint.set_control_endpoint(&control);

        let (header, body) = request(
            service_type::DEVICE_CONFIGURATION_REQ,
            2,
            0,
            vec![message_code::PROPREAD_REQ, 0, 0, 8, 1, 0x10, 1, 1],
        );
        assert!(tunnel.endpoint.accept_data_service(&header, &body).unwrap());

        // the management endpoint was rebound to the tunnel's port and
        // processed the request there
        assert_eq!(mgmt.endpoint.seq_recv(), 1);
        assert_eq!(mgmt.frames.lock().len(), 1);
        let acks = tunnel.data.take();
        assert_eq!(acks.len(), 1);
        assert_eq!(
            parse_ack(&acks[0].0).0,
            service_type::DEVICE_CONFIGURATION_ACK
        );

        // a configuration packet naming this channel itself is not ours
        let (header, body) = request(
            service_type::DEVICE_CONFIGURATION_REQ,
            1,
            0,
            vec![message_code::PROPREAD_REQ],
        );
        assert!(!tunnel.endpoint.accept_data_service(&header, &body).unwrap());
    }

    #[test]
    fn heartbeat_idle_time_observable() {
        let h = harness(ChannelRole::TunnelLinkLayer, 7);
        let later = Instant::now() + Duration::from_secs(30);
        assert!(h.endpoint.tick(later) >= Duration::from_secs(30));

        let (header, body) = request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0, 0x1105));
        h.endpoint.accept_data_service(&header, &body).unwrap();
        assert!(h.endpoint.tick(Instant::now()) < Duration::from_secs(1));
    }

    mod secure {
        use super::*;
        use knxip_wire::to_packet;
        use rand_core::OsRng;
        use x25519_dalek::{PublicKey, StaticSecret};

        /// Client side of the handshake against the harness store.
        fn establish(h: &Harness, client: SocketAddr) -> (u16, SessionKey) {
            let secret = StaticSecret::random_from_rng(OsRng);
            let client_public = PublicKey::from(&secret).to_bytes();

            let mut body = vec![0x08, 0x01, 192, 168, 1, 50, 0xC3, 0x51];
            body.extend_from_slice(&client_public);
            let header = KnxHeader::new(service_type::SESSION_REQ, body.len());
            struct Null;
            impl SecureService for Null {
                fn accept_unwrapped(
                    &self,
                    _: u16,
                    _: &KnxHeader,
                    _: &[u8],
                    _: SocketAddr,
                ) -> Result<bool> {
                    Ok(true)
                }
            }
            assert!(h.store.accept(&header, &body, client, &Null).unwrap());

            let (response, _) = h.ctrl.take().pop().unwrap();
            let (_, res_body) = split_packet(&response).unwrap();
            let sid = u16::from_be_bytes([res_body[0], res_body[1]]);
            let mut server_public = [0u8; 32];
            server_public.copy_from_slice(&res_body[2..34]);
            let shared = secret.diffie_hellman(&PublicKey::from(server_public));
            let key = knxip_secure::crypto::session_key_from_shared(shared.as_bytes());
            (sid, key)
        }

        #[test]
        fn secured_channel_roundtrip() {
            let plain = harness(ChannelRole::TunnelLinkLayer, 7);
            let (sid, key) = establish(&plain, remote_ctrl());
            let h = harness_with_session(
                ChannelRole::TunnelLinkLayer,
                7,
                sid,
                Some(plain.store.clone()),
            );

            // wrapped tunneling request goes through unwrap and the state machine
            let inner = ServiceRequest::new(7, 0, ldata_req(0, 0x1105))
                .to_packet(service_type::TUNNELING_REQ);
            let wrapped = knxip_secure::secure_packet(&key, sid, 0, &[3; 6], 0, &inner);
            let (header, body) = split_packet(&wrapped).unwrap();
            assert!(h
                .endpoint
                .handle_data_service(&header, body, remote_data())
                .unwrap());

            assert_eq!(h.endpoint.seq_recv(), 1);
            assert_eq!(h.frames.lock().len(), 1);

            // the acknowledgment came back wrapped in the session
            let sent = h.data.take();
            assert_eq!(sent.len(), 1);
            let (ack_header, ack_body) = split_packet(&sent[0].0).unwrap();
            assert_eq!(ack_header.service_type, service_type::SECURE_SVC);
            let frame = unwrap_secure(&key, &ack_header, ack_body).unwrap();
            let (inner_header, inner_body) = split_packet(&frame.inner).unwrap();
            assert_eq!(inner_header.service_type, service_type::TUNNELING_ACK);
            let ack = ServiceAck::decode(inner_body).unwrap();
            assert_eq!((ack.channel_id, ack.seq, ack.status), (7, 0, 0));
        }

        #[test]
        fn plaintext_on_secured_channel_discarded() {
            let plain = harness(ChannelRole::TunnelLinkLayer, 7);
            let (sid, _key) = establish(&plain, remote_ctrl());
            let h = harness_with_session(
                ChannelRole::TunnelLinkLayer,
                7,
                sid,
                Some(plain.store.clone()),
            );

            let (header, body) = request(service_type::TUNNELING_REQ, 7, 0, ldata_req(0, 0x1105));
            // consumed but discarded
            assert!(h
                .endpoint
                .handle_data_service(&header, &body, remote_data())
                .unwrap());
            assert_eq!(h.endpoint.seq_recv(), 0);
            assert!(h.frames.lock().is_empty());
            assert!(h.data.take().is_empty());
        }

        #[test]
        fn session_removal_cascades_to_channel() {
            let plain = harness(ChannelRole::TunnelLinkLayer, 7);
            let (sid, _key) = establish(&plain, remote_ctrl());
            let h = harness_with_session(
                ChannelRole::TunnelLinkLayer,
                7,
                sid,
                Some(plain.store.clone()),
            );
            let endpoint = h.endpoint.clone();
            h.store.set_channel_closer(Box::new(move |channel, reason| {
                if channel == endpoint.channel_id() {
                    endpoint.close(CloseInitiator::Server, reason);
                }
            }));

            h.store.remove_session(sid, "session timed out");
            assert_eq!(h.endpoint.state(), ConnectionState::Closed);
            assert_eq!(h.closed.load(Ordering::SeqCst), 1);

            let frame = CemiFrame::from_bytes(ldata_req(0x1203, 0x1105)).unwrap();
            assert!(matches!(
                h.endpoint.send(&frame, BlockingMode::Blocking),
                Err(Error::Connection(ConnectionError::Closed))
            ));
        }

        #[test]
        fn status_packet_total_length_is_eight() {
            // the wrapped session-status body is status + reserved
            let packet = to_packet(service_type::SESSION_STATUS, &[3, 0]);
            assert_eq!(packet.len(), 8);
        }
    }
}
