//! Secure session store.
//!
//! Owns all live sessions of one control endpoint: performs the session
//! handshake, authenticates clients, wraps and unwraps secured packets, binds
//! sessions to data-endpoint channels, and closes dormant sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand_core::OsRng;
use x25519_dalek::{EphemeralSecret, PublicKey};

use knxip_types::{Error, Result, SecureError, Transport};
use knxip_wire::{
    chop_slice, chop_u16, chop_u48, put_u48, service_type, split_packet, to_packet, KnxHeader,
    HEADER_SIZE, HPAI_SIZE,
};

use crate::crypto::{
    self, SessionKey, MAC_COUNTER_TAIL, MAC_SIZE, PUBLIC_KEY_SIZE, SERIAL_SIZE, SESSION_KEY_SIZE,
};
use crate::session::{Session, SessionState};
use crate::SESSION_TIMEOUT;

/// Session status codes sent in `SESSION_STATUS` frames.
pub mod session_status {
    pub const AUTH_SUCCESS: u8 = 0;
    pub const AUTH_FAILED: u8 = 1;
    pub const UNAUTHORIZED: u8 = 2;
    pub const TIMEOUT: u8 = 3;

    /// Human-readable status, for logs.
    pub fn message(status: u8) -> &'static str {
        match status {
            AUTH_SUCCESS => "authorization success",
            AUTH_FAILED => "authorization failed",
            UNAUTHORIZED => "unauthorized",
            TIMEOUT => "timeout",
            _ => "unknown status",
        }
    }
}

/// Connection request types relevant to session binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionType {
    /// Device-management connection
    DeviceMgmt = 0x03,
    /// Tunneling connection
    Tunnel = 0x04,
}

/// A consumer of unwrapped inner packets: the data-endpoint handler, or the
/// control-endpoint service outside this crate.
pub trait SecureService: Send + Sync {
    /// Consume an inner packet whose secure wrapper has been stripped.
    fn accept_unwrapped(
        &self,
        session_id: u16,
        header: &KnxHeader,
        body: &[u8],
        src: SocketAddr,
    ) -> Result<bool>;

    /// True for the control-endpoint service; connect requests seen inside a
    /// session are then recorded for session-to-channel binding.
    fn is_control_endpoint(&self) -> bool {
        false
    }
}

/// Provisioned secrets and policy for the store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Device authentication key for the handshake MAC.
    pub device_auth_key: [u8; SESSION_KEY_SIZE],
    /// Password hash per user id, for session-auth verification.
    pub user_password_hashes: HashMap<u8, [u8; SESSION_KEY_SIZE]>,
    /// Reject sessions whose auth MAC does not verify. Off by default: the
    /// MAC is then checked and logged, but the session is accepted.
    pub enforce_session_auth: bool,
    /// Serial number stamped into every secured packet.
    pub serial_number: [u8; SERIAL_SIZE],
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            device_auth_key: [0; SESSION_KEY_SIZE],
            user_password_hashes: HashMap::new(),
            enforce_session_auth: false,
            serial_number: [0; SERIAL_SIZE],
        }
    }
}

type ChannelCloser = Box<dyn Fn(u8, &str) + Send + Sync>;

/// Secure sessions container for KNX IP Secure unicast connections.
pub struct SessionStore {
    transport: Arc<dyn Transport>,
    config: SessionStoreConfig,
    /// Active sessions by id.
    sessions: RwLock<HashMap<u16, Arc<RwLock<Session>>>>,
    /// Control endpoints with a connect request in flight, by source address.
    pending_connections: RwLock<HashMap<SocketAddr, u16>>,
    /// Channels bound to each session, closed with it.
    bound_channels: RwLock<HashMap<u16, Vec<u8>>>,
    counter: AtomicU64,
    channel_closer: RwLock<Option<ChannelCloser>>,
}

impl SessionStore {
    /// Create a store sending through the control-endpoint transport.
    pub fn new(transport: Arc<dyn Transport>, config: SessionStoreConfig) -> Self {
        Self {
            transport,
            config,
            sessions: RwLock::new(HashMap::new()),
            pending_connections: RwLock::new(HashMap::new()),
            bound_channels: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
            channel_closer: RwLock::new(None),
        }
    }

    /// Register the callback that closes channels when their session goes
    /// away. Channels are addressed by id only.
    pub fn set_channel_closer(&self, closer: ChannelCloser) {
        *self.channel_closer.write() = Some(closer);
    }

    /// The serial number stamped into secured packets.
    pub fn serial_number(&self) -> &[u8; SERIAL_SIZE] {
        &self.config.serial_number
    }

    /// Look up a session by id.
    pub fn session(&self, session_id: u16) -> Option<Arc<RwLock<Session>>> {
        self.sessions.read().get(&session_id).cloned()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Dispatch a session-request or secured frame. Returns `true` when the
    /// frame was consumed by the secure layer or the target service.
    pub fn accept(
        &self,
        header: &KnxHeader,
        body: &[u8],
        src: SocketAddr,
        target: &dyn SecureService,
    ) -> Result<bool> {
        let mut session_id = 0u16;
        match self.try_accept(header, body, src, target, &mut session_id) {
            Err(Error::Secure(e)) => {
                tracing::error!(
                    session = session_id,
                    service = %format_args!("0x{:04x}", header.service_type),
                    error = %e,
                    "error processing secure service"
                );
                self.send_status(session_id, session_status::UNAUTHORIZED, src);
                Ok(false)
            }
            other => other,
        }
    }

    fn try_accept(
        &self,
        header: &KnxHeader,
        body: &[u8],
        src: SocketAddr,
        target: &dyn SecureService,
        session_id: &mut u16,
    ) -> Result<bool> {
        match header.service_type {
            service_type::SESSION_REQ => {
                let response = self.establish_session(src, body)?;
                self.transport.send_to(&response, src)?;
                Ok(true)
            }
            service_type::SECURE_SVC => {
                let mut cursor = body;
                let sid = chop_u16(&mut cursor).ok_or(SecureError::Truncated)?;
                *session_id = sid;
                let Some(session) = self.session(sid) else {
                    tracing::warn!(session = sid, "invalid secure session ID");
                    return Ok(false);
                };

                let key = session.read().secret_key().clone();
                let frame = unwrap_secure(&key, header, body)?;
                let (inner_header, inner_body) = split_packet(&frame.inner)?;
                tracing::debug!(
                    session = frame.session_id,
                    seq = frame.seq,
                    serial = %hex::encode(frame.serial),
                    tag = frame.tag,
                    service = %format_args!("0x{:04x}", inner_header.service_type),
                    "received secure packet"
                );
                session.write().touch();

                match inner_header.service_type {
                    service_type::SESSION_AUTH => {
                        let mut status = session_status::AUTH_SUCCESS;
                        match self.session_auth(&session, inner_body) {
                            Ok(user_id) => {
                                tracing::debug!(
                                    client = %src,
                                    session = sid,
                                    user = user_id,
                                    "client authorized for session"
                                );
                            }
                            Err(e) => {
                                tracing::info!(session = sid, "secure session: {e}");
                                status = session_status::AUTH_FAILED;
                            }
                        }
                        self.send_status(sid, status, src);
                        if status == session_status::AUTH_FAILED {
                            self.remove_session(sid, "authentication failed");
                        }
                        Ok(true)
                    }
                    service_type::SESSION_STATUS => {
                        let status = parse_session_status(&inner_header, inner_body)?;
                        tracing::info!(
                            session = sid,
                            status = session_status::message(status),
                            "secure session status"
                        );
                        Ok(true)
                    }
                    svc => {
                        if svc == service_type::CONNECT_REQ && target.is_control_endpoint() {
                            self.pending_connections.write().insert(src, sid);
                        }
                        target.accept_unwrapped(sid, &inner_header, inner_body, src)
                    }
                }
            }
            _ => Ok(false),
        }
    }

    /// Encrypt a plaintext KNXnet/IP packet for the session, stamping the
    /// next send sequence and the server serial number.
    pub fn wrap(&self, session_id: u16, packet: &[u8]) -> Result<Vec<u8>> {
        let session = self
            .session(session_id)
            .ok_or(SecureError::UnknownSession(session_id))?;
        let (seq, key) = {
            let mut s = session.write();
            let seq = s.next_send_seq();
            (seq, s.secret_key().clone())
        };
        Ok(secure_packet(
            &key,
            session_id,
            seq,
            &self.config.serial_number,
            0,
            packet,
        ))
    }

    /// Session id bound to a connect request from this control endpoint, for
    /// the channel being instantiated. Returns 0 when the session lacks the
    /// access level for a management connection.
    pub fn register_connection(
        &self,
        conn_type: ConnectionType,
        ctrl_endpoint: SocketAddr,
        channel_id: u8,
    ) -> u16 {
        let sid = self
            .pending_connections
            .read()
            .get(&ctrl_endpoint)
            .copied()
            .unwrap_or(0);
        // only user 1 has the access level for management connections
        if conn_type == ConnectionType::DeviceMgmt && sid > 0 {
            let restricted = match self.session(sid) {
                Some(session) => session.read().user_id > 1,
                None => true,
            };
            if restricted {
                tracing::warn!(
                    session = sid,
                    channel = channel_id,
                    "session not authorized for device management connection"
                );
                return 0;
            }
        }
        sid
    }

    /// Record a channel as belonging to a session.
    pub fn bind_channel(&self, session_id: u16, channel_id: u8) {
        self.bound_channels
            .write()
            .entry(session_id)
            .or_default()
            .push(channel_id);
    }

    /// Drop a channel binding, e.g. when the channel closes on its own.
    pub fn unbind_channel(&self, session_id: u16, channel_id: u8) {
        let mut map = self.bound_channels.write();
        if let Some(channels) = map.get_mut(&session_id) {
            channels.retain(|&c| c != channel_id);
            if channels.is_empty() {
                map.remove(&session_id);
            }
        }
    }

    /// Remove a session and close every channel bound to it.
    pub fn remove_session(&self, session_id: u16, reason: &str) {
        if let Some(session) = self.sessions.write().remove(&session_id) {
            session.write().state = SessionState::Closed;
        }
        self.pending_connections
            .write()
            .retain(|_, sid| *sid != session_id);
        let channels = self
            .bound_channels
            .write()
            .remove(&session_id)
            .unwrap_or_default();
        if !channels.is_empty() {
            let closer = self.channel_closer.read();
            if let Some(closer) = closer.as_ref() {
                for channel in channels {
                    closer(channel, reason);
                }
            }
        }
    }

    /// Close sessions without a valid secure packet for the timeout window,
    /// notifying each client with a timeout status first.
    pub fn sweep(&self, now: Instant) {
        let dormant: Vec<(u16, SocketAddr, u64)> = self
            .sessions
            .read()
            .iter()
            .filter_map(|(&sid, session)| {
                let session = session.read();
                let dormant = session.dormant_for(now);
                (dormant > SESSION_TIMEOUT).then(|| (sid, session.client, dormant.as_secs()))
            })
            .collect();
        for (sid, client, secs) in dormant {
            tracing::info!(
                session = sid,
                dormant_secs = secs,
                "secure session timed out - close session"
            );
            self.send_status(sid, session_status::TIMEOUT, client);
            self.remove_session(sid, "session timed out");
        }
    }

    fn establish_session(&self, remote: SocketAddr, body: &[u8]) -> Result<Vec<u8>> {
        // control HPAI, then the client's X25519 public key
        if body.len() < HPAI_SIZE + PUBLIC_KEY_SIZE {
            return Err(SecureError::Truncated.into());
        }
        let mut client_public = [0u8; PUBLIC_KEY_SIZE];
        client_public.copy_from_slice(&body[HPAI_SIZE..HPAI_SIZE + PUBLIC_KEY_SIZE]);

        let server_secret = EphemeralSecret::random_from_rng(OsRng);
        let server_public = PublicKey::from(&server_secret).to_bytes();
        let shared = server_secret.diffie_hellman(&PublicKey::from(client_public));
        let secret_key = crypto::session_key_from_shared(shared.as_bytes());

        let session_id = self.new_session_id();
        if session_id != 0 {
            let session = Session::new(remote, secret_key.clone(), client_public, server_public);
            self.sessions
                .write()
                .insert(session_id, Arc::new(RwLock::new(session)));
        }
        tracing::debug!(session = session_id, client = %remote, "establish secure session");
        tracing::trace!(open = self.session_count(), "currently open sessions");

        Ok(self.session_response(session_id, &server_public, &client_public, &secret_key))
    }

    fn session_response(
        &self,
        session_id: u16,
        server_public: &[u8; PUBLIC_KEY_SIZE],
        client_public: &[u8; PUBLIC_KEY_SIZE],
        secret_key: &SessionKey,
    ) -> Vec<u8> {
        if session_id == 0 {
            // refusal: no free session id
            return to_packet(service_type::SESSION_RES, &session_id.to_be_bytes());
        }
        let mut body = Vec::with_capacity(2 + PUBLIC_KEY_SIZE + MAC_SIZE);
        body.extend_from_slice(&session_id.to_be_bytes());
        body.extend_from_slice(server_public);

        let xor = crypto::xor_keys(server_public, client_public);
        let mut mac = crypto::cbc_mac(&self.config.device_auth_key, &xor);
        crypto::encrypt_mac(
            secret_key,
            &crypto::security_info(0, &[0; SERIAL_SIZE], 0, MAC_COUNTER_TAIL),
            &mut mac,
        );
        body.extend_from_slice(&mac);
        to_packet(service_type::SESSION_RES, &body)
    }

    fn session_auth(
        &self,
        session: &Arc<RwLock<Session>>,
        body: &[u8],
    ) -> std::result::Result<u8, SecureError> {
        let mut cursor = body;
        let user_id = chop_u16(&mut cursor).ok_or(SecureError::Truncated)?;
        let mut mac = [0u8; MAC_SIZE];
        if !chop_slice(&mut mac, &mut cursor) {
            return Err(SecureError::Truncated);
        }
        if user_id < 1 || user_id > 0x7F {
            return Err(SecureError::UserIdRange(user_id));
        }
        let user_id = user_id as u8;

        let (client_public, server_public) = {
            let s = session.read();
            (s.client_public, s.server_public)
        };
        let user_key = self
            .config
            .user_password_hashes
            .get(&user_id)
            .copied()
            .unwrap_or([0; SESSION_KEY_SIZE]);
        let xor = crypto::xor_keys(&server_public, &client_public);
        let expected = crypto::cbc_mac(&user_key, &xor);
        if expected != mac {
            if self.config.enforce_session_auth {
                return Err(SecureError::AuthFailed);
            }
            tracing::warn!(user = user_id, "session auth MAC not verified - accepting");
        }

        let mut s = session.write();
        s.user_id = user_id;
        s.state = SessionState::Authenticated;
        Ok(user_id)
    }

    fn send_status(&self, session_id: u16, status: u8, dst: SocketAddr) {
        let packet = to_packet(service_type::SESSION_STATUS, &[status, 0]);
        match self.wrap(session_id, &packet) {
            Ok(buf) => {
                if let Err(e) = self.transport.send_to(&buf, dst) {
                    tracing::error!(
                        session = session_id,
                        status = session_status::message(status),
                        dst = %dst,
                        error = %e,
                        "sending session status"
                    );
                }
            }
            Err(e) => tracing::debug!(
                session = session_id,
                status = session_status::message(status),
                error = %e,
                "cannot send session status"
            ),
        }
    }

    // ids run 1..=0xFFFE; on counter wrap, probe past ids still in use
    fn new_session_id(&self) -> u16 {
        let sessions = self.sessions.read();
        for _ in 0..0xFFFEusize {
            let id = (self.counter.fetch_add(1, Ordering::Relaxed) % 0xFFFE) as u16 + 1;
            if !sessions.contains_key(&id) {
                return id;
            }
        }
        0
    }
}

/// Fields of an unwrapped secured packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureFrame {
    pub session_id: u16,
    pub seq: u64,
    pub serial: [u8; SERIAL_SIZE],
    pub tag: u16,
    /// The inner plaintext KNXnet/IP packet, starting with its own header.
    pub inner: Vec<u8>,
}

/// Build a secured packet: header, session id, sequence, serial, message
/// tag, AES-CTR ciphertext, and the encrypted CBC-MAC.
pub fn secure_packet(
    key: &SessionKey,
    session_id: u16,
    seq: u64,
    serial: &[u8; SERIAL_SIZE],
    tag: u16,
    inner: &[u8],
) -> Vec<u8> {
    let body_len = 2 + 6 + 6 + 2 + inner.len() + MAC_SIZE;
    let header = KnxHeader::new(service_type::SECURE_SVC, body_len);
    let mut out = Vec::with_capacity(HEADER_SIZE + body_len);
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&session_id.to_be_bytes());
    put_u48(&mut out, seq);
    out.extend_from_slice(serial);
    out.extend_from_slice(&tag.to_be_bytes());

    let mut ciphertext = inner.to_vec();
    crypto::ctr_crypt(
        key,
        &crypto::security_info(seq, serial, tag, 0),
        &mut ciphertext,
    );
    out.extend_from_slice(&ciphertext);

    let mut mac = packet_mac(key, &header, session_id, seq, serial, tag, inner);
    crypto::encrypt_mac(
        key,
        &crypto::security_info(seq, serial, tag, MAC_COUNTER_TAIL),
        &mut mac,
    );
    out.extend_from_slice(&mac);
    out
}

/// Strip and verify a secured packet, yielding the inner plaintext packet.
pub fn unwrap_secure(
    key: &SessionKey,
    header: &KnxHeader,
    body: &[u8],
) -> std::result::Result<SecureFrame, SecureError> {
    let mut cursor = body;
    let session_id = chop_u16(&mut cursor).ok_or(SecureError::Truncated)?;
    let seq = chop_u48(&mut cursor).ok_or(SecureError::Truncated)?;
    let mut serial = [0u8; SERIAL_SIZE];
    if !chop_slice(&mut serial, &mut cursor) {
        return Err(SecureError::Truncated);
    }
    let tag = chop_u16(&mut cursor).ok_or(SecureError::Truncated)?;
    if cursor.len() < MAC_SIZE {
        return Err(SecureError::Truncated);
    }
    let (ciphertext, mac) = cursor.split_at(cursor.len() - MAC_SIZE);

    let mut inner = ciphertext.to_vec();
    crypto::ctr_crypt(key, &crypto::security_info(seq, &serial, tag, 0), &mut inner);

    let mut expected = packet_mac(key, header, session_id, seq, &serial, tag, &inner);
    crypto::encrypt_mac(
        key,
        &crypto::security_info(seq, &serial, tag, MAC_COUNTER_TAIL),
        &mut expected,
    );
    if expected[..] != *mac {
        return Err(SecureError::AuthFailed);
    }

    Ok(SecureFrame {
        session_id,
        seq,
        serial,
        tag,
        inner,
    })
}

// CBC-MAC over the length block, the outer header, the session id, and the
// inner plaintext.
fn packet_mac(
    key: &SessionKey,
    header: &KnxHeader,
    session_id: u16,
    seq: u64,
    serial: &[u8; SERIAL_SIZE],
    tag: u16,
    inner: &[u8],
) -> [u8; MAC_SIZE] {
    let mut data = Vec::with_capacity(16 + HEADER_SIZE + 2 + inner.len());
    data.extend_from_slice(&crypto::security_info(seq, serial, tag, inner.len() as u16));
    data.extend_from_slice(&header.to_bytes());
    data.extend_from_slice(&session_id.to_be_bytes());
    data.extend_from_slice(inner);
    crypto::cbc_mac(key.as_bytes(), &data)
}

fn parse_session_status(header: &KnxHeader, body: &[u8]) -> Result<u8> {
    if header.total_length != HEADER_SIZE + 2 || body.is_empty() {
        return Err(knxip_types::WireError::InvalidData.into());
    }
    Ok(body[0])
}
