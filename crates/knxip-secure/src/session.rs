//! Per-session state.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::crypto::{SessionKey, PUBLIC_KEY_SIZE};

/// 48-bit wrap mask for the secure send sequence.
const SEQ_MASK: u64 = 0xFFFF_FFFF_FFFF;

/// Lifecycle state of a secure session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Established by a session request, not yet authenticated.
    Pending,
    /// Client authenticated with a user id.
    Authenticated,
    /// Removed after auth failure, timeout, or explicit close.
    Closed,
}

/// One established secure session.
#[derive(Debug)]
pub struct Session {
    /// Client control endpoint the session was established from.
    pub client: SocketAddr,
    /// Symmetric key derived from the handshake.
    secret_key: SessionKey,
    /// Monotonic 48-bit send sequence.
    pub send_seq: u64,
    /// Updated on every valid secure packet.
    pub last_update: Instant,
    /// 0 = unauthenticated, 1 = management, 2..=127 = restricted.
    pub user_id: u8,
    /// Lifecycle state.
    pub state: SessionState,
    /// Client X25519 public key from the session request.
    pub client_public: [u8; PUBLIC_KEY_SIZE],
    /// Server ephemeral X25519 public key from the session response.
    pub server_public: [u8; PUBLIC_KEY_SIZE],
}

impl Session {
    pub fn new(
        client: SocketAddr,
        secret_key: SessionKey,
        client_public: [u8; PUBLIC_KEY_SIZE],
        server_public: [u8; PUBLIC_KEY_SIZE],
    ) -> Self {
        Self {
            client,
            secret_key,
            send_seq: 0,
            last_update: Instant::now(),
            user_id: 0,
            state: SessionState::Pending,
            client_public,
            server_public,
        }
    }

    /// The session key.
    #[inline]
    pub fn secret_key(&self) -> &SessionKey {
        &self.secret_key
    }

    /// Claim the next send sequence number.
    pub fn next_send_seq(&mut self) -> u64 {
        let seq = self.send_seq;
        self.send_seq = (self.send_seq + 1) & SEQ_MASK;
        seq
    }

    /// Mark activity on the session.
    pub fn touch(&mut self) {
        self.last_update = Instant::now();
    }

    /// How long the session has been without a valid packet, as of `now`.
    pub fn dormant_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_update)
    }
}
