//! KNX IP Secure session layer.
//!
//! Implements the server side of the KNX IP Secure unicast handshake (X25519
//! key agreement, CBC-MAC authentication) and the AES-CTR wrapping of
//! KNXnet/IP packets inside `SECURE_SVC` frames, together with session
//! lifetime management.

pub mod crypto;
mod session;
mod store;

pub use crypto::SessionKey;
pub use session::{Session, SessionState};
pub use store::{
    secure_packet, session_status, unwrap_secure, ConnectionType, SecureFrame, SecureService,
    SessionStore, SessionStoreConfig,
};

use std::time::Duration;

/// A session with no valid secure packet for this long is closed.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(120);
