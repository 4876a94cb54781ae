//! Error types for the KNXnet/IP server core.

use thiserror::Error;

/// Errors that can occur while parsing or building KNXnet/IP frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Failed to decode a frame or service body
    #[error("failed to decode frame")]
    Decode,

    /// Failed to encode a frame
    #[error("failed to encode frame")]
    Encode,

    /// Frame was shorter than its structure requires
    #[error("frame too short")]
    Truncated,

    /// Header carries an unsupported header size or layout
    #[error("bad KNXnet/IP header")]
    BadHeader,

    /// A field holds a value outside its allowed range
    #[error("invalid field value")]
    InvalidData,
}

/// Errors that can occur in the secure session layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecureError {
    /// No session is established under this id
    #[error("invalid secure session ID {0}")]
    UnknownSession(u16),

    /// Invalid key length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Message authentication code did not verify
    #[error("message authentication failed")]
    AuthFailed,

    /// User id outside the allowed range
    #[error("user ID {0} out of range [1..127]")]
    UserIdRange(u16),

    /// Secure wrapper shorter than its fixed fields
    #[error("secure packet too short")]
    Truncated,

    /// All session ids are in use
    #[error("no free session ID")]
    Exhausted,
}

/// Errors tied to a data-endpoint connection operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation on a closed channel
    #[error("connection closed")]
    Closed,

    /// No acknowledgment within the response window after all attempts
    #[error("acknowledgment timeout")]
    Timeout,

    /// cEMI frame class does not match the channel role
    #[error("cEMI frame type not allowed on this connection")]
    FrameType,
}

/// A unified error type for all server core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Secure(#[from] SecureError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// A specialized Result type for server core operations.
pub type Result<T> = std::result::Result<T, Error>;
