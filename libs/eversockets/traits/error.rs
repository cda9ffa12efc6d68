use crate::traits::transport::HandshakeResponse;
use thiserror::Error;

/// Error types for EverSockets operations
#[derive(Error, Debug, Clone)]
pub enum SocketError {
    /// An I/O call was made while no transport is installed.
    ///
    /// This is an expected condition while a reconnect is in flight:
    /// callers should treat it as "retry later", not as a failure.
    #[error("websocket: not connected")]
    NotConnected,

    /// Invalid configuration (empty URL, bad scheme, embedded
    /// credentials). Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The post-connect handler failed. Fatal for this handle; the
    /// freshly installed transport is torn down and no retry happens.
    #[error("connect handler failed with {0}")]
    ConnectHandler(String),

    /// A dial attempt failed. Recovered automatically by the reconnect
    /// loop; retained in the state record for inspection. When the
    /// server rejected the handshake, its HTTP response rides along.
    #[error("dial failed: {message}")]
    Dial {
        message: String,
        response: Option<HandshakeResponse>,
    },

    /// Mid-session transport failure. Triggers a reconnect; surfaced
    /// only to the I/O call that hit it.
    #[error("transport error: {0}")]
    Transport(String),

    /// The stream ended without a graceful close handshake.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// JSON encoding/decoding failed. The transport is healthy, so no
    /// reconnect is triggered.
    #[error("codec error: {0}")]
    Codec(String),
}

/// Result type alias for EverSockets operations
pub type Result<T> = std::result::Result<T, SocketError>;
