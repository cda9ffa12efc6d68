use crate::traits::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};

/// Close code for a normal, graceful closure
pub const NORMAL_CLOSURE_CODE: u16 = 1000;

/// Type alias for WebSocket messages
/// Can be Text or Binary data
#[derive(Debug, Clone)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    /// Get the message as text, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsMessage::Text(s) => Some(s),
            WsMessage::Binary(_) => None,
        }
    }

    /// Get the message as binary, if it is binary
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            WsMessage::Text(_) => None,
            WsMessage::Binary(b) => Some(b),
        }
    }

    /// Check if message is text
    pub fn is_text(&self) -> bool {
        matches!(self, WsMessage::Text(_))
    }

    /// Check if message is binary
    pub fn is_binary(&self) -> bool {
        matches!(self, WsMessage::Binary(_))
    }
}

/// Reason attached to a close frame
#[derive(Debug, Clone)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    /// Whether this close frame signals a normal, graceful closure
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE_CODE
    }
}

/// A single frame read from or written to the transport
///
/// Data frames carry application payloads; Ping/Pong/Close are the
/// control frames the lifecycle layer reacts to.
#[derive(Debug, Clone)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Option<CloseReason>),
}

impl Frame {
    /// Wrap an application message in a data frame
    pub fn from_message(message: WsMessage) -> Self {
        match message {
            WsMessage::Text(s) => Frame::Text(s),
            WsMessage::Binary(b) => Frame::Binary(b),
        }
    }

    /// Unwrap a data frame into an application message
    ///
    /// Returns `None` for control frames.
    pub fn into_message(self) -> Option<WsMessage> {
        match self {
            Frame::Text(s) => Some(WsMessage::Text(s)),
            Frame::Binary(b) => Some(WsMessage::Binary(b)),
            Frame::Ping(_) | Frame::Pong(_) | Frame::Close(_) => None,
        }
    }
}

/// Response metadata from the most recent handshake attempt
///
/// Retained for caller inspection even when the handshake failed, so
/// redirects and auth challenges can be examined without the reconnect
/// loop surfacing an error.
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// The dial destination: endpoint URL plus request headers
///
/// Immutable after the first dial call.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    pub headers: HeaderMap,
}

/// A successfully established transport: both halves plus the
/// handshake response
pub struct DialOutcome {
    pub reader: Box<dyn TransportReader>,
    pub writer: Box<dyn TransportWriter>,
    pub response: HandshakeResponse,
}

/// Trait for establishing the underlying transport
///
/// The default implementation wraps tokio-tungstenite; tests substitute
/// scripted dialers. The reconnect loop enforces the handshake timeout
/// around any implementation, so `dial` may simply await the handshake.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Attempt one handshake against the target
    ///
    /// # Returns
    /// * `Ok(DialOutcome)` - Transport established
    /// * `Err(SocketError::Dial)` - Attempt failed; carries the server's
    ///   HTTP response when the handshake was rejected
    async fn dial(&self, target: &Target) -> Result<DialOutcome>;
}

/// Read half of an established transport
#[async_trait]
pub trait TransportReader: Send {
    /// Read the next frame
    ///
    /// # Returns
    /// * `Ok(Some(frame))` - A frame arrived
    /// * `Ok(None)` - The stream ended cleanly after a close handshake
    /// * `Err(SocketError)` - The stream failed
    async fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Write half of an established transport
///
/// All writers for one connection are driven through a single lock, so
/// application writes and watchdog probe writes never interleave.
#[async_trait]
pub trait TransportWriter: Send {
    /// Send a frame
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Send a liveness probe, giving up after `write_wait`
    async fn send_ping(&mut self, payload: Vec<u8>, write_wait: Duration) -> Result<()>;

    /// Send a close frame, giving up after `write_wait`
    async fn send_close(&mut self, reason: Option<CloseReason>, write_wait: Duration)
        -> Result<()>;
}
