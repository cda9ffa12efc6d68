//! Default transport implementation on tokio-tungstenite
//!
//! Wraps the handshake, the split stream halves and the frame model
//! behind the transport traits so the lifecycle layer never touches
//! tungstenite types directly.

use crate::traits::error::{Result, SocketError};
use crate::traits::transport::{
    CloseReason, DialOutcome, Dialer, Frame, HandshakeResponse, Target, TransportReader,
    TransportWriter,
};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Dialer backed by tokio-tungstenite
///
/// TLS configuration is consumed here; wss URLs without an explicit
/// connector use the platform's native TLS defaults. The reconnect
/// loop enforces the handshake timeout around `dial`.
pub struct TungsteniteDialer {
    tls: Option<native_tls::TlsConnector>,
}

impl TungsteniteDialer {
    pub fn new(tls: Option<native_tls::TlsConnector>) -> Self {
        Self { tls }
    }
}

#[async_trait]
impl Dialer for TungsteniteDialer {
    async fn dial(&self, target: &Target) -> Result<DialOutcome> {
        let mut request = target
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SocketError::Dial {
                message: e.to_string(),
                response: None,
            })?;
        for (name, value) in target.headers.iter() {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        let connector = self.tls.clone().map(Connector::NativeTls);

        match connect_async_tls_with_config(request, None, false, connector).await {
            Ok((stream, response)) => {
                let handshake = HandshakeResponse {
                    status: response.status(),
                    headers: response.headers().clone(),
                };
                let (sink, source) = stream.split();
                Ok(DialOutcome {
                    reader: Box::new(TungsteniteReader { source }),
                    writer: Box::new(TungsteniteWriter { sink }),
                    response: handshake,
                })
            }
            // A rejected upgrade carries the server's HTTP response;
            // keep it so callers can inspect redirects or auth challenges.
            Err(WsError::Http(response)) => {
                let status = response.status();
                Err(SocketError::Dial {
                    message: format!("handshake rejected with status {}", status),
                    response: Some(HandshakeResponse {
                        status,
                        headers: response.headers().clone(),
                    }),
                })
            }
            Err(e) => Err(SocketError::Dial {
                message: e.to_string(),
                response: None,
            }),
        }
    }
}

/// Read half of a tungstenite connection
pub struct TungsteniteReader {
    source: WsSource,
}

#[async_trait]
impl TransportReader for TungsteniteReader {
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match self.source.next().await {
                None => return Ok(None),
                Some(Ok(message)) => match message_to_frame(message) {
                    Some(frame) => return Ok(Some(frame)),
                    // Raw frame variant, never surfaced by a normal read
                    None => continue,
                },
                Some(Err(WsError::ConnectionClosed)) | Some(Err(WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => return Err(SocketError::Transport(e.to_string())),
            }
        }
    }
}

/// Write half of a tungstenite connection
pub struct TungsteniteWriter {
    sink: WsSink,
}

#[async_trait]
impl TransportWriter for TungsteniteWriter {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.sink
            .send(frame_to_message(frame))
            .await
            .map_err(map_write_error)
    }

    async fn send_ping(&mut self, payload: Vec<u8>, write_wait: Duration) -> Result<()> {
        match tokio::time::timeout(write_wait, self.sink.send(Message::Ping(payload))).await {
            Ok(result) => result.map_err(map_write_error),
            Err(_) => Err(SocketError::Transport(format!(
                "ping write timed out after {:?}",
                write_wait
            ))),
        }
    }

    async fn send_close(
        &mut self,
        reason: Option<CloseReason>,
        write_wait: Duration,
    ) -> Result<()> {
        let frame = reason.map(close_reason_to_frame);
        match tokio::time::timeout(write_wait, self.sink.send(Message::Close(frame))).await {
            Ok(result) => result.map_err(map_write_error),
            Err(_) => Err(SocketError::Transport(format!(
                "close write timed out after {:?}",
                write_wait
            ))),
        }
    }
}

fn map_write_error(error: WsError) -> SocketError {
    match error {
        // The close handshake already completed; not a transport fault
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            SocketError::ConnectionClosed(error.to_string())
        }
        other => SocketError::Transport(other.to_string()),
    }
}

fn close_reason_to_frame(reason: CloseReason) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(reason.code),
        reason: Cow::Owned(reason.reason),
    }
}

/// Convert a transport frame to a tungstenite Message
fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
        Frame::Ping(payload) => Message::Ping(payload),
        Frame::Pong(payload) => Message::Pong(payload),
        Frame::Close(reason) => Message::Close(reason.map(close_reason_to_frame)),
    }
}

/// Convert a tungstenite Message to a transport frame
fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(payload) => Some(Frame::Ping(payload)),
        Message::Pong(payload) => Some(Frame::Pong(payload)),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| CloseReason {
            code: f.code.into(),
            reason: f.reason.into_owned(),
        }))),
        Message::Frame(_) => None,
    }
}
