//! Common test utilities for EverSockets integration tests
//!
//! Provides a real loopback websocket server plus scripted transport
//! doubles, so lifecycle tests can run either against live sockets or
//! fully deterministically without a network.

use async_trait::async_trait;
use eversockets::traits::{
    CloseReason, DialOutcome, Dialer, Frame, HandshakeResponse, SocketError, Target,
    TransportReader, TransportWriter,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::http::{HeaderMap, StatusCode};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// The handshake response a scripted dial hands out
pub fn switching_protocols() -> HandshakeResponse {
    HandshakeResponse {
        status: StatusCode::SWITCHING_PROTOCOLS,
        headers: HeaderMap::new(),
    }
}

/// A simple mock WebSocket server for testing
///
/// Echoes Text and Binary, answers Pings with Pongs and reacts to two
/// scripted commands: a `"close"` Text message makes the server start a
/// graceful close handshake, a `"drop"` Text message makes it sever the
/// connection without one.
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    /// Completed websocket handshakes since start.
    pub connections: Arc<AtomicUsize>,
    /// Close frames received from clients.
    pub closes_received: Arc<AtomicUsize>,
    /// Request headers of the most recent handshake.
    pub last_headers: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockWsServer {
    /// Create and start a new mock WebSocket server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let connections = Arc::new(AtomicUsize::new(0));
        let closes_received = Arc::new(AtomicUsize::new(0));
        let last_headers = Arc::new(Mutex::new(Vec::new()));

        let shutdown_clone = shutdown.clone();
        let connections_clone = connections.clone();
        let closes_clone = closes_received.clone();
        let headers_clone = last_headers.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                let connections = connections_clone.clone();
                                let closes = closes_clone.clone();
                                let headers = headers_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown, connections, closes, headers).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown,
            connections,
            closes_received,
            last_headers,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        shutdown: Arc<Notify>,
        connections: Arc<AtomicUsize>,
        closes_received: Arc<AtomicUsize>,
        last_headers: Arc<Mutex<Vec<(String, String)>>>,
    ) {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        use tokio_tungstenite::tungstenite::Message;

        let callback = move |req: &Request, response: Response| {
            let captured = req
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.to_string(),
                        String::from_utf8_lossy(value.as_bytes()).to_string(),
                    )
                })
                .collect();
            *last_headers.lock().unwrap() = captured;
            Ok(response)
        };

        let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };
        connections.fetch_add(1, Ordering::SeqCst);

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if msg.is_text() && msg.to_text().unwrap_or("") == "close" {
                                // Server-initiated graceful close
                                let frame = CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "bye".into(),
                                };
                                let _ = write.send(Message::Close(Some(frame))).await;
                                break;
                            } else if msg.is_text() && msg.to_text().unwrap_or("") == "drop" {
                                // Abrupt loss: no close handshake at all
                                break;
                            } else if msg.is_text() || msg.is_binary() {
                                // Echo the message back
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_ping() {
                                // Respond to ping with pong
                                let pong = Message::Pong(msg.into_data());
                                if write.send(pong).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                closes_received.fetch_add(1, Ordering::SeqCst);
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dialer double that scripts every attempt
///
/// Fails a configurable number of leading attempts, then hands out
/// transports whose read side replays a queued script (and blocks once
/// it runs dry) and whose write side records everything. All counters
/// are shared, so tests clone them out before handing the dialer to the
/// config.
pub struct ScriptedDialer {
    pub dial_count: Arc<AtomicUsize>,
    pub sent: Arc<Mutex<Vec<Frame>>>,
    pub pings: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    failures_before_success: usize,
    dial_delay: Duration,
    reader_scripts: Mutex<VecDeque<Vec<eversockets::Result<Option<Frame>>>>>,
}

impl ScriptedDialer {
    pub fn new() -> Self {
        Self {
            dial_count: Arc::new(AtomicUsize::new(0)),
            sent: Arc::new(Mutex::new(Vec::new())),
            pings: Arc::new(AtomicUsize::new(0)),
            closes: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 0,
            dial_delay: Duration::ZERO,
            reader_scripts: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the first `failures` attempts before succeeding
    pub fn failing_first(mut self, failures: usize) -> Self {
        self.failures_before_success = failures;
        self
    }

    /// Make every attempt take this long
    pub fn dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    /// Queue a read script for the next successful dial
    ///
    /// Scripts are consumed in dial order; a dial without one gets a
    /// reader that blocks forever.
    pub fn reader_script(self, steps: Vec<eversockets::Result<Option<Frame>>>) -> Self {
        self.reader_scripts.lock().unwrap().push_back(steps);
        self
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, _target: &Target) -> eversockets::Result<DialOutcome> {
        let attempt = self.dial_count.fetch_add(1, Ordering::SeqCst);
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if attempt < self.failures_before_success {
            return Err(SocketError::Dial {
                message: format!("scripted dial failure {}", attempt + 1),
                response: None,
            });
        }
        let steps = self
            .reader_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(DialOutcome {
            reader: Box::new(ScriptReader {
                steps: steps.into(),
            }),
            writer: Box::new(RecordingWriter {
                sent: Arc::clone(&self.sent),
                pings: Arc::clone(&self.pings),
                closes: Arc::clone(&self.closes),
            }),
            response: switching_protocols(),
        })
    }
}

/// Reader that replays queued steps, then blocks forever
pub struct ScriptReader {
    steps: VecDeque<eversockets::Result<Option<Frame>>>,
}

#[async_trait]
impl TransportReader for ScriptReader {
    async fn next_frame(&mut self) -> eversockets::Result<Option<Frame>> {
        match self.steps.pop_front() {
            Some(step) => step,
            None => std::future::pending().await,
        }
    }
}

/// Writer that records every call and always succeeds
pub struct RecordingWriter {
    sent: Arc<Mutex<Vec<Frame>>>,
    pings: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportWriter for RecordingWriter {
    async fn send(&mut self, frame: Frame) -> eversockets::Result<()> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn send_ping(&mut self, _payload: Vec<u8>, _write_wait: Duration) -> eversockets::Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_close(
        &mut self,
        _reason: Option<CloseReason>,
        _write_wait: Duration,
    ) -> eversockets::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
