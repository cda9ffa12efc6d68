//! The reconnecting websocket handle
//!
//! `EverSocket` owns one logical connection to one URL and keeps it
//! alive across transport failures. The handle is cheap to clone and
//! every clone drives the same underlying session.
//!
//! ```text
//!              EverSocket (Arc clones)
//!                       │
//!        ┌──────────────┼──────────────────┐
//!        ▼              ▼                  ▼
//!   state record   reader cell        writer cell
//!   (RwLock)       (async Mutex)      (async Mutex)
//!        ▲              ▲                  ▲
//!        │              │                  │
//!   dial loop ──── installs both halves ───┘
//!   (spawned task, exponential backoff)
//! ```
//!
//! Exactly one dial loop runs at a time: concurrent reconnect triggers
//! race for a claim under the state lock and all losers back off.
//! Teardown bumps an epoch counter that wakes any I/O call parked on a
//! dead transport before the cells are emptied, so readers never block
//! a reconnect.

use crate::core::config::SocketConfig;
use crate::core::keepalive;
use crate::core::liveness::LivenessTracker;
use crate::core::state::{SessionState, StateSnapshot};
use crate::core::tungstenite::TungsteniteDialer;
use crate::traits::error::{Result, SocketError};
use crate::traits::transport::{
    CloseReason, DialOutcome, Dialer, Frame, HandshakeResponse, TransportReader, TransportWriter,
    WsMessage, NORMAL_CLOSURE_CODE,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, error, info, warn};

/// Shared session storage behind every handle clone
///
/// Lock order is fixed: state lock first (never held across an await),
/// then reader cell, then writer cell. Teardown bumps `epoch` before
/// touching the cells so parked I/O releases them.
pub(crate) struct Core {
    pub(crate) config: SocketConfig,
    pub(crate) state: RwLock<SessionState>,
    pub(crate) reader: Mutex<Option<Box<dyn TransportReader>>>,
    pub(crate) writer: Mutex<Option<Box<dyn TransportWriter>>>,
    pub(crate) tracker: LivenessTracker,
    /// Set once by `close`; every loop and probe checks it.
    pub(crate) abandoned: AtomicBool,
    /// Bumped on every teardown; I/O calls select on it while blocked.
    pub(crate) epoch: watch::Sender<u64>,
    pub(crate) dialer: Arc<dyn Dialer>,
}

/// What one read attempt produced, after the reader lock is released
enum ReadStep {
    Data(WsMessage),
    /// Control frame handled in place; read again.
    Control,
    GracefulRemoteClose,
    Abnormal(SocketError),
}

/// What one write attempt produced, after the writer lock is released
enum WriteStep {
    Sent,
    GracefulRemoteClose,
    Abnormal(SocketError),
}

/// A websocket connection that redials itself after failures
///
/// Obtained from [`EverSocket::dial`]. All I/O goes through this
/// handle; while no transport is installed every I/O call fails fast
/// with [`SocketError::NotConnected`] instead of blocking, and the
/// background dial loop keeps retrying with exponential backoff until
/// it reconnects or the handle is closed.
#[derive(Clone)]
pub struct EverSocket {
    core: Arc<Core>,
}

impl std::fmt::Debug for EverSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EverSocket").finish_non_exhaustive()
    }
}

impl EverSocket {
    /// Validate the target and start connecting
    ///
    /// Configuration problems (empty URL, non-websocket scheme,
    /// embedded credentials) fail immediately. Otherwise the first dial
    /// attempt runs in the background and this call waits for it up to
    /// the handshake timeout: on success the returned handle is already
    /// connected, on a transient failure it is returned anyway and the
    /// loop keeps retrying behind it. Only a post-connect handler
    /// failure on that first attempt is returned as an error, since it
    /// permanently abandons the handle.
    pub async fn dial(url: impl AsRef<str>, config: SocketConfig) -> Result<Self> {
        let config = config.normalized();
        let target = config.parse_target(url.as_ref())?;
        let dialer: Arc<dyn Dialer> = match &config.dialer {
            Some(dialer) => Arc::clone(dialer),
            None => Arc::new(TungsteniteDialer::new(config.tls.clone())),
        };
        let (epoch, _) = watch::channel(0u64);
        let handshake_timeout = config.handshake_timeout;

        let core = Arc::new(Core {
            config,
            state: RwLock::new(SessionState::new(target)),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            tracker: LivenessTracker::new(),
            abandoned: AtomicBool::new(false),
            epoch,
            dialer,
        });

        let (first_tx, first_rx) = oneshot::channel();
        {
            let mut state = core.state.write();
            state.dialing = true;
            state.dial_task = Some(tokio::spawn(run_dial_loop(
                Arc::clone(&core),
                Some(first_tx),
            )));
        }

        // Wait for the first attempt to settle, bounded by the
        // handshake timeout. A transient failure still hands the
        // caller a (disconnected) handle.
        if let Ok(Ok(Err(e))) = tokio::time::timeout(handshake_timeout, first_rx).await {
            return Err(e);
        }

        Ok(Self { core })
    }

    /// Read the next Text or Binary message
    ///
    /// Control frames are handled internally: Pings are answered, Pongs
    /// feed the keepalive tracker. A transport failure or an abnormal
    /// close frame triggers a reconnect and surfaces the error to this
    /// call only; once reconnected, later calls resume normally.
    ///
    /// # Returns
    /// * `Ok(Some(message))` - A message arrived
    /// * `Ok(None)` - The peer closed gracefully; the handle is now
    ///   disconnected and no reconnect is attempted
    /// * `Err(SocketError::NotConnected)` - No transport installed
    pub async fn read_message(&self) -> Result<Option<WsMessage>> {
        loop {
            match self.read_step().await? {
                ReadStep::Data(message) => return Ok(Some(message)),
                ReadStep::Control => continue,
                ReadStep::GracefulRemoteClose => {
                    graceful_close(&self.core).await;
                    return Ok(None);
                }
                ReadStep::Abnormal(e) => {
                    close_and_reconnect(&self.core).await;
                    return Err(e);
                }
            }
        }
    }

    /// Read the next message and decode it as JSON
    ///
    /// Decode failures are [`SocketError::Codec`] and leave the
    /// connection untouched; the transport delivered the bytes fine.
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        match self.read_message().await? {
            None => Ok(None),
            Some(WsMessage::Text(text)) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|e| SocketError::Codec(e.to_string())),
            Some(WsMessage::Binary(data)) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| SocketError::Codec(e.to_string())),
        }
    }

    /// Send one message
    ///
    /// Fails fast with [`SocketError::NotConnected`] while disconnected
    /// instead of queueing. A transport failure triggers a reconnect
    /// and surfaces the error to this call only.
    pub async fn write_message(&self, message: WsMessage) -> Result<()> {
        match self.write_step(Frame::from_message(message)).await? {
            WriteStep::Sent => Ok(()),
            WriteStep::GracefulRemoteClose => {
                graceful_close(&self.core).await;
                Ok(())
            }
            WriteStep::Abnormal(e) => {
                close_and_reconnect(&self.core).await;
                Err(e)
            }
        }
    }

    /// Encode a value as JSON and send it as a Text message
    pub async fn write_json<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(value).map_err(|e| SocketError::Codec(e.to_string()))?;
        self.write_message(WsMessage::Text(text)).await
    }

    /// Tear down the current transport and start the reconnect loop
    ///
    /// No-op when a reconnect is already in flight or the handle has
    /// been closed: any number of concurrent triggers collapse into one
    /// loop. Returns as soon as the loop is spawned; it does not wait
    /// for the new transport.
    pub async fn close_and_reconnect(&self) {
        close_and_reconnect(&self.core).await;
    }

    /// Permanently close the handle
    ///
    /// Stops the dial loop and the watchdog, drops the transport and
    /// waits for the loop task to finish. After this every I/O call
    /// fails with [`SocketError::NotConnected`] forever; dial a new
    /// handle to reconnect. Safe to call more than once.
    pub async fn close(&self) {
        self.core.abandoned.store(true, Ordering::Release);
        let dial_task = self.core.state.write().dial_task.take();
        teardown(&self.core).await;
        if let Some(task) = dial_task {
            let _ = task.await;
        }
    }

    /// Close gracefully: send a close frame, then close the handle
    ///
    /// The close frame write gives up after `write_wait`; whether or
    /// not it goes through, the handle always ends up fully closed.
    pub async fn shutdown(&self, write_wait: Duration) {
        let sent = {
            let mut writer = self.core.writer.lock().await;
            match writer.as_mut() {
                Some(writer) => Some(
                    writer
                        .send_close(
                            Some(CloseReason {
                                code: NORMAL_CLOSURE_CODE,
                                reason: String::new(),
                            }),
                            write_wait,
                        )
                        .await,
                ),
                None => None,
            }
        };
        match sent {
            Some(Err(SocketError::ConnectionClosed(_))) | Some(Ok(())) | None => {}
            Some(Err(e)) => warn!("Shutdown close frame failed: {}", e),
        }
        self.close().await;
    }

    /// The URL this handle dials
    pub fn url(&self) -> String {
        self.core.state.read().target.url.clone()
    }

    /// Whether a transport is currently installed
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.core.state.read().connected
    }

    /// Whether a reconnect cycle is currently in flight
    #[inline]
    pub fn is_reconnecting(&self) -> bool {
        self.core.state.read().reconnecting
    }

    /// The most recent dial failure, if the last attempt failed
    ///
    /// Cleared on every successful dial, so `Some` means the handle is
    /// (or last was) failing to connect.
    pub fn last_dial_error(&self) -> Option<SocketError> {
        self.core.state.read().last_dial_error.clone()
    }

    /// The HTTP response from the most recent handshake attempt
    ///
    /// Present after a success and after a rejected handshake (non-101
    /// status), which is how servers report authentication failures.
    pub fn last_handshake_response(&self) -> Option<HandshakeResponse> {
        self.core.state.read().last_handshake_response.clone()
    }

    /// A consistent snapshot of the connection state
    pub fn snapshot(&self) -> StateSnapshot {
        self.core.state.read().snapshot()
    }

    /// One read attempt against the installed transport
    ///
    /// Holds the reader lock only while blocked on the transport and
    /// releases it before the caller reacts, so teardown (which needs
    /// that lock) can never deadlock against the reaction.
    async fn read_step(&self) -> Result<ReadStep> {
        let core = &self.core;
        // Subscribe before the connected check: any teardown that
        // flips the flag after we pass it must bump an epoch we
        // observe, which is what unparks the select below.
        let mut epoch_rx = core.epoch.subscribe();
        if !core.state.read().connected {
            return Err(SocketError::NotConnected);
        }
        let mut guard = core.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(SocketError::NotConnected);
        };

        let step = tokio::select! {
            result = reader.next_frame() => match result {
                Ok(Some(Frame::Text(text))) => ReadStep::Data(WsMessage::Text(text)),
                Ok(Some(Frame::Binary(data))) => ReadStep::Data(WsMessage::Binary(data)),
                Ok(Some(Frame::Ping(payload))) => {
                    self.answer_ping(payload, &mut epoch_rx).await;
                    ReadStep::Control
                }
                Ok(Some(Frame::Pong(_))) => {
                    core.tracker.record_response();
                    if let Some(handler) = &core.config.pong_handler {
                        if let Err(e) = handler.on_pong() {
                            warn!("Pong handler failed: {}", e);
                        }
                    }
                    ReadStep::Control
                }
                Ok(Some(Frame::Close(reason))) => match reason {
                    Some(reason) if reason.is_normal() => ReadStep::GracefulRemoteClose,
                    Some(reason) => ReadStep::Abnormal(SocketError::ConnectionClosed(format!(
                        "close frame with code {}",
                        reason.code
                    ))),
                    None => ReadStep::Abnormal(SocketError::ConnectionClosed(
                        "close frame without status".to_string(),
                    )),
                },
                Ok(None) => ReadStep::GracefulRemoteClose,
                Err(e) => ReadStep::Abnormal(e),
            },
            _ = epoch_rx.changed() => return Err(SocketError::NotConnected),
        };
        Ok(step)
    }

    /// Reply to a server Ping while the read lock is held
    ///
    /// Bounded: gives up if the transport is torn down mid-reply, so a
    /// stuck pong write cannot wedge the read path.
    async fn answer_ping(&self, payload: Vec<u8>, epoch_rx: &mut watch::Receiver<u64>) {
        let mut writer = self.core.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return;
        };
        tokio::select! {
            result = writer.send(Frame::Pong(payload)) => {
                if let Err(e) = result {
                    warn!("Failed to answer ping: {}", e);
                }
            }
            _ = epoch_rx.changed() => {}
        }
    }

    /// One write attempt against the installed transport
    async fn write_step(&self, frame: Frame) -> Result<WriteStep> {
        let core = &self.core;
        let mut epoch_rx = core.epoch.subscribe();
        if !core.state.read().connected {
            return Err(SocketError::NotConnected);
        }
        let mut guard = core.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(SocketError::NotConnected);
        };

        let result = tokio::select! {
            result = writer.send(frame) => result,
            _ = epoch_rx.changed() => return Err(SocketError::NotConnected),
        };
        Ok(match result {
            Ok(()) => WriteStep::Sent,
            Err(SocketError::ConnectionClosed(_)) => WriteStep::GracefulRemoteClose,
            Err(e) => WriteStep::Abnormal(e),
        })
    }
}

/// Tear down the transport and spawn the dial loop, if nobody beat us
///
/// The claim happens under the state write lock, so for any number of
/// concurrent triggers exactly one proceeds. Closed handles never
/// reconnect.
pub(crate) async fn close_and_reconnect(core: &Arc<Core>) {
    if core.abandoned.load(Ordering::Acquire) {
        return;
    }
    if !core.state.write().claim_reconnect() {
        debug!("Reconnect already in flight, ignoring trigger");
        return;
    }
    teardown(core).await;
    let task = tokio::spawn(run_dial_loop(Arc::clone(core), None));
    core.state.write().dial_task = Some(task);
}

/// Drop the current transport and notify everything attached to it
///
/// Order matters: flags first (new I/O calls fail fast), then the
/// epoch bump (parked I/O releases the cells), then the cells (the
/// halves drop, closing the socket), then the disconnect handler.
pub(crate) async fn teardown(core: &Arc<Core>) {
    {
        let mut state = core.state.write();
        state.mark_disconnected();
        state.cancel_watchdog();
    }
    core.epoch.send_modify(|epoch| *epoch += 1);
    {
        let mut reader = core.reader.lock().await;
        *reader = None;
    }
    {
        let mut writer = core.writer.lock().await;
        *writer = None;
    }
    if let Some(handler) = &core.config.disconnect_handler {
        handler.on_disconnect();
    }
}

/// Teardown for a graceful remote close: disconnect, no reconnect
///
/// The handle is not abandoned; a later explicit
/// `close_and_reconnect` can revive it.
async fn graceful_close(core: &Arc<Core>) {
    debug!("Peer closed the connection gracefully");
    teardown(core).await;
}

/// The dial loop: try, record, back off, repeat
///
/// Runs as a spawned task. Exits on success, on a fatal post-connect
/// handler failure, or when the handle is closed. `first_attempt`
/// (present only for the initial dial) is signalled once the first
/// attempt settles so `dial` can return.
async fn run_dial_loop(core: Arc<Core>, mut first_attempt: Option<oneshot::Sender<Result<()>>>) {
    {
        let mut state = core.state.write();
        state.dialing = true;
        state.dial_failures = 0;
    }

    let target = core.state.read().target.clone();
    let backoff = core.config.backoff();
    let non_verbose = core.config.non_verbose;
    let mut attempt: u32 = 0;

    loop {
        if core.abandoned.load(Ordering::Acquire) {
            debug!("Dial loop stopping: handle closed");
            break;
        }

        if !non_verbose {
            info!("Dialing {} (attempt {})", target.url, attempt + 1);
        }

        let result = match tokio::time::timeout(
            core.config.handshake_timeout,
            core.dialer.dial(&target),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SocketError::Dial {
                message: format!(
                    "handshake timed out after {:?}",
                    core.config.handshake_timeout
                ),
                response: None,
            }),
        };

        match result {
            Ok(outcome) => {
                if !install_transport(&core, outcome).await {
                    break;
                }

                if let Err(e) = run_connect_hook(&core).await {
                    let e = match e {
                        SocketError::ConnectHandler(_) => e,
                        other => SocketError::ConnectHandler(other.to_string()),
                    };
                    error!("{}", e);
                    // Fatal for this handle: tear the fresh transport
                    // down and stop retrying.
                    core.abandoned.store(true, Ordering::Release);
                    teardown(&core).await;
                    {
                        let mut state = core.state.write();
                        state.last_dial_error = Some(e.clone());
                        state.dialing = false;
                        state.reconnecting = false;
                    }
                    if let Some(tx) = first_attempt.take() {
                        let _ = tx.send(Err(e));
                    }
                    return;
                }

                if !non_verbose {
                    info!("Connected to {}", target.url);
                }
                {
                    let mut state = core.state.write();
                    state.reconnecting = false;
                    state.dialing = false;
                }
                keepalive::arm(&core);
                if let Some(tx) = first_attempt.take() {
                    let _ = tx.send(Ok(()));
                }
                return;
            }
            Err(e) => {
                let response = match &e {
                    SocketError::Dial { response, .. } => response.clone(),
                    _ => None,
                };
                core.state.write().record_dial_failure(e.clone(), response);

                let delay = backoff.duration(attempt);
                if !non_verbose {
                    info!("Dial attempt {} failed: {}", attempt + 1, e);
                    info!("Dial: will try again in {:?}", delay);
                }
                // Unblock `dial` after the first attempt; the caller
                // gets a disconnected handle while we keep retrying.
                if let Some(tx) = first_attempt.take() {
                    let _ = tx.send(Ok(()));
                }

                attempt = attempt.saturating_add(1);
                if !interruptible_sleep(&core, delay).await {
                    break;
                }
            }
        }
    }

    // Abandoned exit: leave the flags consistent for late observers.
    {
        let mut state = core.state.write();
        state.dialing = false;
        state.reconnecting = false;
    }
    if let Some(tx) = first_attempt.take() {
        let _ = tx.send(Ok(()));
    }
}

/// Install a fresh transport into the cells, unless the handle closed
///
/// Both cell locks and the state lock are held together for the
/// flip, so observers never see `connected` without both halves in
/// place. Returns false when the handle was closed mid-handshake; the
/// halves drop here, closing the socket.
async fn install_transport(core: &Arc<Core>, outcome: DialOutcome) -> bool {
    let DialOutcome {
        reader,
        writer,
        response,
    } = outcome;

    let mut reader_cell = core.reader.lock().await;
    let mut writer_cell = core.writer.lock().await;
    let mut state = core.state.write();
    if core.abandoned.load(Ordering::Acquire) {
        return false;
    }
    *reader_cell = Some(reader);
    *writer_cell = Some(writer);
    state.record_dial_success(response);
    true
}

/// Run the post-connect handler, if configured
async fn run_connect_hook(core: &Arc<Core>) -> Result<()> {
    if let Some(handler) = &core.config.connect_handler {
        let conn = EverSocket {
            core: Arc::clone(core),
        };
        handler.on_connect(&conn).await?;
        debug!("Connect handler succeeded");
    }
    Ok(())
}

/// Sleep in small slices so `close` interrupts a long backoff promptly
///
/// Returns false when the handle was closed while sleeping.
async fn interruptible_sleep(core: &Arc<Core>, duration: Duration) -> bool {
    let check_interval = Duration::from_millis(100);
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        if core.abandoned.load(Ordering::Acquire) {
            return false;
        }
        let slice = check_interval.min(duration - elapsed);
        tokio::time::sleep(slice).await;
        elapsed += slice;
    }
    !core.abandoned.load(Ordering::Acquire)
}
