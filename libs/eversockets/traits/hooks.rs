use crate::core::conn::EverSocket;
use crate::traits::error::Result;
use async_trait::async_trait;

/// Hook fired after every successful connection (first dial and each
/// reconnect), before the keepalive watchdog is armed
///
/// The usual job is re-subscribing: the handle is already connected, so
/// the hook may write to it. A failure is fatal for the handle: the
/// fresh transport is torn down and no retry is scheduled.
///
/// The hook runs inside the dial task. Do not call `close` or
/// `shutdown` from it; return an error to abort instead.
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    /// Run post-connect setup on the freshly connected handle
    ///
    /// # Returns
    /// * `Ok(())` - Setup complete, connection stays up
    /// * `Err(SocketError)` - Abort: the connection is closed for good
    async fn on_connect(&self, conn: &EverSocket) -> Result<()>;
}

/// Hook fired after the connection has been closed
///
/// Fires on every teardown: reconnect-triggered closes, graceful remote
/// closes and explicit shutdown alike.
pub trait DisconnectHandler: Send + Sync {
    fn on_disconnect(&self);
}

/// Hook fired on every liveness response (pong control frame)
///
/// Runs after the watchdog's liveness timestamp has been updated. An
/// error is logged but neither aborts the watchdog nor the read that
/// observed the pong.
pub trait PongHandler: Send + Sync {
    fn on_pong(&self) -> Result<()>;
}
