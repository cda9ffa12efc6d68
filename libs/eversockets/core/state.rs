use crate::traits::error::SocketError;
use crate::traits::transport::{HandshakeResponse, Target};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// The mutable state record for one logical connection
///
/// A single instance lives behind one `parking_lot::RwLock`; every
/// field access goes through that lock. The transport halves themselves
/// live in async mutex cells next to the lock, with
/// `transport_installed` flipped inside the same critical sections that
/// fill or empty the cells, so any lock-observable snapshot upholds
/// `connected == true` implies the transport is installed.
pub(crate) struct SessionState {
    /// Endpoint URL and request headers, immutable after the first dial
    pub(crate) target: Target,
    /// True only while the transport is live and the handshake succeeded
    pub(crate) connected: bool,
    /// True from the moment a reconnect is scheduled until a new
    /// transport is installed or the loop gives up
    pub(crate) reconnecting: bool,
    /// True while a dial loop invocation is active (first dial included)
    pub(crate) dialing: bool,
    /// Mirrors the occupancy of the transport cells
    pub(crate) transport_installed: bool,
    /// Last error from the most recent dial attempt; None after success
    pub(crate) last_dial_error: Option<SocketError>,
    /// Handshake response from the most recent attempt, kept on failure too
    pub(crate) last_handshake_response: Option<HandshakeResponse>,
    /// Failed attempts in the current loop invocation
    pub(crate) dial_failures: u64,
    /// Monotonically increasing watchdog generation for this connection
    pub(crate) keepalive_generation: u64,
    /// Cancellation handle for the current watchdog generation
    pub(crate) keepalive_cancel: Option<watch::Sender<bool>>,
    /// Supervised dial-loop task, joined on close
    pub(crate) dial_task: Option<JoinHandle<()>>,
}

impl SessionState {
    pub(crate) fn new(target: Target) -> Self {
        Self {
            target,
            connected: false,
            reconnecting: false,
            dialing: false,
            transport_installed: false,
            last_dial_error: None,
            last_handshake_response: None,
            dial_failures: 0,
            keepalive_generation: 0,
            keepalive_cancel: None,
            dial_task: None,
        }
    }

    /// Claim the right to start a reconnect loop
    ///
    /// Returns false when a loop is already scheduled or running, in
    /// which case the caller's trigger is a no-op. Exactly one caller
    /// wins for any number of concurrent triggers because the claim
    /// happens under the state write lock.
    pub(crate) fn claim_reconnect(&mut self) -> bool {
        if self.reconnecting || self.dialing {
            return false;
        }
        self.reconnecting = true;
        true
    }

    /// Record a failed dial attempt
    ///
    /// Both retained fields are overwritten on every attempt, response
    /// included, so callers can inspect why the latest handshake failed.
    pub(crate) fn record_dial_failure(
        &mut self,
        error: SocketError,
        response: Option<HandshakeResponse>,
    ) {
        self.dial_failures += 1;
        self.last_dial_error = Some(error);
        self.last_handshake_response = response;
    }

    /// Record a successful dial: transport installed, error cleared
    ///
    /// `reconnecting` is cleared separately, after the post-connect
    /// hook has run.
    pub(crate) fn record_dial_success(&mut self, response: HandshakeResponse) {
        self.connected = true;
        self.transport_installed = true;
        self.last_dial_error = None;
        self.last_handshake_response = Some(response);
    }

    /// Flip the connection flags down ahead of emptying the cells
    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
        self.transport_installed = false;
    }

    /// Advance to the next watchdog generation
    ///
    /// Stores the new cancellation handle and signal-terminates the
    /// previous generation's watchdog, upholding "at most one watchdog
    /// per generation".
    pub(crate) fn next_generation(&mut self, cancel: watch::Sender<bool>) -> u64 {
        self.keepalive_generation += 1;
        if let Some(previous) = self.keepalive_cancel.replace(cancel) {
            let _ = previous.send(true);
        }
        self.keepalive_generation
    }

    /// Signal-terminate the current watchdog, if any
    pub(crate) fn cancel_watchdog(&mut self) {
        if let Some(cancel) = self.keepalive_cancel.take() {
            let _ = cancel.send(true);
        }
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            connected: self.connected,
            reconnecting: self.reconnecting,
            transport_installed: self.transport_installed,
            dial_failures: self.dial_failures,
            keepalive_generation: self.keepalive_generation,
        }
    }
}

/// Read-only view of the connection state at one instant
///
/// Taken under the state lock, so the fields are mutually consistent.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub connected: bool,
    pub reconnecting: bool,
    pub transport_installed: bool,
    pub dial_failures: u64,
    pub keepalive_generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::http::HeaderMap;

    fn test_state() -> SessionState {
        SessionState::new(Target {
            url: "ws://example.com".to_string(),
            headers: HeaderMap::new(),
        })
    }

    #[test]
    fn test_claim_reconnect_single_winner() {
        let mut state = test_state();
        assert!(state.claim_reconnect());
        assert!(!state.claim_reconnect());
    }

    #[test]
    fn test_claim_reconnect_blocked_while_dialing() {
        let mut state = test_state();
        state.dialing = true;
        assert!(!state.claim_reconnect());
    }

    #[test]
    fn test_dial_failure_then_success_clears_error() {
        let mut state = test_state();
        state.record_dial_failure(
            SocketError::Dial {
                message: "refused".to_string(),
                response: None,
            },
            None,
        );
        assert_eq!(state.dial_failures, 1);
        assert!(state.last_dial_error.is_some());

        state.record_dial_success(HandshakeResponse {
            status: tokio_tungstenite::tungstenite::http::StatusCode::SWITCHING_PROTOCOLS,
            headers: HeaderMap::new(),
        });
        assert!(state.connected);
        assert!(state.transport_installed);
        assert!(state.last_dial_error.is_none());
    }

    #[test]
    fn test_next_generation_cancels_previous() {
        let mut state = test_state();

        let (tx1, rx1) = tokio::sync::watch::channel(false);
        assert_eq!(state.next_generation(tx1), 1);
        assert!(!*rx1.borrow());

        let (tx2, rx2) = tokio::sync::watch::channel(false);
        assert_eq!(state.next_generation(tx2), 2);
        // Arming generation 2 signal-terminated generation 1
        assert!(*rx1.borrow());
        assert!(!*rx2.borrow());
    }

    #[test]
    fn test_cancel_watchdog_signals_and_clears() {
        let mut state = test_state();
        let (tx, rx) = tokio::sync::watch::channel(false);
        state.next_generation(tx);

        state.cancel_watchdog();
        assert!(*rx.borrow());
        assert!(state.keepalive_cancel.is_none());
    }
}
