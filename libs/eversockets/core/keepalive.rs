//! Keepalive watchdog
//!
//! Detects transports that are open at the socket level but
//! unresponsive at the application level (half-open connections) and
//! forces a reconnect.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  Watchdog task (generation N)│
//! │                              │
//! │  probe tick (fast): send one │──> writer cell ──> Ping frame
//! │  ping if none outstanding    │
//! │                              │
//! │  deadline tick (slow): any   │<── liveness tracker (fed by the
//! │  response this window? if    │    read path observing Pongs)
//! │  not: close-and-reconnect    │
//! └──────────────────────────────┘
//! ```
//!
//! One task per generation. Arming generation N+1 signal-terminates
//! generation N through the cancel handle stored in the state record,
//! and a watchdog re-validates its generation before acting, so a stale
//! task can never tear down the wrong transport.

use crate::core::conn::{self, Core};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Arm the watchdog for a freshly installed transport
///
/// No-op when `keepalive_timeout` is zero: no watchdog task ever
/// starts. Otherwise the previous generation is cancelled, the liveness
/// baseline restarts from now and the new generation's task spawns.
pub(crate) fn arm(core: &Arc<Core>) {
    if core.config.keepalive_timeout.is_zero() {
        return;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let generation = core.state.write().next_generation(cancel_tx);
    core.tracker.reset_baseline();

    if !core.config.non_verbose {
        info!("Keepalive watchdog #{} started", generation);
    }

    let core = Arc::clone(core);
    tokio::spawn(watchdog_task(core, generation, cancel_rx));
}

/// The per-generation watchdog task
///
/// Exits on the cancel signal or after its own timeout-triggered
/// reconnect; never silently.
async fn watchdog_task(core: Arc<Core>, generation: u64, mut cancel_rx: watch::Receiver<bool>) {
    let keepalive_timeout = core.config.keepalive_timeout;
    let non_verbose = core.config.non_verbose;

    let mut probe_ticker = tokio::time::interval(core.config.probe_interval);
    // Skip the immediate first tick - the first probe waits one period
    probe_ticker.tick().await;
    probe_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut deadline_ticker = tokio::time::interval(keepalive_timeout);
    deadline_ticker.tick().await;
    deadline_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // One probe per deadline window; reset when the window closes.
    let mut probe_outstanding = false;

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                if !non_verbose {
                    info!("Keepalive watchdog #{} stopped", generation);
                }
                return;
            }

            _ = probe_ticker.tick() => {
                if probe_outstanding || !is_current(&core, generation) {
                    continue;
                }

                let mut writer = core.writer.lock().await;
                if let Some(writer) = writer.as_mut() {
                    if let Err(e) = writer.send_ping(Vec::new(), keepalive_timeout).await {
                        warn!("Keepalive probe failed: {}", e);
                    }
                    core.tracker.record_probe();
                    // Even a failed probe counts as outstanding; the
                    // deadline timer decides whether the peer is gone.
                    probe_outstanding = true;
                }
            }

            _ = deadline_ticker.tick() => {
                if !is_current(&core, generation) {
                    return;
                }

                if !core.tracker.is_live_within(keepalive_timeout) {
                    warn!(
                        "No liveness response within {:?}, reconnecting (watchdog #{})",
                        keepalive_timeout, generation
                    );
                    conn::close_and_reconnect(&core).await;
                    if !non_verbose {
                        info!("Keepalive watchdog #{} stopped", generation);
                    }
                    return;
                }

                probe_outstanding = false;
            }
        }
    }
}

fn is_current(core: &Core, generation: u64) -> bool {
    core.state.read().keepalive_generation == generation
}
