//! Liveness response tracker
//!
//! Records when probes go out and when responses come back, so the
//! keepalive watchdog can detect a transport that is open at the socket
//! level but unresponsive at the application level.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks liveness probes and responses for one connection
///
/// Shared lock-free between the read path (which observes pong frames)
/// and the watchdog task (which checks the response window). Timestamps
/// are stored as milliseconds since an internal epoch to allow atomic
/// u64 operations.
///
/// One tracker lives for the whole handle; arming a new watchdog
/// generation calls [`LivenessTracker::reset_baseline`] so the first
/// window measures from connect time rather than from a stale response.
pub struct LivenessTracker {
    /// Epoch the ms offsets are measured from
    epoch: Instant,
    /// Last liveness response observed (ms since epoch)
    last_response_ms: AtomicU64,
    /// Last probe sent (ms since epoch)
    last_probe_ms: AtomicU64,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_response_ms: AtomicU64::new(0),
            last_probe_ms: AtomicU64::new(0),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record that a probe was just sent
    pub fn record_probe(&self) {
        // 0 is the "never probed" sentinel
        self.last_probe_ms
            .store(self.now_ms().max(1), Ordering::Release);
    }

    /// Record that a liveness response was just observed
    ///
    /// Called from the read path whenever a pong frame arrives.
    pub fn record_response(&self) {
        self.last_response_ms.store(self.now_ms(), Ordering::Release);
    }

    /// Restart the response window from now
    ///
    /// Called when a watchdog generation is armed, right after the new
    /// transport is installed.
    pub fn reset_baseline(&self) {
        self.record_response();
    }

    /// Time since the last liveness response (or baseline reset)
    pub fn time_since_last_response(&self) -> Duration {
        let response_ms = self.last_response_ms.load(Ordering::Acquire);
        Duration::from_millis(self.now_ms().saturating_sub(response_ms))
    }

    /// Time since the last probe went out
    ///
    /// Returns None if no probe has been sent yet.
    pub fn time_since_last_probe(&self) -> Option<Duration> {
        let probe_ms = self.last_probe_ms.load(Ordering::Acquire);
        if probe_ms == 0 {
            return None;
        }
        Some(Duration::from_millis(self.now_ms().saturating_sub(probe_ms)))
    }

    /// Whether a response has been observed within the window
    ///
    /// The deadline timer calls this once per window; `false` means the
    /// peer went quiet and the connection must be replaced.
    pub fn is_live_within(&self, window: Duration) -> bool {
        self.time_since_last_response() <= window
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_live_right_after_baseline() {
        let tracker = LivenessTracker::new();
        tracker.reset_baseline();
        assert!(tracker.is_live_within(Duration::from_millis(100)));
    }

    #[test]
    fn test_dead_after_quiet_window() {
        let tracker = LivenessTracker::new();
        tracker.reset_baseline();
        sleep(Duration::from_millis(60));
        assert!(!tracker.is_live_within(Duration::from_millis(50)));
    }

    #[test]
    fn test_response_refreshes_window() {
        let tracker = LivenessTracker::new();
        tracker.reset_baseline();
        sleep(Duration::from_millis(40));
        tracker.record_response();
        sleep(Duration::from_millis(40));
        // 80ms since baseline but only 40ms since the last response
        assert!(tracker.is_live_within(Duration::from_millis(50)));
    }

    #[test]
    fn test_baseline_reset_revives() {
        let tracker = LivenessTracker::new();
        tracker.reset_baseline();
        sleep(Duration::from_millis(60));
        assert!(!tracker.is_live_within(Duration::from_millis(50)));

        tracker.reset_baseline();
        assert!(tracker.is_live_within(Duration::from_millis(50)));
    }

    #[test]
    fn test_time_since_last_probe() {
        let tracker = LivenessTracker::new();
        assert!(tracker.time_since_last_probe().is_none());

        tracker.record_probe();
        sleep(Duration::from_millis(20));

        let elapsed = tracker.time_since_last_probe().unwrap();
        assert!(elapsed >= Duration::from_millis(15));
    }
}
