use rand::Rng;
use std::time::Duration;

/// Jittered exponential backoff between reconnection attempts
///
/// The raw curve is `min(max, min * factor^attempt)`. Jitter then
/// scales the result by `0.5 + U[0,1)` so independent instances
/// reconnecting after the same outage don't synchronize, and the final
/// value is clamped back into `[min, max]`.
///
/// The attempt counter is owned by the reconnect loop and starts at 0
/// for every fresh loop invocation; the policy itself is stateless.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: bool,
}

impl Backoff {
    /// Create a backoff policy with jitter enabled
    ///
    /// A `max` below `min` is raised to `min`.
    pub fn new(min: Duration, max: Duration, factor: f64) -> Self {
        Self {
            min,
            max: max.max(min),
            factor,
            jitter: true,
        }
    }

    /// Disable jitter, making the curve deterministic
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Wait duration for the given attempt number (starting at 0)
    ///
    /// Never below `min` and never above `max`, for any attempt.
    pub fn duration(&self, attempt: u32) -> Duration {
        let min_secs = self.min.as_secs_f64();
        let max_secs = self.max.as_secs_f64();

        let mut secs = min_secs * self.factor.powi(attempt.min(1_000) as i32);
        if self.jitter {
            secs *= 0.5 + rand::thread_rng().gen::<f64>();
        }
        // Large attempts overflow to infinity (or NaN when min is zero);
        // both land on the ceiling.
        if !secs.is_finite() {
            secs = max_secs;
        }

        Duration::from_secs_f64(secs.clamp(min_secs, max_secs))
    }
}
