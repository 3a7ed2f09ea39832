//! Time sources.
//!
//! Every timestamp in this crate is expressed in seconds since the Unix epoch
//! (UTC) as an `f64`, so call ages, bucket resets and server-provided reset
//! values can be compared directly.

use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over the current time.
///
/// Implementors must be thread-safe, since the clock is shared by every
/// bucket and the global limiter.
pub trait Clock: Send + Sync + Debug {
    /// Current time in epoch seconds
    fn now(&self) -> f64;
}

/// Wall-clock time from [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        epoch_seconds(SystemTime::now())
    }
}

/// A clock that reads the wall clock once and then advances with tokio's
/// monotonic clock.
///
/// Because it follows [`tokio::time::Instant`], it never jumps when the system
/// time is adjusted, and it moves in lockstep with `tokio::time::sleep`,
/// including when the runtime's time is paused in tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: f64,
    start: tokio::time::Instant,
}

impl TokioClock {
    /// Anchor a new clock at the current wall-clock time
    #[must_use]
    pub fn new() -> Self {
        Self::anchored_at(epoch_seconds(SystemTime::now()))
    }

    /// Anchor a new clock at a fixed epoch timestamp
    #[must_use]
    pub fn anchored_at(anchor: f64) -> Self {
        Self {
            anchor,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> f64 {
        self.anchor + self.start.elapsed().as_secs_f64()
    }
}

/// A clock set before 1970 is treated as the epoch itself.
fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::anchored_at(1_000.0);
        assert!((clock.now() - 1_000.0).abs() < f64::EPSILON);

        tokio::time::advance(Duration::from_millis(2500)).await;
        assert!((clock.now() - 1_002.5).abs() < 1e-6);
    }
}
