use crate::ratelimit::RateLimitHeaders;

/// The route's current rate-limit window as last reported by the API.
///
/// All fields are unknown until the first response for the route has been
/// observed. Until then the window never blocks, which lets the first call on a
/// new route go out optimistically and discover the limits.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateWindow {
    /// Maximum calls per window
    pub limit: Option<u32>,
    /// Calls left in the current window
    pub remaining: Option<u32>,
    /// Epoch seconds at which the window resets
    pub reset: Option<f64>,
}

impl RateWindow {
    /// Returns `true` once at least one response has reported window state
    #[must_use]
    pub const fn is_known(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some() || self.reset.is_some()
    }

    /// Returns `true` while the window is exhausted and has not reset yet.
    ///
    /// Once `now` reaches `reset` the window opens again even though
    /// `remaining` is still zero; the next response confirms the new window.
    #[must_use]
    pub fn is_blocked(&self, now: f64) -> bool {
        match (self.remaining, self.reset) {
            (Some(0), Some(reset)) => now < reset,
            _ => false,
        }
    }

    /// When a blocked window opens again
    #[must_use]
    pub fn blocked_until(&self, now: f64) -> Option<f64> {
        if self.is_blocked(now) {
            self.reset
        } else {
            None
        }
    }

    /// Apply the fields a response carried, leaving the others as they were
    pub fn update(&mut self, headers: &RateLimitHeaders) {
        if let Some(limit) = headers.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = headers.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset) = headers.reset {
            self.reset = Some(reset);
        }
    }
}
