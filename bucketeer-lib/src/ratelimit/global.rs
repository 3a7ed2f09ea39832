use std::sync::Arc;

use tokio::sync::watch;

use crate::clock::Clock;

/// Snapshot of the global throttle.
///
/// The flag and its reset time always travel together, so a reader can never
/// observe a fresh timestamp next to a stale flag.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GlobalState {
    /// `true` while the whole client is throttled
    pub hit: bool,
    /// Epoch seconds at which the throttle lifts
    pub reset_at: f64,
}

/// Process-wide throttle shared by every bucket.
///
/// The handle is cheap to clone and is injected into each bucket when it is
/// constructed. It is written by whatever detects global throttling (usually
/// the response path of the transport) and only read by buckets.
///
/// A hit lifts on its own once the clock passes `reset_at`, so a writer that
/// never calls [`GlobalLimiter::clear`] cannot stall the client forever.
#[derive(Debug, Clone)]
pub struct GlobalLimiter {
    state: Arc<watch::Sender<GlobalState>>,
    clock: Arc<dyn Clock>,
}

impl GlobalLimiter {
    /// Create a limiter that is not hit
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (state, _) = watch::channel(GlobalState::default());
        Self {
            state: Arc::new(state),
            clock,
        }
    }

    /// Returns `true` while no bucket may dispatch
    #[must_use]
    pub fn is_hit(&self) -> bool {
        let state = *self.state.borrow();
        state.hit && self.clock.now() < state.reset_at
    }

    /// When the current throttle lifts, or `None` if the limiter is not hit
    #[must_use]
    pub fn reset_at(&self) -> Option<f64> {
        let state = *self.state.borrow();
        (state.hit && self.clock.now() < state.reset_at).then_some(state.reset_at)
    }

    /// Raw snapshot of the flag and reset time, without checking the clock
    #[must_use]
    pub fn state(&self) -> GlobalState {
        *self.state.borrow()
    }

    /// Throttle the whole client until `reset_at` (epoch seconds).
    ///
    /// An active throttle is only ever extended, never shortened.
    pub fn set_hit(&self, reset_at: f64) {
        let now = self.clock.now();
        self.state.send_modify(|state| {
            let active = state.hit && now < state.reset_at;
            state.reset_at = if active {
                state.reset_at.max(reset_at)
            } else {
                reset_at
            };
            state.hit = true;
        });
        log::debug!("Global rate limit hit, lifting in {:.3}s", reset_at - now);
    }

    /// Lift the throttle immediately
    pub fn clear(&self) {
        self.state.send_replace(GlobalState::default());
    }

    /// Receiver that is notified whenever the limiter changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<GlobalState> {
        self.state.subscribe()
    }
}
