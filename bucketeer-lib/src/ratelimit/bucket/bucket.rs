use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::key::BucketKey;
use super::stats::BucketStats;
use super::window::RateWindow;
use crate::clock::Clock;
use crate::ratelimit::{BucketConfig, Call, CallRequest, GlobalLimiter};
use crate::transport::{Response, Transport};
use crate::{ErrorKind, Result};

/// Shortest time the loop parks, so that a deadline which is due but not yet
/// effective (e.g. a call exactly at its maximum age) cannot cause a spin.
const MIN_PARK: Duration = Duration::from_millis(1);

/// Mutable bucket state. Queue and window live behind one lock so the loop
/// sees a completed call's window update together with its removal.
#[derive(Debug)]
struct BucketState {
    queue: VecDeque<Call>,
    window: RateWindow,
    last_activity: f64,
    /// Cleared once the loop has drained the queue for good
    accepting: bool,
}

/// Outcome of one dispatch attempt
enum Tick {
    /// A call was handed to the transport
    Dispatched(u64, JoinHandle<()>),
    /// Nothing can be sent now; re-check no later than the given epoch time
    Park(Option<f64>),
}

#[derive(Debug)]
struct Shared {
    key: BucketKey,
    config: BucketConfig,
    global: GlobalLimiter,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
    stats: Mutex<BucketStats>,
    initialized: AtomicBool,
    closing: AtomicBool,
    wake: Notify,
    disposed: watch::Sender<bool>,
}

/// An ordered queue of calls for one (method, route) pair, together with the
/// task that sends them.
///
/// Each bucket runs its own scheduling loop, so a throttled route never holds
/// up other routes. The loop sends calls strictly in enqueue order and never
/// has more than one call in flight. A call is held back while
///
/// - the [`GlobalLimiter`] is hit,
/// - the route's window is exhausted and has not reset yet, or
/// - the previous call is still in flight.
///
/// Calls that wait longer than [`BucketConfig::max_call_age`] are evicted and
/// their handles resolve to [`ErrorKind::TimedOut`].
///
/// When there is nothing to do the loop parks until woken by an enqueue, a
/// completed send, a change of the global limiter or a timer. The timer never
/// exceeds [`BucketConfig::idle_interval`].
#[derive(Debug)]
pub struct Bucket {
    shared: Arc<Shared>,
}

impl Bucket {
    /// Create a bucket and spawn its scheduling loop on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn new(
        key: BucketKey,
        config: BucketConfig,
        global: GlobalLimiter,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (disposed, _) = watch::channel(false);
        let now = clock.now();
        let shared = Arc::new(Shared {
            key,
            config,
            global,
            transport,
            clock,
            state: Mutex::new(BucketState {
                queue: VecDeque::new(),
                window: RateWindow::default(),
                last_activity: now,
                accepting: true,
            }),
            stats: Mutex::new(BucketStats::default()),
            initialized: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            wake: Notify::new(),
            disposed,
        });

        log::debug!("Created bucket {}", shared.key);
        tokio::spawn(Arc::clone(&shared).run());

        Self { shared }
    }

    /// Append `call` to the tail of the queue and wake the loop.
    ///
    /// If the bucket is already closing, the call is closed right away with
    /// [`ErrorKind::BucketClosed`].
    pub fn enqueue(&self, mut call: Call) {
        debug_assert_eq!(call.key(), self.shared.key, "call enqueued in wrong bucket");

        let now = self.shared.clock.now();
        call.stamp(now);
        {
            let mut state = self.shared.state();
            if self.is_closing() || !state.accepting {
                drop(state);
                call.close(Err(ErrorKind::BucketClosed(self.shared.key.clone())));
                return;
            }
            state.queue.push_back(call);
            state.last_activity = now;
        }
        self.shared.initialized.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }

    /// Ask the loop to stop.
    ///
    /// The loop exits between dispatch attempts. A call that is in flight is
    /// allowed to finish; calls still waiting are closed with
    /// [`ErrorKind::BucketClosed`]. Calling this more than once has no further
    /// effect. Use [`Bucket::closed`] to wait until the bucket is disposed.
    pub fn close(&self) {
        if !self.shared.closing.swap(true, Ordering::AcqRel) {
            log::debug!("Closing bucket {}", self.shared.key);
            self.shared.wake.notify_one();
        }
    }

    /// Wait until the loop has exited and the bucket is disposed
    pub async fn closed(&self) {
        let mut disposed = self.shared.disposed.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = disposed.wait_for(|disposed| *disposed).await;
    }

    /// The (method, route) this bucket serves
    #[must_use]
    pub fn key(&self) -> &BucketKey {
        &self.shared.key
    }

    /// Number of queued calls, including one in flight
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state().queue.len()
    }

    /// Returns `true` if no call is queued or in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.state().queue.is_empty()
    }

    /// Returns `true` once the first call has been enqueued
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    /// Returns `true` once [`Bucket::close`] has been called
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Returns `true` once the loop has exited
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        *self.shared.disposed.borrow()
    }

    /// The route's window as last reported by the API
    #[must_use]
    pub fn window(&self) -> RateWindow {
        self.shared.state().window
    }

    /// Get bucket statistics
    #[must_use]
    pub fn stats(&self) -> BucketStats {
        self.shared.stats().clone()
    }

    /// Time since the last enqueue, dispatch or completion
    #[must_use]
    pub fn idle_for(&self, now: f64) -> Duration {
        let last_activity = self.shared.state().last_activity;
        Duration::try_from_secs_f64(now - last_activity).unwrap_or(Duration::ZERO)
    }

    /// Returns `true` if the queue is empty and nothing happened for at least `timeout`
    #[must_use]
    pub fn is_idle(&self, timeout: Duration, now: f64) -> bool {
        self.is_empty() && self.idle_for(now) >= timeout
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    /// The state is never locked across user code, so a poisoned lock still
    /// holds consistent data.
    fn state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stats(&self) -> MutexGuard<'_, BucketStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(self: Arc<Self>) {
        let mut global_changes = self.global.subscribe();
        let mut in_flight: Option<(u64, JoinHandle<()>)> = None;

        while !self.closing.load(Ordering::Acquire) {
            if in_flight
                .as_ref()
                .is_some_and(|(_, handle)| handle.is_finished())
                && let Some((id, handle)) = in_flight.take()
            {
                self.join_send(id, handle).await;
            }

            let deadline = match self.fire() {
                Tick::Dispatched(id, handle) => {
                    in_flight = Some((id, handle));
                    continue;
                }
                Tick::Park(deadline) => deadline,
            };

            let park = self.park_duration(deadline);
            tokio::select! {
                () = self.wake.notified() => {}
                Ok(()) = global_changes.changed() => {}
                () = tokio::time::sleep(park) => {}
            }
        }

        if let Some((id, handle)) = in_flight.take() {
            self.join_send(id, handle).await;
        }
        self.drain();
        self.disposed.send_replace(true);
        log::debug!("Bucket {} disposed", self.key);
    }

    /// One dispatch attempt
    fn fire(self: &Arc<Self>) -> Tick {
        let now = self.clock.now();
        self.clean_calls(now);

        if !self.initialized.load(Ordering::Acquire) {
            return Tick::Park(None);
        }

        let mut state = self.state();
        let expiry = next_expiry(&state.queue, self.config.max_call_age);

        if state.queue.is_empty() {
            return Tick::Park(None);
        }

        // Checked under the state lock: a completing call raises the global
        // limit before it leaves the queue.
        if let Some(reset) = self.global.reset_at() {
            drop(state);
            self.stats().throttled += 1;
            log::debug!("Bucket {} waiting for global rate limit", self.key);
            return Tick::Park(earliest(Some(reset), expiry));
        }

        if let Some(reset) = state.window.blocked_until(now) {
            drop(state);
            self.stats().throttled += 1;
            log::debug!(
                "Bucket {} exhausted, resets in {:.3}s",
                self.key,
                reset - now
            );
            return Tick::Park(earliest(Some(reset), expiry));
        }

        if state.queue.iter().any(Call::is_in_progress) {
            return Tick::Park(expiry);
        }

        let Some(call) = state.queue.front_mut() else {
            return Tick::Park(None);
        };
        if let Err(error) = call.mark_dispatched() {
            drop(state);
            self.fault(&error);
            return Tick::Park(expiry);
        }
        let request = call.request();
        state.last_activity = now;
        drop(state);

        self.stats().dispatched += 1;
        log::debug!(
            "Dispatching call {} on bucket {}: {}",
            request.id,
            self.key,
            request.endpoint
        );

        let id = request.id;
        let handle = tokio::spawn(Arc::clone(self).send(request));
        Tick::Dispatched(id, handle)
    }

    /// Evict calls that waited longer than the maximum call age.
    ///
    /// The queue is split under the lock; evicted calls are closed after it
    /// has been released.
    fn clean_calls(&self, now: f64) {
        let max_age = self.config.max_call_age;
        let expired: VecDeque<Call> = {
            let mut state = self.state();
            let (expired, kept) = state
                .queue
                .drain(..)
                .partition(|call| !call.is_in_progress() && call.has_timed_out(max_age, now));
            state.queue = kept;
            expired
        };

        if expired.is_empty() {
            return;
        }

        self.stats().timed_out += expired.len() as u64;
        for call in expired {
            log::warn!(
                "Closing call (timed out): {}{} [{}]",
                call.route(),
                call.endpoint(),
                call.method()
            );
            call.time_out(now);
        }
    }

    async fn send(self: Arc<Self>, request: CallRequest) {
        let id = request.id;
        let start = Instant::now();
        let outcome = self.transport.send(request).await;
        self.complete(id, outcome, start.elapsed());
    }

    /// Await a finished or finishing send task. A send task that panicked
    /// never completed its call, so the call is released as a transport failure.
    async fn join_send(&self, id: u64, handle: JoinHandle<()>) {
        if let Err(error) = handle.await {
            log::error!("Send task for call {id} on bucket {} failed: {error}", self.key);
            self.complete(
                id,
                Err(ErrorKind::TransportFailure(format!("send task failed: {error}"))),
                Duration::ZERO,
            );
        }
    }

    /// Integrate the outcome of a send and release the call's slot.
    ///
    /// This is the only path that updates the bucket's window. A global
    /// throttle is raised before the call leaves the queue.
    fn complete(&self, id: u64, outcome: Result<Response>, send_time: Duration) {
        let now = self.clock.now();
        let mut state = self.state();
        let Some(index) = state
            .queue
            .iter()
            .position(|call| call.id() == id && call.is_in_progress())
        else {
            drop(state);
            self.fault(&ErrorKind::NotDispatched(id));
            return;
        };

        match &outcome {
            Ok(response) => {
                if let Some(reset) = response.rate_limit.global_reset {
                    self.global.set_hit(reset);
                }
                let known = state.window.is_known();
                state.window.update(&response.rate_limit);
                if !known && state.window.is_known() {
                    log::debug!("Bucket {} window: {:?}", self.key, state.window);
                }
                self.stats().record_response(response.status, send_time);
            }
            Err(error) => {
                log::debug!("Call {id} on bucket {} failed: {error}", self.key);
                self.stats().record_failure(send_time);
            }
        }

        state.last_activity = now;
        let call = state.queue.remove(index);
        drop(state);

        if let Some(mut call) = call {
            if let Err(error) = call.mark_complete() {
                self.fault(&error);
            }
            call.close(outcome);
        }
        self.wake.notify_one();
    }

    /// Close every call that is still waiting when the loop exits
    fn drain(&self) {
        let remaining: VecDeque<Call> = {
            let mut state = self.state();
            state.accepting = false;
            std::mem::take(&mut state.queue)
        };
        if remaining.is_empty() {
            return;
        }

        self.stats().closed_on_shutdown += remaining.len() as u64;
        for call in remaining {
            call.close(Err(ErrorKind::BucketClosed(self.key.clone())));
        }
    }

    fn park_duration(&self, deadline: Option<f64>) -> Duration {
        let idle = self.config.idle_interval;
        // Deadlines too far out to be a `Duration` park for the idle interval.
        let park = deadline.map_or(idle, |deadline| {
            Duration::try_from_secs_f64((deadline - self.clock.now()).max(0.0))
                .map_or(idle, |until| until.min(idle))
        });
        park.max(MIN_PARK)
    }

    /// Lifecycle faults are programming errors. They leave the queue as it
    /// was but panic in debug builds.
    fn fault(&self, error: &ErrorKind) {
        log::error!("Bucket {}: {error}", self.key);
        debug_assert!(false, "call lifecycle fault in bucket {}: {error}", self.key);
    }
}

/// Earliest time at which a waiting call will exceed `max_age`
fn next_expiry(queue: &VecDeque<Call>, max_age: Duration) -> Option<f64> {
    queue
        .iter()
        .filter(|call| !call.is_in_progress())
        .filter_map(|call| call.expires_at(max_age))
        .min_by(f64::total_cmp)
}

fn earliest(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
