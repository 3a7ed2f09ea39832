//! Helpers shared by the unit tests of this crate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;

use crate::Result;
use crate::clock::{Clock, SystemClock};
use crate::ratelimit::{CallRequest, RateLimitHeaders};
use crate::transport::{Response, Transport};

/// Epoch timestamp test clocks are anchored at
pub(crate) const ANCHOR: f64 = 1_700_000_000.0;

/// A call as it was seen by the [`FakeTransport`]
#[derive(Debug, Clone)]
pub(crate) struct Sent {
    pub(crate) id: u64,
    pub(crate) endpoint: String,
    pub(crate) at: f64,
}

/// A scripted transport.
///
/// Scripted outcomes are returned in order; once they are used up every send
/// succeeds with `200 OK` and no rate limit headers.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    script: Mutex<VecDeque<Result<Response>>>,
    sent: Mutex<Vec<Sent>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            clock: Arc::new(SystemClock),
        }
    }
}

impl FakeTransport {
    pub(crate) fn respond(self, outcome: Result<Response>) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub(crate) fn respond_ok(self, rate_limit: RateLimitHeaders) -> Self {
        self.respond(Ok(ok_with(rate_limit)))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub(crate) fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: CallRequest) -> Result<Response> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        self.sent.lock().unwrap().push(Sent {
            id: request.id,
            endpoint: request.endpoint,
            at: self.clock.now(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ok_with(RateLimitHeaders::default())));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

/// A `200 OK` response carrying the given rate limit information
pub(crate) fn ok_with(rate_limit: RateLimitHeaders) -> Response {
    Response::new(StatusCode::OK, rate_limit)
}
