use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use http::Method;
use tokio::sync::oneshot;

use crate::ratelimit::{BucketKey, Route};
use crate::transport::Response;
use crate::{ErrorKind, Result};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// One pending API invocation.
///
/// A call is created together with a [`CallHandle`]. The call itself is moved
/// into a bucket, which owns it until it is closed; the handle stays with the
/// caller and resolves to the call's outcome.
///
/// Closing consumes the call, so a call can be closed at most once.
#[derive(Debug)]
pub struct Call {
    id: u64,
    method: Method,
    route: Route,
    endpoint: String,
    body: Option<String>,
    created_at: Option<f64>,
    in_progress: bool,
    completion: oneshot::Sender<Result<Response>>,
}

/// The owned part of a [`Call`] that is lent to the transport for one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Id of the originating call
    pub id: u64,
    /// HTTP method
    pub method: Method,
    /// Logical route the call is rate limited under
    pub route: Route,
    /// Concrete path, e.g. `/channels/1/messages`
    pub endpoint: String,
    /// Optional JSON body
    pub body: Option<String>,
}

impl Call {
    /// Create a call and the handle its outcome is reported through
    pub fn new(
        method: Method,
        route: impl Into<Route>,
        endpoint: impl Into<String>,
    ) -> (Self, CallHandle) {
        let (completion, receiver) = oneshot::channel();
        let id = NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let call = Self {
            id,
            method,
            route: route.into(),
            endpoint: endpoint.into(),
            body: None,
            created_at: None,
            in_progress: false,
            completion,
        };
        (call, CallHandle { id, receiver })
    }

    /// Attach a JSON body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the creation time explicitly (epoch seconds).
    ///
    /// Calls without one are stamped by the bucket's clock when enqueued.
    #[must_use]
    pub fn created_at(mut self, created_at: f64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub(crate) fn stamp(&mut self, now: f64) {
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
    }

    /// Process-unique id of this call
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// HTTP method
    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    /// Logical route
    #[must_use]
    pub const fn route(&self) -> &Route {
        &self.route
    }

    /// Concrete endpoint
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Key of the bucket this call belongs to
    #[must_use]
    pub fn key(&self) -> BucketKey {
        BucketKey::new(self.method.clone(), self.route.clone())
    }

    /// Returns `true` between dispatch and completion
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Time the call has existed at `now`
    #[must_use]
    pub fn age(&self, now: f64) -> Duration {
        let created_at = self.created_at.unwrap_or(now);
        Duration::try_from_secs_f64(now - created_at).unwrap_or(Duration::ZERO)
    }

    /// Returns `true` if the call is older than `max_age` at `now`
    #[must_use]
    pub fn has_timed_out(&self, max_age: Duration, now: f64) -> bool {
        self.age(now) > max_age
    }

    /// Epoch seconds at which the call will exceed `max_age`
    #[must_use]
    pub fn expires_at(&self, max_age: Duration) -> Option<f64> {
        self.created_at.map(|t| t + max_age.as_secs_f64())
    }

    /// Snapshot of what the transport needs for one send
    #[must_use]
    pub fn request(&self) -> CallRequest {
        CallRequest {
            id: self.id,
            method: self.method.clone(),
            route: self.route.clone(),
            endpoint: self.endpoint.clone(),
            body: self.body.clone(),
        }
    }

    /// Mark the call as handed to the transport.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AlreadyDispatched`] if the call is already in progress.
    pub fn mark_dispatched(&mut self) -> Result<()> {
        if self.in_progress {
            return Err(ErrorKind::AlreadyDispatched(self.id));
        }
        self.in_progress = true;
        Ok(())
    }

    /// Mark the send as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NotDispatched`] if the call was never dispatched.
    pub fn mark_complete(&mut self) -> Result<()> {
        if !self.in_progress {
            return Err(ErrorKind::NotDispatched(self.id));
        }
        self.in_progress = false;
        Ok(())
    }

    /// Report the outcome to the caller. Terminal.
    pub fn close(self, outcome: Result<Response>) {
        if self.completion.send(outcome).is_err() {
            log::debug!("Caller of call {} is no longer waiting", self.id);
        }
    }

    /// Evict the call as timed out at `now`
    pub(crate) fn time_out(self, now: f64) {
        let error = ErrorKind::TimedOut {
            method: self.method.clone(),
            route: self.route.to_string(),
            endpoint: self.endpoint.clone(),
            waited: self.age(now),
        };
        self.close(Err(error));
    }
}

/// Resolves to the outcome of a [`Call`].
///
/// If the call is dropped without being closed, the handle resolves to
/// [`ErrorKind::CallAbandoned`].
#[derive(Debug)]
pub struct CallHandle {
    id: u64,
    receiver: oneshot::Receiver<Result<Response>>,
}

impl CallHandle {
    /// Id of the call this handle belongs to
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl Future for CallHandle {
    type Output = Result<Response>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or(Err(ErrorKind::CallAbandoned)))
    }
}
