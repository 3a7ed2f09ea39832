use std::time::Duration;

use http::Method;
use thiserror::Error;

use crate::ratelimit::BucketKey;

/// Possible errors when dispatching calls through `bucketeer_lib`
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The call waited in its bucket longer than the configured maximum age
    /// and was evicted before it could be sent.
    #[error("Call timed out after {waited:?} in queue: {method} {route}{endpoint}")]
    TimedOut {
        /// HTTP method of the evicted call
        method: Method,
        /// Logical route of the evicted call
        route: String,
        /// Concrete endpoint of the evicted call
        endpoint: String,
        /// How long the call was queued
        waited: Duration,
    },

    /// The bucket was closed while the call was still queued
    #[error("Bucket {0} was closed before the call could be sent")]
    BucketClosed(BucketKey),

    /// The call was dropped without ever being closed
    #[error("Call was dropped before it completed")]
    CallAbandoned,

    /// Network error while sending the call
    #[error("Network error while sending request: {0}")]
    NetworkRequest(#[source] reqwest::Error),

    /// The body of a response could not be read
    #[error("Error reading response body: {0}")]
    ReadResponseBody(#[source] reqwest::Error),

    /// The HTTP client could not be built
    #[error("Error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// The endpoint could not be joined onto the base URL
    #[error("Cannot build a URL for endpoint `{0}`: {1}")]
    InvalidEndpoint(String, #[source] url::ParseError),

    /// A header value given to the transport is not valid
    #[error("Header could not be parsed.")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    /// A non-reqwest transport reported a failure
    #[error("Transport failed: {0}")]
    TransportFailure(String),

    /// A call was marked complete although it was never dispatched
    #[error("Call {0} was completed without being dispatched")]
    NotDispatched(u64),

    /// A call was dispatched twice
    #[error("Call {0} is already in progress")]
    AlreadyDispatched(u64),

    /// The configuration contains an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ErrorKind {
    /// Returns `true` if the call was evicted for waiting too long.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}
