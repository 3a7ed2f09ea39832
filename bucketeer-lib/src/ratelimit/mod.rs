//! Per-route rate limiting for outbound API calls.
//!
//! The API enforces a quota per route ("bucket") plus one global quota. This
//! module holds calls until both allow them to be sent.
//!
//! # Architecture
//!
//! - [`Call`]: One pending API invocation and the [`CallHandle`] its outcome is reported through
//! - [`Bucket`]: FIFO queue and scheduling loop for one (method, route) pair
//! - [`GlobalLimiter`]: Process-wide throttle, injected into every bucket
//! - [`BucketRegistry`]: Creates buckets on demand and retires idle ones
//! - [`BucketConfig`]: Tunables such as the maximum call age
//! - [`RateLimitHeaders`]: Window information parsed from a response

mod bucket;
mod call;
mod config;
mod global;
mod headers;
mod registry;

pub use bucket::{
    Bucket, BucketKey, BucketStats, BucketStatsMap, MAX_SEND_TIME_SAMPLES, RateWindow, Route,
};
pub use call::{Call, CallHandle, CallRequest};
pub use config::BucketConfig;
pub use global::{GlobalLimiter, GlobalState};
pub use headers::RateLimitHeaders;
pub use registry::BucketRegistry;
