//! `bucketeer` schedules outbound calls against HTTP APIs that enforce a rate
//! limit per route plus one global limit.
//!
//! Calls are queued per (method, route). Each queue is drained by its own
//! task, which sends one call at a time, in order, and only while neither the
//! route's window nor the global limit forbids it. Calls that wait too long
//! are evicted and reported as timed out.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bucketeer_lib::ratelimit::{BucketConfig, BucketRegistry, Call};
//! use bucketeer_lib::transport::TransportBuilder;
//! use http::Method;
//!
//! #[tokio::main]
//! async fn main() -> bucketeer_lib::Result<()> {
//!     let transport = TransportBuilder::builder()
//!         .base_url("https://discord.com/api/v10".parse().unwrap())
//!         .build()
//!         .transport()?;
//!     let registry = BucketRegistry::new(BucketConfig::default(), Arc::new(transport))?;
//!     let _sweeper = registry.spawn_sweeper();
//!
//!     let (call, handle) = Call::new(Method::GET, "/gateway", "/gateway");
//!     registry.enqueue(call);
//!     let response = handle.await?;
//!     println!("{}", response.status);
//!     Ok(())
//! }
//! ```

mod types;

pub mod clock;
pub mod ratelimit;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use clock::{Clock, SystemClock, TokioClock};
pub use types::*;
