#![allow(clippy::module_inception)]

mod bucket;
mod key;
mod stats;
mod window;

pub use bucket::Bucket;
pub use key::{BucketKey, Route};
pub use stats::{BucketStats, BucketStatsMap, MAX_SEND_TIME_SAMPLES};
pub use window::RateWindow;
