use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ErrorKind, Result};

/// Default maximum time a call may wait in its bucket before it is evicted
const DEFAULT_MAX_CALL_AGE: Duration = Duration::from_secs(30);

/// Default upper bound on how long a bucket loop parks before re-checking state
const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Default time an empty bucket may stay idle before the registry retires it
const DEFAULT_BUCKET_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period of the registry's idle sweeper
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Scheduling configuration shared by all buckets of a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BucketConfig {
    /// Maximum time a call may wait in its queue before it is evicted
    #[serde(default = "default_max_call_age", with = "humantime_serde")]
    pub max_call_age: Duration,

    /// Longest time a bucket loop parks before re-evaluating its state
    #[serde(default = "default_idle_interval", with = "humantime_serde")]
    pub idle_interval: Duration,

    /// Time an empty bucket may stay idle before it is retired
    #[serde(default = "default_bucket_idle_timeout", with = "humantime_serde")]
    pub bucket_idle_timeout: Duration,

    /// Period of the background sweeper that retires idle buckets
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_call_age: default_max_call_age(),
            idle_interval: default_idle_interval(),
            bucket_idle_timeout: default_bucket_idle_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

const fn default_max_call_age() -> Duration {
    DEFAULT_MAX_CALL_AGE
}

const fn default_idle_interval() -> Duration {
    DEFAULT_IDLE_INTERVAL
}

const fn default_bucket_idle_timeout() -> Duration {
    DEFAULT_BUCKET_IDLE_TIMEOUT
}

const fn default_sweep_interval() -> Duration {
    DEFAULT_SWEEP_INTERVAL
}

impl BucketConfig {
    /// Create a `BucketConfig` from command-line style options, using defaults for missing values
    #[must_use]
    pub fn from_options(
        max_call_age: Option<Duration>,
        idle_interval: Option<Duration>,
        bucket_idle_timeout: Option<Duration>,
    ) -> Self {
        Self {
            max_call_age: max_call_age.unwrap_or(DEFAULT_MAX_CALL_AGE),
            idle_interval: idle_interval.unwrap_or(DEFAULT_IDLE_INTERVAL),
            bucket_idle_timeout: bucket_idle_timeout.unwrap_or(DEFAULT_BUCKET_IDLE_TIMEOUT),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Check that every duration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidConfig`] if any duration is zero. A zero
    /// idle interval would turn the bucket loop into a spin loop.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("max_call_age", self.max_call_age),
            ("idle_interval", self.idle_interval),
            ("bucket_idle_timeout", self.bucket_idle_timeout),
            ("sweep_interval", self.sweep_interval),
        ];
        for (name, value) in fields {
            if value.is_zero() {
                return Err(ErrorKind::InvalidConfig(format!("`{name}` must not be zero")));
            }
        }
        Ok(())
    }
}
