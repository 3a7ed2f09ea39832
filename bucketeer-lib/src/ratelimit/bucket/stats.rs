use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use http::StatusCode;

/// Number of most recent round-trip times kept for the median
pub const MAX_SEND_TIME_SAMPLES: usize = 128;

/// A [`HashMap`] mapping bucket keys (as `METHOD route`) to their [`BucketStats`]
pub type BucketStatsMap = HashMap<String, BucketStats>;

/// Record and report statistics for a [`crate::ratelimit::Bucket`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketStats {
    /// Calls handed to the transport
    pub dispatched: u64,
    /// Calls whose response had a success status
    pub succeeded: u64,
    /// Calls that got an error status or a transport failure
    pub failed: u64,
    /// Calls that got a `429 Too Many Requests`
    pub rate_limited: u64,
    /// Calls evicted because they waited too long
    pub timed_out: u64,
    /// Loop iterations that held back a call because of a bucket or global limit
    pub throttled: u64,
    /// Calls still queued when the bucket was closed
    pub closed_on_shutdown: u64,
    /// Round-trip times of the last [`MAX_SEND_TIME_SAMPLES`] completed sends
    pub send_times: VecDeque<Duration>,
}

impl BucketStats {
    /// Record a response with status code and round-trip time
    pub fn record_response(&mut self, status: StatusCode, send_time: Duration) {
        if status.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limited += 1;
        }
        self.record_send_time(send_time);
    }

    /// Record a send that failed before any response arrived
    pub fn record_failure(&mut self, send_time: Duration) {
        self.failed += 1;
        self.record_send_time(send_time);
    }

    fn record_send_time(&mut self, send_time: Duration) {
        if self.send_times.len() == MAX_SEND_TIME_SAMPLES {
            self.send_times.pop_front();
        }
        self.send_times.push_back(send_time);
    }

    /// Get median round-trip time
    #[must_use]
    pub fn median_send_time(&self) -> Option<Duration> {
        if self.send_times.is_empty() {
            return None;
        }

        let mut times: Vec<Duration> = self.send_times.iter().copied().collect();
        times.sort_unstable();
        let mid = times.len() / 2;

        if times.len().is_multiple_of(2) {
            Some((times[mid - 1] + times[mid]) / 2)
        } else {
            Some(times[mid])
        }
    }

    /// Get human-readable summary of the stats
    #[must_use]
    pub fn summary(&self) -> String {
        let median = self
            .median_send_time()
            .map_or_else(|| "N/A".to_string(), |d| format!("{}ms", d.as_millis()));

        format!(
            "{} dispatched ({} ok, {} failed, {} timed out), median: {}",
            self.dispatched, self.succeeded, self.failed, self.timed_out, median
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_response() {
        let mut stats = BucketStats::default();
        stats.record_response(StatusCode::OK, Duration::from_millis(10));
        stats.record_response(StatusCode::TOO_MANY_REQUESTS, Duration::from_millis(30));
        stats.record_failure(Duration::from_millis(20));

        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.rate_limited, 1);
        assert_eq!(stats.median_send_time(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_median_even() {
        let stats = BucketStats {
            send_times: VecDeque::from([Duration::from_millis(10), Duration::from_millis(30)]),
            ..BucketStats::default()
        };
        assert_eq!(stats.median_send_time(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_send_times_are_bounded() {
        let mut stats = BucketStats::default();
        for ms in 0..(MAX_SEND_TIME_SAMPLES as u64 + 72) {
            stats.record_response(StatusCode::OK, Duration::from_millis(ms));
        }

        assert_eq!(stats.succeeded, MAX_SEND_TIME_SAMPLES as u64 + 72);
        assert_eq!(stats.send_times.len(), MAX_SEND_TIME_SAMPLES);
        assert_eq!(stats.send_times.front(), Some(&Duration::from_millis(72)));
        assert_eq!(
            stats.send_times.back(),
            Some(&Duration::from_millis(MAX_SEND_TIME_SAMPLES as u64 + 71))
        );
    }

    #[test]
    fn test_summary() {
        let stats = BucketStats {
            dispatched: 3,
            succeeded: 2,
            failed: 1,
            ..BucketStats::default()
        };
        assert_eq!(
            stats.summary(),
            "3 dispatched (2 ok, 1 failed, 0 timed out), median: N/A"
        );
    }
}
