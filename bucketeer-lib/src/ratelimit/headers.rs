//! Handle rate limiting headers.
//!
//! The API reports a route's window through `X-RateLimit-*` headers and
//! signals throttling through `Retry-After`, optionally flagged as global
//! with `X-RateLimit-Global`.

use http::{HeaderMap, HeaderValue, StatusCode};
use std::time::{Duration, SystemTime};
use thiserror::Error;

const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const GLOBAL: &str = "x-ratelimit-global";
const RETRY_AFTER: &str = "retry-after";

/// Delay assumed for a global throttle that carries no delay of its own
const DEFAULT_GLOBAL_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum RetryAfterParseError {
    #[error("Unable to parse value '{0}'")]
    ValueError(String),

    #[error("Header value contains invalid chars")]
    HeaderValueError,
}

/// Rate limit information reported with a single response.
///
/// Every field is optional: a response only updates what it carries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateLimitHeaders {
    /// Calls allowed per window
    pub limit: Option<u32>,
    /// Calls left in the current window
    pub remaining: Option<u32>,
    /// Epoch seconds at which the window resets
    pub reset: Option<f64>,
    /// Set when the response signalled a global throttle; epoch seconds at
    /// which the global limit lifts
    pub global_reset: Option<f64>,
}

impl RateLimitHeaders {
    /// Parse the rate limit headers of a response received at `now`.
    ///
    /// A `429 Too Many Requests` without window headers closes the route's
    /// window until `Retry-After` has passed. If the response is flagged as
    /// global, the delay applies to the whole client instead.
    #[must_use]
    pub fn from_response(status: StatusCode, headers: &HeaderMap, now: f64) -> Self {
        let limit = parse_header_value(headers, LIMIT);
        let mut remaining = parse_header_value(headers, REMAINING);
        let mut reset = parse_seconds(headers, RESET)
            .or_else(|| parse_seconds(headers, RESET_AFTER).map(|after| now + after));

        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|value| parse_retry_after(value).ok());

        let global = headers
            .get(GLOBAL)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));

        let mut global_reset = None;
        if global {
            let delay = retry_after
                .or_else(|| {
                    reset.and_then(|r| Duration::try_from_secs_f64((r - now).max(0.0)).ok())
                })
                .unwrap_or(DEFAULT_GLOBAL_DELAY);
            global_reset = Some(now + delay.as_secs_f64());
        } else if status == StatusCode::TOO_MANY_REQUESTS
            && let Some(delay) = retry_after
        {
            remaining = Some(0);
            reset = Some(reset.unwrap_or(0.0).max(now + delay.as_secs_f64()));
        }

        Self {
            limit,
            remaining,
            reset,
            global_reset,
        }
    }

    /// Returns `true` if the response carried no rate limit information at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parse the "Retry-After" header as specified per
/// [RFC 7231 section 7.1.3](https://www.rfc-editor.org/rfc/rfc7231#section-7.1.3).
///
/// Fractional seconds are accepted as well, since some APIs report
/// sub-second delays.
pub(crate) fn parse_retry_after(value: &HeaderValue) -> Result<Duration, RetryAfterParseError> {
    let value = value
        .to_str()
        .map_err(|_| RetryAfterParseError::HeaderValueError)?;

    // RFC 7231: Retry-After = HTTP-date / delay-seconds
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map_or_else(
            || {
                httpdate::parse_http_date(value)
                    .map(|s| {
                        s.duration_since(SystemTime::now())
                            // if date is in the past, we can use ZERO
                            .unwrap_or(Duration::ZERO)
                    })
                    .map_err(|_| RetryAfterParseError::ValueError(value.into()))
            },
            Ok,
        )
}

fn parse_header_value<T: std::str::FromStr>(headers: &HeaderMap, header_name: &str) -> Option<T> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<T>().ok())
}

/// Epoch or relative seconds; `inf` and `NaN` parse as `f64` but are no time
fn parse_seconds(headers: &HeaderMap, header_name: &str) -> Option<f64> {
    parse_header_value::<f64>(headers, header_name).filter(|secs| secs.is_finite())
}
