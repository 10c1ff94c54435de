// Provider-reported rate-limit window.
//
// Updated from `x-rate-limit-remaining` / `x-rate-limit-reset` after every
// response. A header that is missing leaves the previous value in place.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;

pub const REMAINING_HEADER: &str = "x-rate-limit-remaining";
pub const RESET_HEADER: &str = "x-rate-limit-reset";

/// Values at or above this are treated as milliseconds since the epoch.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Calls left in the current window, once a response has reported it.
    pub remaining: Option<i64>,
    /// When the current window resets, once a response has reported it.
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Folds the rate-limit headers of one response into the state.
    pub fn observe(&mut self, headers: &HeaderMap) {
        if let Some(remaining) = header_str(headers, REMAINING_HEADER).and_then(|v| v.parse().ok()) {
            self.remaining = Some(remaining);
        }
        if let Some(reset_at) = header_str(headers, RESET_HEADER).and_then(parse_reset) {
            self.reset_at = Some(reset_at);
        }
    }

    /// True when the budget is spent, or when the reported window has already
    /// elapsed and the budget is unknown until the next response refreshes it.
    pub fn is_rate_limited_at(&self, now: DateTime<Utc>) -> bool {
        let exhausted = matches!(self.remaining, Some(r) if r <= 0);
        let window_elapsed = matches!(self.reset_at, Some(reset) if now >= reset);
        exhausted || window_elapsed
    }

    pub fn is_rate_limited(&self) -> bool {
        self.is_rate_limited_at(Utc::now())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Epoch seconds, epoch milliseconds, or RFC 3339.
fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(n) = value.parse::<i64>() {
        return if n >= MILLIS_THRESHOLD {
            Utc.timestamp_millis_opt(n).single()
        } else {
            Utc.timestamp_opt(n, 0).single()
        };
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
