//! Countdown arithmetic for the token epoch.

use std::time::Duration;

/// The countdown ticks once per second.
pub const COUNTDOWN_PERIOD: Duration = Duration::from_secs(1);

/// Whole seconds left until `expires_at_ms`, never negative.
///
/// `max(0, floor((expires_at - now) / 1000))`.
pub fn time_remaining_secs(expires_at_ms: i64, now_ms: i64) -> u64 {
    if expires_at_ms <= now_ms {
        0
    } else {
        (expires_at_ms.saturating_sub(now_ms) / 1000) as u64
    }
}

/// The deadline of the current token epoch.
///
/// An expiry of 0 means "unarmed": no token, or a degraded token-less
/// payload. An unarmed countdown reads 0 but never asks for a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    expires_at_ms: i64,
}

impl Countdown {
    /// A countdown to `expires_at_ms`. Non-positive values are unarmed.
    pub fn until(expires_at_ms: i64) -> Self {
        Self {
            expires_at_ms: expires_at_ms.max(0),
        }
    }

    /// The absolute deadline, 0 when unarmed.
    pub fn expires_at_ms(&self) -> i64 {
        self.expires_at_ms
    }

    /// Whether a deadline is set.
    pub fn is_armed(&self) -> bool {
        self.expires_at_ms > 0
    }

    /// Seconds remaining at `now_ms`.
    pub fn remaining_secs(&self, now_ms: i64) -> u64 {
        if !self.is_armed() {
            return 0;
        }
        time_remaining_secs(self.expires_at_ms, now_ms)
    }

    /// Whether an armed deadline has been reached.
    pub fn is_elapsed(&self, now_ms: i64) -> bool {
        self.is_armed() && self.remaining_secs(now_ms) == 0
    }
}
