//! Controller configuration.

use std::time::Duration;

use rollcall_protocol::{ExpiryPolicy, MeetingId};
use rollcall_session::POLL_INTERVAL;
use rollcall_tick::{COUNTDOWN_PERIOD, TickConfig};

// ---------------------------------------------------------------------------
// ControllerConfig
// ---------------------------------------------------------------------------

/// Configuration for one live session controller.
///
/// Everything except `meeting_id` and `scan_base` has a sensible default;
/// the timing fields exist mostly so tests and demos can speed things up.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// The class meeting this session belongs to.
    pub meeting_id: MeetingId,

    /// Where scanned codes point, e.g. `https://portal.example.edu/`.
    /// The payload appends `/attendance/scan?meeting=..&token=..`.
    pub scan_base: String,

    /// The route of the live session page. Navigating away from it
    /// disables the session.
    pub session_path: String,

    /// How to read the expiry out of a token response.
    pub expiry_policy: ExpiryPolicy,

    /// Countdown cadence. Default: 1 second.
    pub countdown_period: Duration,

    /// Attendance poll cadence. Default: 2 seconds.
    pub poll_interval: Duration,

    /// Capacity of the command channel. Senders wait when it is full.
    pub channel_size: usize,

    /// Capacity of the event broadcast. Slow subscribers lag beyond it.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            meeting_id: MeetingId(0),
            scan_base: "http://localhost:8080/".to_string(),
            session_path: "/live".to_string(),
            expiry_policy: ExpiryPolicy::default(),
            countdown_period: COUNTDOWN_PERIOD,
            poll_interval: POLL_INTERVAL,
            channel_size: 32,
            event_capacity: 64,
        }
    }
}

impl ControllerConfig {
    /// A default config for `meeting_id`.
    pub fn for_meeting(meeting_id: MeetingId) -> Self {
        Self {
            meeting_id,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        if self.countdown_period < TickConfig::MIN_PERIOD {
            tracing::warn!(
                period_ms = self.countdown_period.as_millis() as u64,
                "countdown period below minimum, clamping"
            );
            self.countdown_period = TickConfig::MIN_PERIOD;
        }
        if self.poll_interval < TickConfig::MIN_PERIOD {
            tracing::warn!(
                interval_ms = self.poll_interval.as_millis() as u64,
                "poll interval below minimum, clamping"
            );
            self.poll_interval = TickConfig::MIN_PERIOD;
        }
        self.channel_size = self.channel_size.max(1);
        self.event_capacity = self.event_capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_config_default() {
        let config = ControllerConfig::default();
        assert_eq!(config.countdown_period, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.expiry_policy, ExpiryPolicy::Strict);
        assert_eq!(config.session_path, "/live");
    }

    #[test]
    fn test_validated_clamps_zero_values() {
        let config = ControllerConfig {
            poll_interval: Duration::ZERO,
            countdown_period: Duration::ZERO,
            channel_size: 0,
            event_capacity: 0,
            ..ControllerConfig::for_meeting(MeetingId(9))
        }
        .validated();

        assert_eq!(config.meeting_id, MeetingId(9));
        assert_eq!(config.poll_interval, TickConfig::MIN_PERIOD);
        assert_eq!(config.countdown_period, TickConfig::MIN_PERIOD);
        assert_eq!(config.channel_size, 1);
        assert_eq!(config.event_capacity, 1);
    }
}
