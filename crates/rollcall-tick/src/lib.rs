//! Fixed-period timers for Rollcall.
//!
//! A live session runs two independent timers: the 1 Hz countdown that
//! drives token rotation and the 2 s attendance poll. Both are a
//! [`TickScheduler`] with a different period; neither ever pauses the
//! other.
//!
//! # Integration
//!
//! The scheduler is designed to sit inside the session actor's
//! `tokio::select!` loop:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         _ = countdown.wait_for_tick() => { /* re-check enabled, then advance */ }
//!         _ = poll.wait_for_tick() => { /* re-check enabled, then poll */ }
//!     }
//! }
//! ```
//!
//! A paused scheduler pends forever, so disabling a session is just
//! `pause()` on both timers. Handlers must still re-check the session
//! state: a tick can already be in the select when the pause lands.

mod clock;
mod countdown;

pub use clock::{Clock, SharedClock, SystemClock};
pub use countdown::{COUNTDOWN_PERIOD, Countdown, time_remaining_secs};

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for a [`TickScheduler`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. A late tick skips ahead: the next one is a
    /// full period after it fired.
    pub period: Duration,
    /// Create the scheduler paused. Session timers start paused and are
    /// resumed when the session is enabled.
    pub start_paused: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            start_paused: false,
        }
    }
}

impl TickConfig {
    /// Shortest accepted period.
    pub const MIN_PERIOD: Duration = Duration::from_millis(10);

    /// Create a config for a specific period with defaults otherwise.
    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]; `period` is raised
    /// to [`Self::MIN_PERIOD`].
    pub fn validated(mut self) -> Self {
        if self.period < Self::MIN_PERIOD {
            warn!(
                period_ms = self.period.as_millis() as u64,
                "tick period below minimum, clamping"
            );
            self.period = Self::MIN_PERIOD;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info (returned to caller each tick)
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1, survives pauses).
    pub tick: u64,
    /// `true` if this tick fired noticeably late.
    pub overrun: bool,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period tick scheduler with pause/resume.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    /// When the next tick should fire.
    next_tick: Instant,
    paused: bool,
}

impl TickScheduler {
    /// Create a new scheduler from config.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let next_tick = Instant::now() + config.period;
        let paused = config.start_paused;

        debug!(
            period_ms = config.period.as_millis() as u64,
            paused,
            "tick scheduler created"
        );

        Self {
            config,
            tick_count: 0,
            next_tick,
            paused,
        }
    }

    /// Create an unpaused scheduler for a specific period.
    pub fn with_period(period: Duration) -> Self {
        Self::new(TickConfig::with_period(period))
    }

    /// Wait until the next tick is due.
    ///
    /// While paused this future pends forever; `tokio::select!` still
    /// services its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let next = self.next_tick;
        let period = self.config.period;
        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        if overrun {
            let skipped = (late_by.as_nanos() / period.as_nanos()) as u64;
            if skipped > 0 {
                warn!(
                    tick = self.tick_count,
                    skipped,
                    late_ms = late_by.as_secs_f64() * 1000.0,
                    "tick overrun, skipping ahead"
                );
            }
        }
        self.next_tick = now + period;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
        }
    }

    /// Pause the scheduler. Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Resume after a pause. Idempotent.
    ///
    /// The next tick is one full period from now, never a
    /// burst of ticks for the time spent paused.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_tick = Instant::now() + self.config.period;
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    /// Whether the scheduler is currently paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.config.period
    }
}
