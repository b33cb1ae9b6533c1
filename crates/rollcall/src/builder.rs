//! `SessionControllerBuilder`: configure and start a session controller.

use std::sync::Arc;
use std::time::Duration;

use rollcall_protocol::{ExpiryPolicy, MeetingId};
use rollcall_tick::{SharedClock, SystemClock};
use rollcall_transport::{Backend, HttpBackend};

use crate::{ControllerConfig, RollcallError, SessionController, SessionHandle};

/// Builder for configuring and starting a [`SessionController`].
///
/// # Example
///
/// ```rust,no_run
/// use rollcall::prelude::*;
///
/// # async fn start() -> Result<(), RollcallError> {
/// let session = SessionController::builder(MeetingId(42))
///     .scan_base("https://portal.example.edu/")
///     .session_path("/classes/42/live")
///     .spawn_http("https://portal.example.edu/api/")?;
///
/// session.set_enabled(true).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SessionControllerBuilder {
    config: ControllerConfig,
    clock: Option<SharedClock>,
}

impl SessionControllerBuilder {
    /// Creates a builder with default settings for `meeting_id`.
    pub fn new(meeting_id: MeetingId) -> Self {
        Self {
            config: ControllerConfig::for_meeting(meeting_id),
            clock: None,
        }
    }

    /// Replaces the whole configuration, keeping the meeting id.
    pub fn config(mut self, config: ControllerConfig) -> Self {
        let meeting_id = self.config.meeting_id;
        self.config = ControllerConfig {
            meeting_id,
            ..config
        };
        self
    }

    /// Sets the base URL that scanned codes point to.
    pub fn scan_base(mut self, url: &str) -> Self {
        self.config.scan_base = url.to_string();
        self
    }

    /// Sets the route of the live session page.
    pub fn session_path(mut self, path: &str) -> Self {
        self.config.session_path = path.to_string();
        self
    }

    /// Sets how token expiries are read.
    pub fn expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.config.expiry_policy = policy;
        self
    }

    /// Sets the attendance poll cadence.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the countdown cadence.
    pub fn countdown_period(mut self, period: Duration) -> Self {
        self.config.countdown_period = period;
        self
    }

    /// Sets the command channel capacity.
    pub fn channel_size(mut self, size: usize) -> Self {
        self.config.channel_size = size;
        self
    }

    /// Uses `clock` instead of the system clock. Share the same clock with
    /// an in-memory backend to keep expiries and countdowns consistent.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Starts the controller against `backend`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<B: Backend>(self, backend: Arc<B>) -> Result<SessionHandle, RollcallError> {
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        SessionController::spawn(self.config, backend, clock)
    }

    /// Starts the controller against the REST backend at `base_url`.
    pub fn spawn_http(self, base_url: &str) -> Result<SessionHandle, RollcallError> {
        let backend = HttpBackend::new(base_url)?;
        self.spawn(Arc::new(backend))
    }
}
