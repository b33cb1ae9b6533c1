//! In-process backend.
//!
//! Behaves like the real server from the client's point of view:
//!
//! - each `fetch_token` issues a fresh random token and supersedes the
//!   previous one;
//! - students "scan" with a token and are marked present only if the
//!   session is live and the token is the current one;
//! - every endpoint can be slowed down or made to fail.
//!
//! It also counts calls, including the highest number of concurrently
//! running token requests, which is what the in-flight tests assert on.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use rollcall_protocol::{
    AttendanceMap, AttendanceSnapshot, AttendanceWrite, MeetingId, StudentId, ToggleResponse,
    TokenResponse, WriteAck,
};
use rollcall_tick::SharedClock;

use crate::{Backend, TransportError};

/// The backend endpoints, for failure/latency injection and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Token,
    Toggle,
    Snapshot,
    Write,
}

/// Why a simulated scan was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanRejected {
    #[error("session is not live")]
    SessionClosed,
    #[error("token is not current")]
    StaleToken,
    #[error("student {0} is not enrolled")]
    NotEnrolled(StudentId),
}

/// Settings for a [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Lifetime of each issued token.
    pub token_ttl: Duration,
    /// Whether token responses carry `expires_at_timestamp`.
    pub include_timestamp: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(30),
            include_timestamp: true,
        }
    }
}

#[derive(Debug, Default)]
struct MeetingState {
    enabled: bool,
    current_token: Option<String>,
    roster: AttendanceMap,
}

#[derive(Debug, Default)]
struct Inner {
    meetings: HashMap<MeetingId, MeetingState>,
    failing: HashSet<Endpoint>,
    latency: HashMap<Endpoint, Duration>,
    calls: HashMap<Endpoint, usize>,
    detached_disables: usize,
    tokens_in_flight: usize,
    max_tokens_in_flight: usize,
}

/// An in-memory [`Backend`].
pub struct MemoryBackend {
    config: MemoryConfig,
    clock: SharedClock,
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Creates an empty backend reading time from `clock`.
    pub fn new(config: MemoryConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock only happens inside a failing
        // test; keep serving the data rather than cascading.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- Scenario setup ----------------------------------------------------

    /// Adds students to a meeting's roster, all absent.
    pub fn enroll<I, S>(&self, meeting: MeetingId, students: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<StudentId>,
    {
        let mut inner = self.lock();
        let state = inner.meetings.entry(meeting).or_default();
        for student in students {
            state.roster.entry(student.into()).or_insert(false);
        }
    }

    /// Makes every call to `endpoint` fail (or succeed again).
    pub fn set_failing(&self, endpoint: Endpoint, failing: bool) {
        let mut inner = self.lock();
        if failing {
            inner.failing.insert(endpoint);
        } else {
            inner.failing.remove(&endpoint);
        }
    }

    /// Delays every call to `endpoint`.
    pub fn set_latency(&self, endpoint: Endpoint, latency: Duration) {
        self.lock().latency.insert(endpoint, latency);
    }

    // -- Simulated remote actors ---------------------------------------------

    /// A student scans the QR code carrying `token`.
    pub fn scan(
        &self,
        meeting: MeetingId,
        student: impl Into<StudentId>,
        token: &str,
    ) -> Result<(), ScanRejected> {
        let student = student.into();
        let mut inner = self.lock();
        let state = inner.meetings.entry(meeting).or_default();

        if !state.enabled {
            return Err(ScanRejected::SessionClosed);
        }
        if state.current_token.as_deref() != Some(token) {
            return Err(ScanRejected::StaleToken);
        }
        match state.roster.get_mut(&student) {
            Some(present) => {
                *present = true;
                Ok(())
            }
            None => Err(ScanRejected::NotEnrolled(student)),
        }
    }

    /// Another writer (e.g. a second instructor device) changes a record.
    pub fn mark(&self, meeting: MeetingId, student: impl Into<StudentId>, present: bool) {
        let mut inner = self.lock();
        let state = inner.meetings.entry(meeting).or_default();
        state.roster.insert(student.into(), present);
    }

    // -- Inspection ------------------------------------------------------------

    /// Calls made to `endpoint` so far (including failed ones).
    pub fn calls(&self, endpoint: Endpoint) -> usize {
        self.lock().calls.get(&endpoint).copied().unwrap_or(0)
    }

    /// Detached disables received so far.
    pub fn detached_disables(&self) -> usize {
        self.lock().detached_disables
    }

    /// Highest number of token requests that were running at once.
    pub fn max_concurrent_token_requests(&self) -> usize {
        self.lock().max_tokens_in_flight
    }

    /// Whether the server considers the meeting live.
    pub fn is_enabled(&self, meeting: MeetingId) -> bool {
        self.lock().meetings.get(&meeting).is_some_and(|m| m.enabled)
    }

    /// The token a scan must present right now.
    pub fn current_token(&self, meeting: MeetingId) -> Option<String> {
        self.lock()
            .meetings
            .get(&meeting)
            .and_then(|m| m.current_token.clone())
    }

    /// Server-side attendance for a meeting.
    pub fn presence(&self, meeting: MeetingId) -> AttendanceMap {
        self.lock()
            .meetings
            .get(&meeting)
            .map(|m| m.roster.clone())
            .unwrap_or_default()
    }

    // -- Internals -------------------------------------------------------------

    /// Counts the call, then applies injected latency and failure.
    async fn enter(&self, endpoint: Endpoint) -> Result<(), TransportError> {
        let latency = {
            let mut inner = self.lock();
            *inner.calls.entry(endpoint).or_insert(0) += 1;
            inner.latency.get(&endpoint).copied().unwrap_or(Duration::ZERO)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.lock().failing.contains(&endpoint) {
            return Err(TransportError::Unavailable(format!("{endpoint:?} endpoint failing")));
        }
        Ok(())
    }

    async fn issue_token(&self, meeting: MeetingId) -> Result<TokenResponse, TransportError> {
        let expires_ms = self.clock.now_ms() + self.config.token_ttl.as_millis() as i64;
        self.enter(Endpoint::Token).await?;

        let token = generate_token();
        self.lock().meetings.entry(meeting).or_default().current_token = Some(token.clone());

        let expires_at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(expires_ms)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();

        tracing::debug!(%meeting, expires_ms, "memory backend issued token");

        Ok(TokenResponse {
            token,
            expires_at,
            expires_at_timestamp: self.config.include_timestamp.then_some(expires_ms),
        })
    }
}

/// Tracks concurrently running token requests for the lifetime of a call.
struct InFlight<'a>(&'a MemoryBackend);

impl<'a> InFlight<'a> {
    fn enter(backend: &'a MemoryBackend) -> Self {
        let mut inner = backend.lock();
        inner.tokens_in_flight += 1;
        inner.max_tokens_in_flight = inner.max_tokens_in_flight.max(inner.tokens_in_flight);
        Self(backend)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.lock().tokens_in_flight -= 1;
    }
}

impl Backend for MemoryBackend {
    async fn fetch_token(&self, meeting: MeetingId) -> Result<TokenResponse, TransportError> {
        let _in_flight = InFlight::enter(self);
        self.issue_token(meeting).await
    }

    async fn set_enabled(
        &self,
        meeting: MeetingId,
        enabled: bool,
    ) -> Result<ToggleResponse, TransportError> {
        self.enter(Endpoint::Toggle).await?;
        let mut inner = self.lock();
        let state = inner.meetings.entry(meeting).or_default();
        state.enabled = enabled;
        if !enabled {
            state.current_token = None;
        }
        Ok(ToggleResponse { enabled })
    }

    async fn fetch_snapshot(&self, meeting: MeetingId) -> Result<AttendanceSnapshot, TransportError> {
        self.enter(Endpoint::Snapshot).await?;
        Ok(AttendanceSnapshot::from_presence(&self.presence(meeting)))
    }

    async fn write_attendance(
        &self,
        meeting: MeetingId,
        write: AttendanceWrite,
    ) -> Result<WriteAck, TransportError> {
        self.enter(Endpoint::Write).await?;
        let mut inner = self.lock();
        let state = inner.meetings.entry(meeting).or_default();
        match state.roster.get_mut(&write.student_id) {
            Some(present) => {
                *present = write.present;
                Ok(WriteAck {
                    success: true,
                    message: None,
                })
            }
            None => Ok(WriteAck {
                success: false,
                message: Some(format!("student {} is not enrolled", write.student_id)),
            }),
        }
    }

    fn disable_detached(&self, meeting: MeetingId) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.detached_disables += 1;
        let state = inner.meetings.entry(meeting).or_default();
        state.enabled = false;
        state.current_token = None;
        Ok(())
    }
}

/// Generates a random 32-character hex token (128 bits of entropy).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
