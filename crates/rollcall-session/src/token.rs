//! The rotating-token state machine.
//!
//! `TokenMachine` owns the single current token of a live session and
//! decides when to ask for a new one. It never talks to the network. The
//! controller feeds it [`TokenEvent`]s and performs the [`TokenEffect`]s
//! it returns.
//!
//! ```text
//!            Enable                     Acquired
//!   Idle ─────────────→ Fetching ───────────────→ Active
//!    ↑                     │  ↑                    │  ↑
//!    │          AcquireFailed│  │ForceRefresh   Tick │  │ Acquired
//!    │                     ↓  │          (elapsed) ↓  │
//!    │                   Degraded              RefreshPending
//!    │                                             │
//!    └───────────────── Disable (from any) ─────────┘
//! ```
//!
//! The in-flight request id is part of the machine, so "at most one
//! outstanding request" is a property of the state rather than of timing.

use rollcall_protocol::{MeetingId, ScanBase, ScanPayload};
use rollcall_tick::Countdown;

/// Identifies one token acquisition. Responses carrying any other id are
/// stale and discarded.
pub type RequestId = u64;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// A token as handed out by the backend, with its resolved expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at_ms: i64,
    /// Increments with every successful acquisition.
    pub epoch: u64,
}

/// Where the machine is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenPhase {
    /// Session disabled.
    Idle,

    /// Enabled, acquisition in flight. `previous` is the token still on
    /// display during a manual refresh.
    Fetching { previous: Option<IssuedToken> },

    /// Token current, countdown running.
    Active(IssuedToken),

    /// The countdown reached zero and the one refresh for this epoch is
    /// in flight. The expired token stays on display until it lands.
    RefreshPending(IssuedToken),

    /// The last acquisition failed. The payload carries no token and the
    /// countdown is unarmed.
    Degraded,
}

/// The name of a [`TokenPhase`], without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Idle,
    Fetching,
    Active,
    RefreshPending,
    Degraded,
}

impl TokenPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            TokenPhase::Idle => PhaseKind::Idle,
            TokenPhase::Fetching { .. } => PhaseKind::Fetching,
            TokenPhase::Active(_) => PhaseKind::Active,
            TokenPhase::RefreshPending(_) => PhaseKind::RefreshPending,
            TokenPhase::Degraded => PhaseKind::Degraded,
        }
    }

    /// The token currently on display, if any.
    pub fn displayed(&self) -> Option<&IssuedToken> {
        match self {
            TokenPhase::Active(token) | TokenPhase::RefreshPending(token) => Some(token),
            TokenPhase::Fetching { previous } => previous.as_ref(),
            TokenPhase::Idle | TokenPhase::Degraded => None,
        }
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PhaseKind::Idle => "idle",
            PhaseKind::Fetching => "fetching",
            PhaseKind::Active => "active",
            PhaseKind::RefreshPending => "refresh-pending",
            PhaseKind::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Events and effects
// ---------------------------------------------------------------------------

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    /// The session was just enabled.
    Enabled,
    /// The countdown for the current epoch reached zero.
    Expired,
    /// The user asked for a new token.
    Forced,
}

/// Inputs to [`TokenMachine::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    Enable,
    Disable,
    /// One countdown period elapsed.
    Tick,
    ForceRefresh,
    /// A fetch succeeded and its expiry was resolved.
    Acquired {
        request: RequestId,
        token: String,
        expires_at_ms: i64,
    },
    /// A fetch failed, or its response had no usable expiry.
    AcquireFailed { request: RequestId },
}

/// Work the controller must perform after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEffect {
    /// Start a token request tagged with `request`.
    Fetch {
        request: RequestId,
        reason: FetchReason,
    },
    /// The scannable payload changed.
    Publish(ScanPayload),
    /// A new token epoch began.
    TokenRotated { epoch: u64 },
}

// ---------------------------------------------------------------------------
// TokenMachine
// ---------------------------------------------------------------------------

/// Reducer for one session's token.
#[derive(Debug, Clone)]
pub struct TokenMachine {
    meeting: MeetingId,
    scan_base: ScanBase,
    phase: TokenPhase,
    in_flight: Option<RequestId>,
    next_request: RequestId,
    epoch: u64,
    payload: ScanPayload,
}

impl TokenMachine {
    /// A disabled machine showing the token-less payload.
    pub fn new(meeting: MeetingId, scan_base: ScanBase) -> Self {
        let payload = ScanPayload::build(&scan_base, meeting, None);
        Self {
            meeting,
            scan_base,
            phase: TokenPhase::Idle,
            in_flight: None,
            next_request: 1,
            epoch: 0,
            payload,
        }
    }

    /// Applies one event at `now_ms` and returns the resulting effects.
    pub fn apply(&mut self, event: TokenEvent, now_ms: i64) -> Vec<TokenEffect> {
        let mut effects = Vec::new();
        match event {
            TokenEvent::Enable => self.on_enable(&mut effects),
            TokenEvent::Disable => self.on_disable(&mut effects),
            TokenEvent::Tick => self.on_tick(now_ms, &mut effects),
            TokenEvent::ForceRefresh => self.on_force_refresh(&mut effects),
            TokenEvent::Acquired {
                request,
                token,
                expires_at_ms,
            } => self.on_acquired(request, token, expires_at_ms, now_ms, &mut effects),
            TokenEvent::AcquireFailed { request } => self.on_failed(request, &mut effects),
        }
        effects
    }

    fn on_enable(&mut self, effects: &mut Vec<TokenEffect>) {
        if self.phase != TokenPhase::Idle {
            return;
        }
        self.phase = TokenPhase::Fetching { previous: None };
        match self.in_flight {
            Some(request) => {
                tracing::debug!(meeting_id = %self.meeting, request, "re-enabled; adopting outstanding token request");
            }
            None => self.start_fetch(FetchReason::Enabled, effects),
        }
    }

    fn on_disable(&mut self, effects: &mut Vec<TokenEffect>) {
        if self.phase == TokenPhase::Idle {
            return;
        }
        // An outstanding request stays tracked so a quick re-enable does
        // not issue a second one. Its response is dropped while idle.
        self.phase = TokenPhase::Idle;
        self.set_payload(None, effects);
    }

    fn on_tick(&mut self, now_ms: i64, effects: &mut Vec<TokenEffect>) {
        let TokenPhase::Active(current) = &self.phase else {
            return;
        };
        if self.in_flight.is_some() || !Countdown::until(current.expires_at_ms).is_elapsed(now_ms) {
            return;
        }

        let expired = current.clone();
        tracing::debug!(meeting_id = %self.meeting, epoch = expired.epoch, "token expired; refreshing");
        self.phase = TokenPhase::RefreshPending(expired);
        self.start_fetch(FetchReason::Expired, effects);
    }

    fn on_force_refresh(&mut self, effects: &mut Vec<TokenEffect>) {
        if self.phase == TokenPhase::Idle || self.in_flight.is_some() {
            return;
        }
        let previous = self.phase.displayed().cloned();
        self.phase = TokenPhase::Fetching { previous };
        self.start_fetch(FetchReason::Forced, effects);
    }

    fn on_acquired(
        &mut self,
        request: RequestId,
        token: String,
        expires_at_ms: i64,
        now_ms: i64,
        effects: &mut Vec<TokenEffect>,
    ) {
        if !self.settle(request) {
            return;
        }
        if self.phase == TokenPhase::Idle {
            tracing::debug!(meeting_id = %self.meeting, request, "token arrived after disable; dropped");
            return;
        }
        if expires_at_ms <= now_ms {
            tracing::warn!(
                meeting_id = %self.meeting,
                expires_at_ms,
                now_ms,
                "backend issued an already-expired token"
            );
        }

        self.epoch += 1;
        self.set_payload(Some(&token), effects);
        self.phase = TokenPhase::Active(IssuedToken {
            token,
            expires_at_ms,
            epoch: self.epoch,
        });
        effects.push(TokenEffect::TokenRotated { epoch: self.epoch });
        tracing::info!(meeting_id = %self.meeting, epoch = self.epoch, expires_at_ms, "token rotated");
    }

    fn on_failed(&mut self, request: RequestId, effects: &mut Vec<TokenEffect>) {
        if !self.settle(request) || self.phase == TokenPhase::Idle {
            return;
        }
        tracing::warn!(meeting_id = %self.meeting, request, "token acquisition failed; showing token-less payload");
        self.phase = TokenPhase::Degraded;
        self.set_payload(None, effects);
    }

    /// Clears the in-flight slot if `request` is the one outstanding.
    fn settle(&mut self, request: RequestId) -> bool {
        if self.in_flight != Some(request) {
            tracing::debug!(meeting_id = %self.meeting, request, in_flight = ?self.in_flight, "stale token response discarded");
            return false;
        }
        self.in_flight = None;
        true
    }

    fn start_fetch(&mut self, reason: FetchReason, effects: &mut Vec<TokenEffect>) {
        debug_assert!(self.in_flight.is_none());
        let request = self.next_request;
        self.next_request += 1;
        self.in_flight = Some(request);
        effects.push(TokenEffect::Fetch { request, reason });
    }

    fn set_payload(&mut self, token: Option<&str>, effects: &mut Vec<TokenEffect>) {
        let payload = ScanPayload::build(&self.scan_base, self.meeting, token);
        if payload != self.payload {
            self.payload = payload.clone();
            effects.push(TokenEffect::Publish(payload));
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub fn phase(&self) -> &TokenPhase {
        &self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.phase != TokenPhase::Idle
    }

    /// Whether a token request is outstanding.
    pub fn is_fetching(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight
    }

    pub fn current_token(&self) -> Option<&str> {
        self.phase.displayed().map(|t| t.token.as_str())
    }

    /// Absolute expiry of the displayed token; 0 when there is none.
    pub fn expires_at_ms(&self) -> i64 {
        self.phase.displayed().map_or(0, |t| t.expires_at_ms)
    }

    /// Whole seconds left at `now_ms`. Always 0 while disabled or degraded.
    pub fn time_remaining(&self, now_ms: i64) -> u64 {
        Countdown::until(self.expires_at_ms()).remaining_secs(now_ms)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn payload(&self) -> &ScanPayload {
        &self.payload
    }
}
