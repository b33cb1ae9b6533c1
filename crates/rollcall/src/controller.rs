//! Session controller: an isolated Tokio task that owns one live session.
//!
//! The controller holds the token machine, the reconciler, the exit guard
//! and both timers. Nothing else touches them. The outside world talks to
//! it through a [`SessionHandle`] (commands over a bounded `mpsc`
//! channel) and watches it through a `watch` channel of [`SessionView`]s
//! plus a `broadcast` of [`SessionEvent`]s.
//!
//! Backend calls never run inside the loop. Each one is spawned and
//! reports back on an internal channel, so a slow token request cannot
//! delay the countdown or a command.
//!
//! ```text
//!  SessionHandle ──Command──→ ┌──────────────────────┐ ──watch──→ SessionView
//!                             │   SessionActor loop  │ ──broadcast→ SessionEvent
//!  spawned I/O ──Completion─→ │ select! over:        │
//!                             │  commands            │ ──spawn──→ Backend calls
//!                             │  completions         │
//!                             │  countdown (1 Hz)    │
//!                             │  poll (2 s)          │
//!                             └──────────────────────┘
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;

use rollcall_protocol::{
    AttendanceSnapshot, AttendanceWrite, MeetingId, ScanBase, StudentId, ToggleResponse,
    TokenResponse, WriteAck, resolve_expiry,
};
use rollcall_session::{
    ExitGuard, ExitTrigger, MergeMode, MergeOutcome, OptimisticWrite, PendingToggle, Reconciler,
    RequestId, SETTLE_DELAY, SessionError, TokenEffect, TokenEvent, TokenMachine,
};
use rollcall_tick::{SharedClock, TickConfig, TickScheduler};
use rollcall_transport::{Backend, TransportError};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::{ControllerConfig, RollcallError, SessionControllerBuilder, SessionEvent, SessionView};

type Reply<T> = oneshot::Sender<Result<T, RollcallError>>;

/// Commands sent to the controller through its channel.
enum Command {
    SetEnabled { enabled: bool, reply: Reply<bool> },
    ForceRefresh { reply: Reply<()> },
    RequestToggle { student: StudentId, reply: Reply<PendingToggle> },
    /// Answered once the write has been persisted or rolled back.
    ConfirmToggle { reply: Reply<()> },
    CancelToggle { reply: Reply<PendingToggle> },
    Navigate { from: String, to: String },
    PageUnload,
    Teardown { reply: oneshot::Sender<()> },
}

/// Results of spawned backend calls, delivered back to the loop.
enum Completion {
    Token {
        request: RequestId,
        result: Result<TokenResponse, TransportError>,
    },
    Toggle {
        requested: bool,
        /// Exit count when the request was sent.
        departures: u64,
        result: Result<ToggleResponse, TransportError>,
        reply: Reply<bool>,
    },
    Snapshot {
        mode: MergeMode,
        result: Result<AttendanceSnapshot, TransportError>,
    },
    Write {
        write: OptimisticWrite,
        result: Result<WriteAck, TransportError>,
        reply: Reply<()>,
    },
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Handle to a running session controller.
///
/// Cheap to clone. When the last clone is dropped the controller tears
/// itself down, which disables the session server-side.
#[derive(Clone)]
pub struct SessionHandle {
    meeting_id: MeetingId,
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<SessionView>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn meeting_id(&self) -> MeetingId {
        self.meeting_id
    }

    /// The latest published view.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// A receiver that is notified whenever the view changes.
    pub fn watch(&self) -> watch::Receiver<SessionView> {
        self.view.clone()
    }

    /// Subscribes to session events from this point on.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Whether the controller task is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Turns the live session on or off server-side, then locally.
    ///
    /// Returns the state the backend reports holding, or `false` when an
    /// exit fired while the enable was in flight (the session is switched
    /// off again).
    pub async fn set_enabled(&self, enabled: bool) -> Result<bool, RollcallError> {
        self.call(|reply| Command::SetEnabled { enabled, reply }).await
    }

    /// Asks for a new token now, outside the countdown.
    ///
    /// A no-op while a request is already outstanding. This is also how a
    /// degraded session recovers.
    pub async fn force_refresh(&self) -> Result<(), RollcallError> {
        self.call(|reply| Command::ForceRefresh { reply }).await
    }

    /// Opens a confirmation for flipping one student's presence. Polling
    /// pauses until it is confirmed or cancelled.
    pub async fn request_toggle(
        &self,
        student: impl Into<StudentId>,
    ) -> Result<PendingToggle, RollcallError> {
        let student = student.into();
        self.call(|reply| Command::RequestToggle { student, reply }).await
    }

    /// Applies the open toggle and persists it.
    ///
    /// The new value is visible in the view immediately. If the backend
    /// does not persist it, the value is rolled back and this returns
    /// [`SessionError::WriteRejected`].
    pub async fn confirm_toggle(&self) -> Result<(), RollcallError> {
        self.call(|reply| Command::ConfirmToggle { reply }).await
    }

    /// Closes the open confirmation without writing anything.
    pub async fn cancel_toggle(&self) -> Result<PendingToggle, RollcallError> {
        self.call(|reply| Command::CancelToggle { reply }).await
    }

    /// Reports a route change in the host application.
    pub async fn navigate(&self, from: &str, to: &str) -> Result<(), RollcallError> {
        self.send(Command::Navigate {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await
    }

    /// Reports that the page is unloading. The disable goes out as a
    /// detached request that is never awaited.
    pub async fn page_unload(&self) -> Result<(), RollcallError> {
        self.send(Command::PageUnload).await
    }

    /// Disables the session (if no other exit already did) and stops the
    /// controller.
    pub async fn teardown(&self) -> Result<(), RollcallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Teardown { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| self.unavailable())
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, RollcallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| self.unavailable())?
    }

    async fn send(&self, command: Command) -> Result<(), RollcallError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> RollcallError {
        RollcallError::ControllerUnavailable(self.meeting_id)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("meeting_id", &self.meeting_id)
            .field("running", &self.is_running())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Entry point for starting live session controllers.
pub struct SessionController;

impl SessionController {
    /// Creates a builder for `meeting_id`.
    pub fn builder(meeting_id: MeetingId) -> SessionControllerBuilder {
        SessionControllerBuilder::new(meeting_id)
    }

    /// Spawns a controller task and returns a handle to it.
    ///
    /// The session starts disabled; the attendance snapshot is loaded
    /// right away.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn<B: Backend>(
        config: ControllerConfig,
        backend: Arc<B>,
        clock: SharedClock,
    ) -> Result<SessionHandle, RollcallError> {
        let config = config.validated();
        let scan_base = ScanBase::parse(&config.scan_base)?;
        let meeting = config.meeting_id;

        let (command_tx, command_rx) = mpsc::channel(config.channel_size);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(SessionView::initial(meeting, &scan_base));
        let (events, _) = broadcast::channel(config.event_capacity);

        let actor = SessionActor {
            meeting,
            tokens: TokenMachine::new(meeting, scan_base),
            reconciler: Reconciler::new(),
            exit: ExitGuard::new(&config.session_path),
            countdown: paused_timer(config.countdown_period),
            poll: paused_timer(config.poll_interval),
            poll_in_flight: false,
            enabling: 0,
            backend,
            clock,
            commands: command_rx,
            completion_tx,
            completions: completion_rx,
            view: view_tx,
            events: events.clone(),
            config,
        };

        tokio::spawn(actor.run());

        Ok(SessionHandle {
            meeting_id: meeting,
            commands: command_tx,
            view: view_rx,
            events,
        })
    }
}

fn paused_timer(period: std::time::Duration) -> TickScheduler {
    TickScheduler::new(TickConfig {
        period,
        start_paused: true,
        ..TickConfig::default()
    })
}

// ---------------------------------------------------------------------------
// SessionActor
// ---------------------------------------------------------------------------

/// The internal controller state. Runs inside a Tokio task.
struct SessionActor<B: Backend> {
    meeting: MeetingId,
    config: ControllerConfig,
    backend: Arc<B>,
    clock: SharedClock,

    tokens: TokenMachine,
    reconciler: Reconciler,
    exit: ExitGuard,

    countdown: TickScheduler,
    poll: TickScheduler,
    /// Covers the initial load and periodic polls, not settle re-fetches.
    poll_in_flight: bool,
    /// Enable requests sent but not yet answered.
    enabling: usize,

    commands: mpsc::Receiver<Command>,
    completion_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    view: watch::Sender<SessionView>,
    events: broadcast::Sender<SessionEvent>,
}

impl<B: Backend> SessionActor<B> {
    /// Runs the actor loop until teardown.
    async fn run(mut self) {
        tracing::info!(meeting_id = %self.meeting, "session controller started");
        self.fetch_attendance(MergeMode::Initial);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    let Some(cmd) = cmd else {
                        tracing::debug!(meeting_id = %self.meeting, "all handles dropped");
                        self.teardown();
                        break;
                    };
                    if self.handle_command(cmd).is_break() {
                        break;
                    }
                }
                Some(done) = self.completions.recv() => self.handle_completion(done),
                _ = self.countdown.wait_for_tick() => self.on_countdown_tick(),
                _ = self.poll.wait_for_tick() => self.on_poll_tick(),
            }
            self.publish();
        }

        tracing::info!(meeting_id = %self.meeting, "session controller stopped");
    }

    fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Live locally, or about to be once an enable request lands.
    fn is_live(&self) -> bool {
        self.tokens.is_enabled() || self.enabling > 0
    }

    // -- Commands -------------------------------------------------------------

    fn handle_command(&mut self, cmd: Command) -> ControlFlow<()> {
        match cmd {
            Command::SetEnabled { enabled, reply } => self.request_enabled(enabled, reply),
            Command::ForceRefresh { reply } => {
                let _ = reply.send(self.force_refresh());
            }
            Command::RequestToggle { student, reply } => {
                let _ = reply.send(self.reconciler.request_toggle(student).map_err(Into::into));
            }
            Command::ConfirmToggle { reply } => self.confirm_toggle(reply),
            Command::CancelToggle { reply } => {
                let _ = reply.send(self.reconciler.cancel_toggle().map_err(Into::into));
            }
            Command::Navigate { from, to } => {
                let now = self.now();
                if let Some(trigger) =
                    self.exit.on_navigation(&from, &to, self.is_live(), now)
                {
                    self.exit_session(trigger);
                }
            }
            Command::PageUnload => {
                let now = self.now();
                if let Some(trigger) = self.exit.on_unload(self.is_live(), now) {
                    self.exit_session(trigger);
                }
            }
            Command::Teardown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn request_enabled(&mut self, enabled: bool, reply: Reply<bool>) {
        if enabled {
            self.enabling += 1;
        }
        let departures = self.exit.departures();
        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();
        let meeting = self.meeting;
        tokio::spawn(async move {
            let result = backend.set_enabled(meeting, enabled).await;
            let went_live = matches!(&result, Ok(response) if response.enabled);
            let done = Completion::Toggle {
                requested: enabled,
                departures,
                result,
                reply,
            };
            // The controller is gone; nobody else will switch the session off.
            if tx.send(done).is_err() && went_live {
                tracing::info!(meeting_id = %meeting, "enable landed after teardown, disabling");
                if let Err(e) = backend.set_enabled(meeting, false).await {
                    tracing::debug!(meeting_id = %meeting, error = %e, "exit disable failed");
                }
            }
        });
    }

    fn force_refresh(&mut self) -> Result<(), RollcallError> {
        if !self.tokens.is_enabled() {
            return Err(SessionError::NotLive(self.meeting).into());
        }
        let effects = self.tokens.apply(TokenEvent::ForceRefresh, self.now());
        self.perform(effects);
        Ok(())
    }

    fn confirm_toggle(&mut self, reply: Reply<()>) {
        let write = match self.reconciler.confirm_toggle(self.now()) {
            Ok(write) => write,
            Err(e) => {
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        tracing::info!(
            meeting_id = %self.meeting,
            student = %write.student,
            present = write.present,
            "manual attendance change"
        );

        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();
        let meeting = self.meeting;
        tokio::spawn(async move {
            let request = AttendanceWrite {
                student_id: write.student.clone(),
                present: write.present,
            };
            let result = backend.write_attendance(meeting, request).await;
            let _ = tx.send(Completion::Write {
                write,
                result,
                reply,
            });
        });
    }

    // -- Exit paths -----------------------------------------------------------

    fn exit_session(&mut self, trigger: ExitTrigger) {
        tracing::info!(meeting_id = %self.meeting, %trigger, "leaving live session, disabling");
        let meeting = self.meeting;

        match trigger {
            ExitTrigger::Unload => {
                if let Err(e) = self.backend.disable_detached(meeting) {
                    tracing::debug!(meeting_id = %meeting, error = %e, "detached disable not sent");
                }
            }
            ExitTrigger::Navigation | ExitTrigger::Teardown => self.spawn_disable(),
        }

        self.disable();
        let _ = self.events.send(SessionEvent::SessionEnded { trigger });
    }

    fn spawn_disable(&self) {
        let backend = Arc::clone(&self.backend);
        let meeting = self.meeting;
        tokio::spawn(async move {
            if let Err(e) = backend.set_enabled(meeting, false).await {
                tracing::debug!(meeting_id = %meeting, error = %e, "exit disable failed");
            }
        });
    }

    fn teardown(&mut self) {
        let now = self.now();
        match self.exit.on_teardown(now) {
            Some(trigger) => self.exit_session(trigger),
            None => self.disable(),
        }
        self.publish();
    }

    // -- Timers ---------------------------------------------------------------

    fn on_countdown_tick(&mut self) {
        if !self.tokens.is_enabled() {
            return;
        }
        let effects = self.tokens.apply(TokenEvent::Tick, self.now());
        self.perform(effects);
    }

    fn on_poll_tick(&mut self) {
        if !self.tokens.is_enabled() {
            return;
        }
        if self.reconciler.is_blocked() {
            tracing::trace!(meeting_id = %self.meeting, "confirmation open, poll skipped");
            return;
        }
        if self.poll_in_flight {
            tracing::trace!(meeting_id = %self.meeting, "previous poll still running");
            return;
        }
        let mode = if self.reconciler.is_loaded() {
            MergeMode::Poll
        } else {
            MergeMode::Initial
        };
        self.fetch_attendance(mode);
    }

    fn enable(&mut self) {
        let effects = self.tokens.apply(TokenEvent::Enable, self.now());
        self.countdown.resume();
        self.poll.resume();
        self.perform(effects);
    }

    fn disable(&mut self) {
        let effects = self.tokens.apply(TokenEvent::Disable, self.now());
        self.countdown.pause();
        self.poll.pause();
        self.perform(effects);
    }

    // -- Backend calls --------------------------------------------------------

    fn perform(&mut self, effects: Vec<TokenEffect>) {
        for effect in effects {
            match effect {
                TokenEffect::Fetch { request, reason } => {
                    tracing::debug!(meeting_id = %self.meeting, request, ?reason, "requesting token");
                    let backend = Arc::clone(&self.backend);
                    let tx = self.completion_tx.clone();
                    let meeting = self.meeting;
                    tokio::spawn(async move {
                        let result = backend.fetch_token(meeting).await;
                        let _ = tx.send(Completion::Token { request, result });
                    });
                }
                TokenEffect::Publish(payload) => {
                    tracing::debug!(meeting_id = %self.meeting, url = %payload.url, "scan payload updated");
                }
                TokenEffect::TokenRotated { epoch } => {
                    let payload = self.tokens.payload().clone();
                    let _ = self.events.send(SessionEvent::TokenRotated { epoch, payload });
                }
            }
        }
    }

    fn fetch_attendance(&mut self, mode: MergeMode) {
        self.poll_in_flight = true;
        self.spawn_snapshot(mode, None);
    }

    fn spawn_snapshot(&self, mode: MergeMode, delay: Option<std::time::Duration>) {
        let backend = Arc::clone(&self.backend);
        let tx = self.completion_tx.clone();
        let meeting = self.meeting;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = backend.fetch_snapshot(meeting).await;
            let _ = tx.send(Completion::Snapshot { mode, result });
        });
    }

    // -- Completions ----------------------------------------------------------

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Token { request, result } => {
                let event = match self.resolve_token(result) {
                    Ok((token, expires_at_ms)) => TokenEvent::Acquired {
                        request,
                        token,
                        expires_at_ms,
                    },
                    Err(e) => {
                        tracing::warn!(meeting_id = %self.meeting, request, error = %e, "token acquisition failed");
                        TokenEvent::AcquireFailed { request }
                    }
                };
                let effects = self.tokens.apply(event, self.now());
                self.perform(effects);
            }
            Completion::Toggle {
                requested,
                departures,
                result,
                reply,
            } => self.on_toggle(requested, departures, result, reply),
            Completion::Snapshot { mode, result } => self.on_snapshot(mode, result),
            Completion::Write {
                write,
                result,
                reply,
            } => self.on_write(write, result, reply),
        }
    }

    fn on_toggle(
        &mut self,
        requested: bool,
        departures: u64,
        result: Result<ToggleResponse, TransportError>,
        reply: Reply<bool>,
    ) {
        if requested {
            self.enabling = self.enabling.saturating_sub(1);
        }
        match result {
            Ok(response) if response.enabled && departures != self.exit.departures() => {
                tracing::info!(meeting_id = %self.meeting, "enable landed after leaving, disabling again");
                self.spawn_disable();
                let _ = reply.send(Ok(false));
            }
            Ok(response) => {
                if response.enabled {
                    self.enable();
                } else {
                    self.disable();
                }
                tracing::info!(meeting_id = %self.meeting, enabled = response.enabled, "session toggled");
                let _ = reply.send(Ok(response.enabled));
            }
            Err(e) => {
                tracing::warn!(meeting_id = %self.meeting, error = %e, "session toggle failed");
                let _ = reply.send(Err(e.into()));
            }
        }
    }

    fn resolve_token(
        &self,
        result: Result<TokenResponse, TransportError>,
    ) -> Result<(String, i64), RollcallError> {
        let response = result?;
        let expires_at_ms = resolve_expiry(&response, self.config.expiry_policy)?;
        Ok((response.token, expires_at_ms))
    }

    fn on_snapshot(&mut self, mode: MergeMode, result: Result<AttendanceSnapshot, TransportError>) {
        if !matches!(mode, MergeMode::Confirm { .. }) {
            self.poll_in_flight = false;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!(meeting_id = %self.meeting, ?mode, error = %e, "attendance fetch failed, skipping");
                return;
            }
        };
        if mode == MergeMode::Poll && !self.tokens.is_enabled() {
            return;
        }

        match self.reconciler.merge(snapshot.into_presence(), mode, self.now()) {
            MergeOutcome::Applied(diff) => {
                tracing::debug!(
                    meeting_id = %self.meeting,
                    added = diff.added.len(),
                    changed = diff.changed.len(),
                    removed = diff.removed.len(),
                    "attendance merged"
                );
                let _ = self.events.send(SessionEvent::AttendanceChanged(diff));
            }
            MergeOutcome::Unchanged | MergeOutcome::Suppressed { .. } => {}
        }
    }

    fn on_write(
        &mut self,
        write: OptimisticWrite,
        result: Result<WriteAck, TransportError>,
        reply: Reply<()>,
    ) {
        let failure = match result {
            Ok(ack) if ack.success => None,
            Ok(ack) => Some(ack.message.unwrap_or_else(|| "rejected by backend".to_string())),
            Err(e) => Some(e.to_string()),
        };

        let Some(reason) = failure else {
            let mode = MergeMode::Confirm {
                student: write.student,
                present: write.present,
            };
            self.spawn_snapshot(mode, Some(SETTLE_DELAY));
            let _ = reply.send(Ok(()));
            return;
        };

        let restored = self.reconciler.rollback(&write);
        tracing::warn!(
            meeting_id = %self.meeting,
            student = %write.student,
            %reason,
            restored,
            "attendance write failed"
        );
        let _ = self.events.send(SessionEvent::WriteFailed {
            student: write.student.clone(),
            reason: reason.clone(),
        });
        let _ = reply.send(Err(SessionError::WriteRejected {
            student: write.student,
            reason,
        }
        .into()));
    }

    // -- Presentation ---------------------------------------------------------

    fn publish(&self) {
        let next = self.snapshot_view();
        self.view.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn snapshot_view(&self) -> SessionView {
        let now = self.now();
        SessionView {
            meeting_id: self.meeting,
            enabled: self.tokens.is_enabled(),
            phase: self.tokens.phase().kind(),
            token: self.tokens.current_token().map(str::to_owned),
            expires_at_ms: self.tokens.expires_at_ms(),
            time_remaining: self.tokens.time_remaining(now),
            is_fetching: self.tokens.is_fetching(),
            payload: self.tokens.payload().clone(),
            attendance: self.reconciler.records().clone(),
            pending: self.reconciler.pending().cloned(),
            epoch: self.tokens.epoch(),
        }
    }
}
