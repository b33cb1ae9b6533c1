//! Integration tests for the session controller against the in-memory
//! backend, under paused Tokio time.

use std::sync::Arc;
use std::time::Duration;

use rollcall::prelude::*;
use rollcall::transport::Endpoint;
use tokio::sync::broadcast;
use tokio::time::{Instant, sleep, sleep_until};

// =========================================================================
// Test rig
// =========================================================================

const M: MeetingId = MeetingId(101);

struct Rig {
    backend: Arc<MemoryBackend>,
    session: SessionHandle,
    start: Instant,
}

impl Rig {
    /// Sleeps until `ms` after the rig was created.
    async fn at(&self, ms: u64) {
        sleep_until(self.start + Duration::from_millis(ms)).await;
    }

    fn presence(&self, student: &str) -> Option<bool> {
        self.session
            .view()
            .attendance
            .get(&StudentId::from(student))
            .copied()
    }
}

fn rig_with(
    config: MemoryConfig,
    customize: impl FnOnce(SessionControllerBuilder) -> SessionControllerBuilder,
) -> Rig {
    let clock = Arc::new(SystemClock::anchored_at(1_700_000_000_000));
    let backend = Arc::new(MemoryBackend::new(config, clock.clone()));
    backend.enroll(M, ["ana", "ben", "cy"]);

    let builder = SessionController::builder(M)
        .scan_base("https://portal.example.edu/")
        .session_path("/live")
        .clock(clock);
    let session = customize(builder)
        .spawn(Arc::clone(&backend))
        .expect("controller should start");

    Rig {
        backend,
        session,
        start: Instant::now(),
    }
}

fn rig() -> Rig {
    rig_with(MemoryConfig::default(), |b| b)
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =========================================================================
// Token rotation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_countdown_refreshes_once_at_expiry() {
    let rig = rig();
    rig.backend.set_latency(Endpoint::Token, Duration::from_millis(200));
    let mut events = rig.session.events();

    assert!(rig.session.set_enabled(true).await.unwrap());

    rig.at(29_100).await;
    let view = rig.session.view();
    assert_eq!(view.phase, PhaseKind::Active);
    assert_eq!(view.time_remaining, 1);
    assert_eq!(rig.backend.calls(Endpoint::Token), 1);
    let first = view.token.expect("token should be shown");

    rig.at(30_100).await;
    let view = rig.session.view();
    assert_eq!(view.time_remaining, 0);
    assert_eq!(view.phase, PhaseKind::RefreshPending);
    assert_eq!(view.token.as_deref(), Some(first.as_str()));
    assert_eq!(rig.backend.calls(Endpoint::Token), 2);

    rig.at(30_300).await;
    let view = rig.session.view();
    assert_eq!(view.phase, PhaseKind::Active);
    assert_eq!(view.epoch, 2);
    assert_eq!(view.time_remaining, 29);
    assert_ne!(view.token.as_deref(), Some(first.as_str()));
    assert_eq!(view.token, rig.backend.current_token(M));
    assert_eq!(rig.backend.max_concurrent_token_requests(), 1);

    let rotations: Vec<u64> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::TokenRotated { epoch, .. } => Some(epoch),
            _ => None,
        })
        .collect();
    assert_eq!(rotations, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_never_overlaps_token_requests() {
    let rig = rig();
    // Slower than the whole token lifetime.
    rig.backend.set_latency(Endpoint::Token, Duration::from_secs(45));

    rig.session.set_enabled(true).await.unwrap();
    for _ in 0..5 {
        rig.session.force_refresh().await.unwrap();
    }

    rig.at(200_000).await;
    assert_eq!(rig.backend.max_concurrent_token_requests(), 1);
    assert!(rig.session.view().epoch >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_payload_embeds_current_token() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(10).await;

    let view = rig.session.view();
    let token = view.token.clone().unwrap();
    assert_eq!(
        view.payload.url,
        format!("https://portal.example.edu/attendance/scan?meeting=101&token={token}")
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_timestamp_degrades_under_strict_policy() {
    let rig = rig_with(
        MemoryConfig {
            include_timestamp: false,
            ..MemoryConfig::default()
        },
        |b| b,
    );
    rig.session.set_enabled(true).await.unwrap();
    rig.at(10).await;

    let view = rig.session.view();
    assert_eq!(view.phase, PhaseKind::Degraded);
    assert!(view.payload.token.is_none());
    assert_eq!(view.expires_at_ms, 0);
    assert_eq!(view.time_remaining, 0);

    // No spurious refreshes while degraded.
    rig.at(90_000).await;
    assert_eq!(rig.backend.calls(Endpoint::Token), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lenient_policy_reads_formatted_expiry() {
    let rig = rig_with(
        MemoryConfig {
            include_timestamp: false,
            ..MemoryConfig::default()
        },
        |b| b.expiry_policy(ExpiryPolicy::Lenient {
            utc_offset_minutes: 0,
        }),
    );
    rig.session.set_enabled(true).await.unwrap();
    rig.at(10).await;

    let view = rig.session.view();
    assert_eq!(view.phase, PhaseKind::Active);
    assert_eq!(view.expires_at_ms, 1_700_000_030_000);
    assert_eq!(view.time_remaining, 30);
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_recovers_from_failure() {
    let rig = rig();
    rig.backend.set_failing(Endpoint::Token, true);
    rig.session.set_enabled(true).await.unwrap();
    rig.at(10).await;
    assert_eq!(rig.session.view().phase, PhaseKind::Degraded);

    rig.backend.set_failing(Endpoint::Token, false);
    rig.session.force_refresh().await.unwrap();
    rig.at(20).await;

    let view = rig.session.view();
    assert_eq!(view.phase, PhaseKind::Active);
    assert!(view.token.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_force_refresh_while_disabled_fails() {
    let rig = rig();
    let err = rig.session.force_refresh().await.unwrap_err();
    assert!(matches!(
        err,
        RollcallError::Session(SessionError::NotLive(M))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disable_stops_countdown() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(5_000).await;

    assert!(!rig.session.set_enabled(false).await.unwrap());
    let view = rig.session.view();
    assert!(!view.enabled);
    assert_eq!(view.phase, PhaseKind::Idle);
    assert_eq!(view.time_remaining, 0);
    assert!(view.payload.token.is_none());

    rig.at(120_000).await;
    assert_eq!(rig.backend.calls(Endpoint::Token), 1);
}

#[tokio::test(start_paused = true)]
async fn test_toggle_failure_leaves_session_disabled() {
    let rig = rig();
    rig.backend.set_failing(Endpoint::Toggle, true);

    let err = rig.session.set_enabled(true).await.unwrap_err();
    assert!(matches!(err, RollcallError::Transport(_)));
    assert!(!rig.session.view().enabled);
    assert_eq!(rig.backend.calls(Endpoint::Token), 0);
}

// =========================================================================
// Attendance reconciliation
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_initial_load_populates_attendance() {
    let rig = rig();
    rig.at(10).await;

    let view = rig.session.view();
    assert_eq!(view.attendance.len(), 3);
    assert_eq!(view.present_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_merges_remote_scan() {
    let rig = rig();
    let mut events = rig.session.events();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(100).await;

    let token = rig.session.view().token.unwrap();
    rig.backend.scan(M, "ana", &token).unwrap();
    assert_eq!(rig.presence("ana"), Some(false));

    rig.at(2_100).await;
    assert_eq!(rig.presence("ana"), Some(true));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::AttendanceChanged(diff) if diff.changed == vec![StudentId::from("ana")]
    )));
}

#[tokio::test(start_paused = true)]
async fn test_manual_toggle_applies_and_persists() {
    let rig = rig();
    rig.at(10).await;

    let pending = rig.session.request_toggle("ben").await.unwrap();
    assert!(!pending.current);
    assert!(pending.proposed);
    assert_eq!(rig.session.view().pending, Some(pending));

    rig.session.confirm_toggle().await.unwrap();
    assert_eq!(rig.presence("ben"), Some(true));
    assert_eq!(rig.session.view().pending, None);
    assert_eq!(rig.backend.presence(M).get(&StudentId::from("ben")), Some(&true));

    // The settle re-fetch follows half a second later.
    let loads = rig.backend.calls(Endpoint::Snapshot);
    rig.at(400).await;
    assert_eq!(rig.backend.calls(Endpoint::Snapshot), loads);
    rig.at(700).await;
    assert_eq!(rig.backend.calls(Endpoint::Snapshot), loads + 1);
    assert_eq!(rig.presence("ben"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_manual_toggle_rolls_back_on_write_failure() {
    let rig = rig();
    let mut events = rig.session.events();
    rig.at(10).await;
    rig.backend.set_failing(Endpoint::Write, true);

    rig.session.request_toggle("cy").await.unwrap();
    let err = rig.session.confirm_toggle().await.unwrap_err();

    assert!(matches!(
        err,
        RollcallError::Session(SessionError::WriteRejected { .. })
    ));
    assert_eq!(rig.presence("cy"), Some(false));
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        SessionEvent::WriteFailed { student, .. } if *student == StudentId::from("cy")
    )));
}

#[tokio::test(start_paused = true)]
async fn test_manual_toggle_rejected_by_backend_rolls_back() {
    let rig = rig();
    rig.at(10).await;

    // No record on either side: the backend acknowledges with success=false.
    rig.session.request_toggle("eve").await.unwrap();
    let err = rig.session.confirm_toggle().await.unwrap_err();
    assert!(err.to_string().contains("not enrolled"));
    assert_eq!(rig.presence("eve"), None);
}

#[tokio::test(start_paused = true)]
async fn test_poll_suppressed_after_manual_write() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(100).await;

    rig.session.request_toggle("ana").await.unwrap();
    rig.session.confirm_toggle().await.unwrap();

    // Another device reverts the record right after the settle re-fetch.
    rig.at(700).await;
    rig.backend.mark(M, "ana", false);

    // Poll at 2000 is inside the window (write at 100, window until 3100).
    rig.at(2_100).await;
    assert_eq!(rig.presence("ana"), Some(true));

    // Poll at 4000 is outside it.
    rig.at(4_100).await;
    assert_eq!(rig.presence("ana"), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_pending_confirmation_pauses_polling() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(100).await;
    let initial_loads = rig.backend.calls(Endpoint::Snapshot);

    rig.session.request_toggle("ana").await.unwrap();
    rig.at(4_500).await;
    assert_eq!(rig.backend.calls(Endpoint::Snapshot), initial_loads);

    rig.session.cancel_toggle().await.unwrap();
    rig.at(6_100).await;
    assert_eq!(rig.backend.calls(Endpoint::Snapshot), initial_loads + 1);
    assert_eq!(rig.presence("ana"), Some(false));
}

#[tokio::test(start_paused = true)]
async fn test_second_request_while_confirmation_open_is_rejected() {
    let rig = rig();
    rig.session.request_toggle("ana").await.unwrap();

    let err = rig.session.request_toggle("ben").await.unwrap_err();
    assert!(matches!(
        err,
        RollcallError::Session(SessionError::ConfirmationOpen(_))
    ));
    assert!(matches!(
        rig.session.confirm_toggle().await,
        Ok(())
    ));
    assert!(matches!(
        rig.session.cancel_toggle().await,
        Err(RollcallError::Session(SessionError::NoPendingConfirmation))
    ));
}

// =========================================================================
// Exit paths
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_all_exit_paths_disable_once() {
    let rig = rig();
    let mut events = rig.session.events();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(100).await;
    let toggles_before = rig.backend.calls(Endpoint::Toggle);

    rig.session.navigate("/live", "/dashboard").await.unwrap();
    rig.session.page_unload().await.unwrap();
    rig.session.teardown().await.unwrap();
    rig.at(200).await;

    let disables =
        rig.backend.calls(Endpoint::Toggle) - toggles_before + rig.backend.detached_disables();
    assert_eq!(disables, 1);
    assert!(!rig.backend.is_enabled(M));

    let ended: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::SessionEnded { .. }))
        .collect();
    assert_eq!(
        ended,
        vec![SessionEvent::SessionEnded {
            trigger: ExitTrigger::Navigation
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unload_uses_detached_disable() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.at(100).await;
    let toggles_before = rig.backend.calls(Endpoint::Toggle);

    rig.session.page_unload().await.unwrap();
    rig.session.teardown().await.unwrap();
    rig.at(200).await;

    assert_eq!(rig.backend.detached_disables(), 1);
    assert_eq!(rig.backend.calls(Endpoint::Toggle), toggles_before);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_during_enable_keeps_session_off() {
    let rig = rig();
    rig.backend.set_latency(Endpoint::Toggle, Duration::from_millis(300));
    let mut events = rig.session.events();

    let enabling = tokio::spawn({
        let session = rig.session.clone();
        async move { session.set_enabled(true).await }
    });
    rig.at(50).await;
    rig.session.navigate("/live", "/home").await.unwrap();
    rig.session.page_unload().await.unwrap();
    rig.at(5_000).await;

    assert!(!enabling.await.unwrap().unwrap());
    assert!(!rig.backend.is_enabled(M));
    let view = rig.session.view();
    assert!(!view.enabled);
    assert_eq!(view.phase, PhaseKind::Idle);
    assert_eq!(rig.backend.calls(Endpoint::Token), 0);
    assert_eq!(rig.backend.detached_disables(), 0);

    let ended: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::SessionEnded { .. }))
        .collect();
    assert_eq!(
        ended,
        vec![SessionEvent::SessionEnded {
            trigger: ExitTrigger::Navigation
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unload_during_enable_keeps_session_off() {
    let rig = rig();
    rig.backend.set_latency(Endpoint::Toggle, Duration::from_millis(300));

    let enabling = tokio::spawn({
        let session = rig.session.clone();
        async move { session.set_enabled(true).await }
    });
    rig.at(50).await;
    rig.session.page_unload().await.unwrap();
    rig.at(5_000).await;

    assert_eq!(rig.backend.detached_disables(), 1);
    assert!(!enabling.await.unwrap().unwrap());
    assert!(!rig.backend.is_enabled(M));
    assert!(!rig.session.view().enabled);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_during_enable_keeps_session_off() {
    let rig = rig();
    rig.backend.set_latency(Endpoint::Toggle, Duration::from_millis(300));

    let enabling = tokio::spawn({
        let session = rig.session.clone();
        async move { session.set_enabled(true).await }
    });
    rig.at(50).await;
    rig.session.teardown().await.unwrap();
    rig.at(5_000).await;

    assert!(matches!(
        enabling.await.unwrap(),
        Err(RollcallError::ControllerUnavailable(M))
    ));
    assert!(!rig.backend.is_enabled(M));
}

#[tokio::test(start_paused = true)]
async fn test_enable_after_leaving_goes_live() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.session.navigate("/live", "/home").await.unwrap();
    rig.at(100).await;

    assert!(rig.session.set_enabled(true).await.unwrap());
    rig.at(200).await;
    assert!(rig.session.view().enabled);
    assert!(rig.backend.is_enabled(M));
}

#[tokio::test(start_paused = true)]
async fn test_navigation_within_session_does_not_disable() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();

    rig.session.navigate("/live", "/live/roster?sort=name").await.unwrap();
    rig.at(100).await;
    assert!(rig.session.view().enabled);
    assert!(rig.backend.is_enabled(M));
}

#[tokio::test(start_paused = true)]
async fn test_guard_rearms_after_release() {
    let rig = rig();
    rig.session.set_enabled(true).await.unwrap();
    rig.session.navigate("/live", "/home").await.unwrap();
    rig.at(100).await;
    let after_first = rig.backend.calls(Endpoint::Toggle);
    assert!(!rig.session.view().enabled);

    rig.at(1_500).await;
    rig.session.set_enabled(true).await.unwrap();
    rig.session.navigate("/live", "/home").await.unwrap();
    rig.at(1_600).await;

    // One enable and one exit-disable.
    assert_eq!(rig.backend.calls(Endpoint::Toggle), after_first + 2);
    assert!(!rig.backend.is_enabled(M));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_tears_down() {
    let Rig { backend, session, .. } = rig();
    session.set_enabled(true).await.unwrap();
    let watcher = session.watch();
    assert!(backend.is_enabled(M));

    drop(session);
    sleep(Duration::from_millis(10)).await;

    assert!(!backend.is_enabled(M));
    assert!(!watcher.borrow().enabled);
}

#[tokio::test(start_paused = true)]
async fn test_handle_after_teardown_reports_unavailable() {
    let rig = rig();
    rig.session.teardown().await.unwrap();
    rig.at(10).await;

    assert!(!rig.session.is_running());
    assert!(matches!(
        rig.session.set_enabled(true).await,
        Err(RollcallError::ControllerUnavailable(M))
    ));
}
