use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::IndexedRandom;
use rollcall::prelude::*;
use tokio::sync::broadcast::error::RecvError;

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

const MEETING: MeetingId = MeetingId(1);
const ROSTER: [&str; 8] = ["ada", "bo", "cai", "dev", "eli", "fay", "gus", "hal"];
const CLASS_SECONDS: u64 = 25;

/// Prints what a projector screen would show.
async fn presenter(session: SessionHandle) {
    let mut events = session.events();
    loop {
        match events.recv().await {
            Ok(SessionEvent::TokenRotated { epoch, payload }) => {
                eprintln!("\n== token #{epoch} ==\n{}", payload.url);
                match payload.to_terminal() {
                    Ok(qr) => eprintln!("{qr}"),
                    Err(e) => eprintln!("(qr unavailable: {e})"),
                }
            }
            Ok(SessionEvent::AttendanceChanged(diff)) => {
                let view = session.view();
                eprintln!(
                    "attendance: {}/{} present ({} changed)",
                    view.present_count(),
                    view.attendance.len(),
                    diff.len()
                );
            }
            Ok(SessionEvent::WriteFailed { student, reason }) => {
                eprintln!("could not save {student}: {reason}");
            }
            Ok(SessionEvent::SessionEnded { trigger }) => {
                eprintln!("session ended ({trigger})");
            }
            Err(RecvError::Lagged(n)) => eprintln!("presenter skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// One random absent student scans whatever token is on screen.
fn student_scans(backend: &MemoryBackend, view: &SessionView) {
    let Some(token) = view.token.as_deref() else {
        return;
    };
    let absent: Vec<&str> = ROSTER
        .iter()
        .copied()
        .filter(|s| view.attendance.get(&StudentId::from(*s)) != Some(&true))
        .collect();

    let mut rng = rand::rng();
    if !rng.random_bool(0.6) {
        return;
    }
    if let Some(student) = absent.choose(&mut rng) {
        match backend.scan(MEETING, *student, token) {
            Ok(()) => eprintln!("{student} scanned"),
            Err(e) => eprintln!("{student} scan rejected: {e}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rollcall::init_tracing();

    let clock: SharedClock = Arc::new(SystemClock::new());
    let backend = Arc::new(MemoryBackend::new(
        MemoryConfig {
            token_ttl: Duration::from_secs(10),
            ..MemoryConfig::default()
        },
        Arc::clone(&clock),
    ));
    backend.enroll(MEETING, ROSTER);

    let session = SessionController::builder(MEETING)
        .scan_base("https://portal.example.edu/")
        .session_path("/live")
        .clock(clock)
        .spawn(Arc::clone(&backend))?;
    tokio::spawn(presenter(session.clone()));

    eprintln!("starting live session for {MEETING}");
    session.set_enabled(true).await?;

    for second in 1..=CLASS_SECONDS {
        tokio::time::sleep(Duration::from_secs(1)).await;
        student_scans(&backend, &session.view());

        // Halfway through, the instructor marks someone in by hand.
        if second == CLASS_SECONDS / 2 {
            let pending = session.request_toggle("hal").await?;
            eprintln!("instructor marks hal: {} -> {}", pending.current, pending.proposed);
            if let Err(e) = session.confirm_toggle().await {
                eprintln!("manual mark failed: {e}");
            }
        }
    }

    session.navigate("/live", "/dashboard").await?;
    session.teardown().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let roster = backend.presence(MEETING);
    let present = roster.values().filter(|p| **p).count();
    eprintln!("\nclass over: {present}/{} present", roster.len());
    for (student, here) in &roster {
        eprintln!("  {student:<4} {}", if *here { "present" } else { "absent" });
    }
    Ok(())
}
