//! What the presentation layer sees.

use rollcall_protocol::{AttendanceMap, MeetingId, ScanBase, ScanPayload, StudentId};
use rollcall_session::{AttendanceDiff, ExitTrigger, PendingToggle, PhaseKind};

/// A point-in-time picture of a live session.
///
/// Published through a `watch` channel after every change, so a UI can
/// render the latest one and ignore intermediate states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    pub meeting_id: MeetingId,
    pub enabled: bool,
    pub phase: PhaseKind,
    /// The token on display, if any.
    pub token: Option<String>,
    /// Absolute expiry in epoch ms; 0 when there is no token.
    pub expires_at_ms: i64,
    /// Whole seconds left on the countdown, never negative.
    pub time_remaining: u64,
    /// A token request is outstanding.
    pub is_fetching: bool,
    /// The scannable payload. Token-less while disabled or degraded.
    pub payload: ScanPayload,
    pub attendance: AttendanceMap,
    /// A toggle waiting for the user to confirm or cancel.
    pub pending: Option<PendingToggle>,
    pub epoch: u64,
}

impl SessionView {
    pub(crate) fn initial(meeting_id: MeetingId, scan_base: &ScanBase) -> Self {
        Self {
            meeting_id,
            enabled: false,
            phase: PhaseKind::Idle,
            token: None,
            expires_at_ms: 0,
            time_remaining: 0,
            is_fetching: false,
            payload: ScanPayload::build(scan_base, meeting_id, None),
            attendance: AttendanceMap::new(),
            pending: None,
            epoch: 0,
        }
    }

    /// Number of students marked present.
    pub fn present_count(&self) -> usize {
        self.attendance.values().filter(|present| **present).count()
    }
}

/// Something the presentation layer may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new token is on display.
    TokenRotated { epoch: u64, payload: ScanPayload },

    /// A merged snapshot changed local attendance.
    AttendanceChanged(AttendanceDiff),

    /// A manual write was not persisted and has been rolled back.
    WriteFailed { student: StudentId, reason: String },

    /// The session was disabled by an exit path.
    SessionEnded { trigger: ExitTrigger },
}
