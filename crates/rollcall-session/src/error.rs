//! Error types for the session layer.

use rollcall_protocol::{MeetingId, StudentId};

/// Errors surfaced by session operations.
///
/// Background paths (polling, countdown refresh, exit-disable) never
/// produce these; they log and carry on. Only deliberate user actions
/// do.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `confirm`/`cancel` was called with no confirmation open.
    #[error("no attendance change is awaiting confirmation")]
    NoPendingConfirmation,

    /// A confirmation is already open; it must be confirmed or cancelled
    /// before another student can be toggled.
    #[error("a change for {0} is already awaiting confirmation")]
    ConfirmationOpen(StudentId),

    /// The backend did not persist a manual write. The optimistic value
    /// has been rolled back.
    #[error("attendance write for {student} failed: {reason}")]
    WriteRejected { student: StudentId, reason: String },

    /// The operation needs a live session.
    #[error("session {0} is not live")]
    NotLive(MeetingId),
}
