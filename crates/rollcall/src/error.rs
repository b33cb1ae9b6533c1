//! Unified error type for Rollcall.

use rollcall_protocol::{MeetingId, ProtocolError};
use rollcall_session::SessionError;
use rollcall_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates a `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RollcallError {
    /// Talking to the backend failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Bad configuration or an unusable backend message.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session operation was refused.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The controller task is gone (torn down, or every handle dropped).
    #[error("session controller for {0} is not running")]
    ControllerUnavailable(MeetingId),
}
