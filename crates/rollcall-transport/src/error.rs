//! Error types for the transport layer.

use rollcall_protocol::ProtocolError;

/// Errors that can occur while talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The HTTP request could not be sent or its body not read
    /// (connection refused, timeout, TLS ...).
    #[cfg(feature = "http")]
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The body did not match the contract.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The configured backend URL cannot be used.
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),

    /// A detached request needs a running Tokio runtime to be handed to.
    #[error("no runtime available for detached request")]
    RuntimeUnavailable,

    /// The backend is unreachable (used by the in-memory backend's
    /// failure injection).
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}
