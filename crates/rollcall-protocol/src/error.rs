//! Error types for the protocol layer.
//!
//! Each crate in Rollcall defines its own error enum. When you see a
//! `ProtocolError`, the problem is in the shape of a message (or of a
//! URL or timestamp inside one), not in networking or session state.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: the backend returned an HTML error page, a field
    /// was renamed, or the body was truncated.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message is valid JSON but violates the contract.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The token response has no `expires_at_timestamp` and the active
    /// [`ExpiryPolicy`](crate::ExpiryPolicy) refuses to fall back to the
    /// formatted string.
    #[error("token response is missing expires_at_timestamp")]
    MissingTimestamp,

    /// The formatted `expires_at` string could not be parsed.
    #[error("unparsable expiry {0:?}")]
    InvalidTimestamp(String),

    /// The scan base URL cannot carry a path (e.g. `mailto:`).
    #[error("invalid scan url: {0}")]
    InvalidUrl(String),

    /// QR rendering failed, usually because the payload is too long.
    #[error("qr render failed: {0}")]
    Render(String),
}
