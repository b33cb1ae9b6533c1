//! Codec trait and implementations for serializing/deserializing bodies.
//!
//! The backend speaks JSON today. Keeping the conversion behind a
//! [`Codec`] lets the transport stay format-agnostic: the HTTP backend
//! is generic over `C: Codec` and only ever sees bytes.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because the codec is stored inside backends
/// that are shared across spawned request tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;

    /// The `Content-Type` header value for encoded bodies.
    fn content_type(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ## Example
///
/// ```rust
/// use rollcall_protocol::{Codec, JsonCodec, ToggleRequest, ToggleResponse};
///
/// let codec = JsonCodec;
///
/// let bytes = codec.encode(&ToggleRequest { enabled: false }).unwrap();
/// assert_eq!(bytes, br#"{"enabled":false}"#);
///
/// let resp: ToggleResponse = codec.decode(br#"{"enabled":true}"#).unwrap();
/// assert!(resp.enabled);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
