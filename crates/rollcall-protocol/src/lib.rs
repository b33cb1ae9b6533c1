//! Wire protocol for Rollcall.
//!
//! This crate defines the "language" the attendance client and the
//! backend speak:
//!
//! - **Types** ([`TokenResponse`], [`AttendanceSnapshot`], [`AttendanceWrite`],
//!   etc.): the JSON bodies of the four REST endpoints.
//! - **Expiry** ([`ExpiryPolicy`], [`resolve_expiry`]): turning a token
//!   response into an absolute epoch-millisecond deadline.
//! - **Payload** ([`ScanBase`], [`ScanPayload`]): the URL students scan,
//!   and its QR rendering.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how bodies are converted
//!   to/from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer knows nothing about timers, polling, or HTTP. It
//! only knows what the messages look like.
//!
//! ```text
//! Transport (HTTP) → Protocol (typed bodies) → Session (state machines)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

mod codec;
mod error;
mod expiry;
mod payload;
mod types;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use expiry::{ExpiryPolicy, resolve_expiry};
pub use payload::{ScanBase, ScanPayload};
pub use types::{
    AttendanceEntry, AttendanceMap, AttendanceSnapshot, AttendanceWrite,
    MeetingId, StudentId, ToggleRequest, ToggleResponse, TokenResponse,
    WriteAck,
};
