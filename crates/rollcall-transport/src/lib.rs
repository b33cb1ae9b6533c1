//! Backend abstraction for Rollcall.
//!
//! The session actor never talks HTTP directly. It talks to a
//! [`Backend`]: four request/response calls matching the REST contract,
//! plus one detached "disable" used while the page is unloading.
//!
//! # Implementations
//!
//! - [`HttpBackend`] (feature `http`, default): `reqwest` against the
//!   real REST endpoints.
//! - [`MemoryBackend`]: an in-process backend with a roster, rotating
//!   tokens, simulated scans, and latency/failure injection. Used by the
//!   test suites and the classroom demo.

mod error;
#[cfg(feature = "http")]
mod http;
mod memory;

pub use error::TransportError;
#[cfg(feature = "http")]
pub use http::HttpBackend;
pub use memory::{Endpoint, MemoryBackend, MemoryConfig, ScanRejected};

use std::future::Future;

use rollcall_protocol::{
    AttendanceSnapshot, AttendanceWrite, MeetingId, ToggleResponse, TokenResponse, WriteAck,
};

/// The backend contract the session actor depends on.
///
/// Every async method returns a `Send` future so calls can run in
/// spawned tasks while the actor keeps servicing timers and commands.
/// Implementors may simply write `async fn` in their `impl` block.
pub trait Backend: Send + Sync + 'static {
    /// `GET /session-token`: issue a fresh token, superseding the previous one.
    fn fetch_token(
        &self,
        meeting: MeetingId,
    ) -> impl Future<Output = Result<TokenResponse, TransportError>> + Send;

    /// `PUT /session-toggle`: set the live state; returns the state the server holds.
    fn set_enabled(
        &self,
        meeting: MeetingId,
        enabled: bool,
    ) -> impl Future<Output = Result<ToggleResponse, TransportError>> + Send;

    /// `GET /attendance-snapshot`: current attendance for every student.
    fn fetch_snapshot(
        &self,
        meeting: MeetingId,
    ) -> impl Future<Output = Result<AttendanceSnapshot, TransportError>> + Send;

    /// `POST /attendance-write`: persist one student's presence.
    fn write_attendance(
        &self,
        meeting: MeetingId,
        write: AttendanceWrite,
    ) -> impl Future<Output = Result<WriteAck, TransportError>> + Send;

    /// Fire-and-forget disable for page unload.
    ///
    /// Must not be awaited by the caller: the request is handed off
    /// (with a keep-alive hint where the transport supports it) and this
    /// returns immediately. An `Err` means the request could not even be
    /// handed off; the session token then simply expires on its own.
    fn disable_detached(&self, meeting: MeetingId) -> Result<(), TransportError>;
}
