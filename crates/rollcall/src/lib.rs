//! # Rollcall
//!
//! Live QR-attendance sessions.
//!
//! An instructor enables a session for a class meeting. Rollcall keeps a
//! short-lived token rotating inside a scannable code, counts down to
//! each rotation, polls the backend for students who scanned, and lets
//! the instructor correct individual records by hand without a poll
//! immediately undoing the correction. When the instructor leaves the page
//! by any route, the session is disabled server-side exactly once.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rollcall::prelude::*;
//!
//! # async fn start() -> Result<(), RollcallError> {
//! let session = SessionController::builder(MeetingId(7))
//!     .scan_base("https://portal.example.edu/")
//!     .spawn_http("https://portal.example.edu/api/")?;
//!
//! session.set_enabled(true).await?;
//! let view = session.view();
//! println!("{} ({}s left)", view.payload.url, view.time_remaining);
//! # Ok(())
//! # }
//! ```

mod builder;
mod config;
mod controller;
mod error;
mod view;

pub use builder::SessionControllerBuilder;
pub use config::ControllerConfig;
pub use controller::{SessionController, SessionHandle};
pub use error::RollcallError;
pub use view::{SessionEvent, SessionView};

pub use rollcall_protocol as protocol;
pub use rollcall_session as session;
pub use rollcall_tick as tick;
pub use rollcall_transport as transport;

use tracing_subscriber::EnvFilter;

/// Installs a `tracing` subscriber that prints to stderr.
///
/// The filter comes from `RUST_LOG`, falling back to `info`. Does nothing
/// if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Everything needed to run a session, in one import.
pub mod prelude {
    pub use crate::{
        ControllerConfig, RollcallError, SessionController, SessionControllerBuilder,
        SessionEvent, SessionHandle, SessionView,
    };
    pub use rollcall_protocol::{ExpiryPolicy, MeetingId, ScanPayload, StudentId};
    pub use rollcall_session::{ExitTrigger, PendingToggle, PhaseKind, SessionError};
    pub use rollcall_tick::{Clock, SharedClock, SystemClock};
    pub use rollcall_transport::{Backend, HttpBackend, MemoryBackend, MemoryConfig};
}
