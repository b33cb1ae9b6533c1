//! Live attendance session state for Rollcall.
//!
//! Three independent pieces of state, each a plain synchronous type that
//! takes "now" as an argument and never performs I/O:
//!
//! 1. **Token rotation**: [`TokenMachine`], a reducer over
//!    [`TokenEvent`]s that emits [`TokenEffect`]s. It structurally
//!    enforces at most one outstanding token request and exactly one
//!    expiry-driven refresh per token epoch.
//! 2. **Reconciliation**: [`Reconciler`], merging polled snapshots into
//!    local attendance without clobbering a just-made manual edit.
//! 3. **Exit guarding**: [`ExitGuard`], making sure that whichever
//!    departure path fires first, the session is disabled once.
//!
//! # How it fits in the stack
//!
//! ```text
//! Controller (above)  ← owns one of each, drives timers and I/O
//!     ↕
//! Session Layer (this crate)  ← pure state machines
//!     ↕
//! Protocol / Tick (below)  ← wire types, payloads, countdown arithmetic
//! ```

mod error;
mod exit;
mod reconcile;
mod token;

pub use error::SessionError;
pub use exit::{EXIT_GUARD_RELEASE, ExitGuard, ExitTrigger};
pub use reconcile::{
    AttendanceDiff, MergeMode, MergeOutcome, OptimisticWrite, POLL_INTERVAL, PendingToggle,
    Reconciler, SETTLE_DELAY, SUPPRESS_WINDOW,
};
pub use token::{
    FetchReason, IssuedToken, PhaseKind, RequestId, TokenEffect, TokenEvent, TokenMachine,
    TokenPhase,
};
