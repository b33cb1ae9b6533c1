//! Epoch-millisecond clocks.
//!
//! Token expiries are absolute epoch milliseconds, but the countdown must
//! not jump when the wall clock is adjusted. [`SystemClock`] reads the
//! wall clock once and advances from the runtime's monotonic instant
//! afterwards. Under `tokio::time::pause()` it follows virtual time, which
//! keeps timer tests deterministic.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of "now" in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

/// A clock shared between the session actor and its collaborators.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock anchored, monotonically advancing clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    anchor: Instant,
    anchor_ms: i64,
}

impl SystemClock {
    /// Anchors to the current wall-clock time.
    pub fn new() -> Self {
        let anchor_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Self::anchored_at(anchor_ms)
    }

    /// Anchors "now" to an explicit epoch-millisecond value.
    pub fn anchored_at(anchor_ms: i64) -> Self {
        Self {
            anchor: Instant::now(),
            anchor_ms,
        }
    }

    /// Convenience for building a [`SharedClock`].
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as i64
    }
}
