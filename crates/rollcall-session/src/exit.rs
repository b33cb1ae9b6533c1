//! Guaranteeing the session is disabled when the instructor leaves.
//!
//! Three things can signal departure and they often arrive together: a
//! route change away from the session page, the controller being torn
//! down, and the page unloading. Whichever fires first claims the guard
//! and performs the disable; the others find it claimed and do nothing.
//! The claim is released after [`EXIT_GUARD_RELEASE`] so a session that
//! is enabled again later can be guarded again.

use std::fmt;
use std::time::Duration;

/// How long a claim holds before a new exit may fire.
pub const EXIT_GUARD_RELEASE: Duration = Duration::from_millis(1000);

const EXIT_GUARD_RELEASE_MS: i64 = EXIT_GUARD_RELEASE.as_millis() as i64;

/// The departure path that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitTrigger {
    Navigation,
    Teardown,
    Unload,
}

impl fmt::Display for ExitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExitTrigger::Navigation => "navigation",
            ExitTrigger::Teardown => "teardown",
            ExitTrigger::Unload => "unload",
        })
    }
}

/// One shared idempotency flag for every exit path.
#[derive(Debug, Clone)]
pub struct ExitGuard {
    session_path: String,
    claim: Option<(ExitTrigger, i64)>,
    departures: u64,
}

impl ExitGuard {
    /// A guard for the session page at `session_path` (e.g. `/live`).
    pub fn new(session_path: &str) -> Self {
        Self {
            session_path: normalize(session_path).to_owned(),
            claim: None,
            departures: 0,
        }
    }

    pub fn session_path(&self) -> &str {
        &self.session_path
    }

    /// Whether `route` is the session page or below it.
    ///
    /// Matching is by whole path segments, so `/live` covers `/live` and
    /// `/live/42` but not `/lively`. Query and fragment are ignored.
    pub fn is_session_route(&self, route: &str) -> bool {
        let route = normalize(route);
        if self.session_path == "/" {
            return true;
        }
        match route.strip_prefix(self.session_path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Handles a route change. Fires only when leaving the session page
    /// while the session is live.
    pub fn on_navigation(&mut self, from: &str, to: &str, enabled: bool, now_ms: i64) -> Option<ExitTrigger> {
        if !enabled || !self.is_session_route(from) || self.is_session_route(to) {
            return None;
        }
        self.try_claim(ExitTrigger::Navigation, now_ms)
    }

    /// Handles controller teardown. Fires whether or not the session
    /// looks live; the backend call is idempotent.
    pub fn on_teardown(&mut self, now_ms: i64) -> Option<ExitTrigger> {
        self.try_claim(ExitTrigger::Teardown, now_ms)
    }

    /// Handles a page unload while the session is live.
    pub fn on_unload(&mut self, enabled: bool, now_ms: i64) -> Option<ExitTrigger> {
        if !enabled {
            return None;
        }
        self.try_claim(ExitTrigger::Unload, now_ms)
    }

    /// Whether a claim is currently held at `now_ms`.
    pub fn is_pending(&self, now_ms: i64) -> bool {
        self.claim
            .is_some_and(|(_, at)| now_ms - at < EXIT_GUARD_RELEASE_MS)
    }

    /// How many exits have fired so far.
    ///
    /// A request started before a departure can compare the count it saw
    /// with the current one to learn that it has been overtaken.
    pub fn departures(&self) -> u64 {
        self.departures
    }

    /// The path that holds the claim, if any.
    pub fn claimed_by(&self, now_ms: i64) -> Option<ExitTrigger> {
        self.claim
            .filter(|_| self.is_pending(now_ms))
            .map(|(trigger, _)| trigger)
    }

    fn try_claim(&mut self, trigger: ExitTrigger, now_ms: i64) -> Option<ExitTrigger> {
        if let Some(holder) = self.claimed_by(now_ms) {
            tracing::debug!(%trigger, %holder, "exit already handled");
            return None;
        }
        self.claim = Some((trigger, now_ms));
        self.departures += 1;
        Some(trigger)
    }
}

/// Strips query, fragment, and a trailing slash.
fn normalize(route: &str) -> &str {
    let end = route.find(['?', '#']).unwrap_or(route.len());
    let path = route[..end].trim_end_matches('/');
    if path.is_empty() { "/" } else { path }
}
