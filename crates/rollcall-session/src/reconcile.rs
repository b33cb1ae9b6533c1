//! Merging polled attendance into local state.
//!
//! Two writers touch the same records: the instructor toggling a student by
//! hand, and students scanning the code (which the backend records). The
//! poll brings the backend's view back every [`POLL_INTERVAL`]. Right
//! after a manual toggle the backend may not have the write yet, so for
//! [`SUPPRESS_WINDOW`] polls are not allowed to overwrite local state.
//!
//! The manual path is two-step:
//!
//! ```text
//! request_toggle ──→ (confirmation open) ──confirm_toggle──→ optimistic write
//!                          │                                     │
//!                       cancel_toggle                   persist ok → settle re-fetch
//!                          ↓                            persist err → rollback
//!                     (nothing written)
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use rollcall_protocol::{AttendanceMap, StudentId};

use crate::SessionError;

/// Polls cannot overwrite local state this long after a manual write.
pub const SUPPRESS_WINDOW: Duration = Duration::from_millis(3000);

/// Delay between a persisted manual write and its confirming re-fetch.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Cadence of the attendance poll.
pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);

const SUPPRESS_WINDOW_MS: i64 = SUPPRESS_WINDOW.as_millis() as i64;

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// A value-level comparison of two attendance maps.
///
/// Two maps with the same keys and the same `present` values produce an
/// empty diff, however they were built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceDiff {
    /// In the remote map only.
    pub added: Vec<StudentId>,
    /// In both, with a different value.
    pub changed: Vec<StudentId>,
    /// In the local map only.
    pub removed: Vec<StudentId>,
}

impl AttendanceDiff {
    /// What would change if `local` were replaced by `remote`.
    pub fn between(local: &AttendanceMap, remote: &AttendanceMap) -> Self {
        let mut diff = Self::default();
        for (student, present) in remote {
            match local.get(student) {
                None => diff.added.push(student.clone()),
                Some(old) if old != present => diff.changed.push(student.clone()),
                Some(_) => {}
            }
        }
        diff.removed = local
            .keys()
            .filter(|student| !remote.contains_key(*student))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Number of students affected.
    pub fn len(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Where a remote snapshot came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeMode {
    /// The first load after start. Always applied.
    Initial,
    /// A periodic poll.
    Poll,
    /// The re-fetch that follows a persisted manual write.
    Confirm { student: StudentId, present: bool },
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Local state now equals the remote snapshot.
    Applied(AttendanceDiff),
    /// Local and remote already agreed.
    Unchanged,
    /// A recent manual write blocked the merge.
    Suppressed { remaining_ms: i64 },
}

// ---------------------------------------------------------------------------
// Manual toggles
// ---------------------------------------------------------------------------

/// A toggle awaiting the user's confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingToggle {
    pub student: StudentId,
    /// The value on screen when the toggle was requested.
    pub current: bool,
    /// The value that confirming will write.
    pub proposed: bool,
}

/// A confirmed toggle that has been applied locally but not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimisticWrite {
    pub student: StudentId,
    /// `None` when the student had no record before the write.
    pub previous: Option<bool>,
    pub present: bool,
    pub written_at_ms: i64,
    /// Orders writes; a later toggle of the same student has a higher `seq`.
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Local attendance plus the bookkeeping that protects manual edits.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    records: AttendanceMap,
    loaded: bool,
    last_manual_write_ms: Option<i64>,
    pending: Option<PendingToggle>,
    /// Manual writes not yet seen in a remote snapshot.
    unsettled: BTreeMap<StudentId, bool>,
    write_seq: u64,
    /// The newest write per student whose value is still on screen.
    latest_write: BTreeMap<StudentId, u64>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &AttendanceMap {
        &self.records
    }

    /// Whether any snapshot has been applied yet.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn last_manual_write_ms(&self) -> Option<i64> {
        self.last_manual_write_ms
    }

    /// Milliseconds of suppression left at `now_ms`, 0 when inactive.
    pub fn suppression_remaining_ms(&self, now_ms: i64) -> i64 {
        match self.last_manual_write_ms {
            Some(at) => (at + SUPPRESS_WINDOW_MS - now_ms).max(0),
            None => 0,
        }
    }

    pub fn is_suppressed(&self, now_ms: i64) -> bool {
        self.suppression_remaining_ms(now_ms) > 0
    }

    /// Merges a remote snapshot according to `mode`.
    pub fn merge(&mut self, remote: AttendanceMap, mode: MergeMode, now_ms: i64) -> MergeOutcome {
        if let MergeMode::Confirm { student, present } = &mode {
            if remote.get(student) == Some(present) {
                self.unsettled.remove(student);
            }
        }

        let diff = AttendanceDiff::between(&self.records, &remote);

        if mode != MergeMode::Initial {
            let remaining_ms = self.suppression_remaining_ms(now_ms);
            if remaining_ms > 0 && !diff.is_empty() && !self.confirms_all(&mode, &remote) {
                tracing::debug!(
                    remaining_ms,
                    differences = diff.len(),
                    "merge suppressed after manual write"
                );
                return MergeOutcome::Suppressed { remaining_ms };
            }
        }

        self.loaded = true;
        if window_closed(self.last_manual_write_ms, now_ms) {
            self.unsettled.clear();
        }
        if diff.is_empty() {
            return MergeOutcome::Unchanged;
        }
        for student in diff.added.iter().chain(&diff.changed).chain(&diff.removed) {
            self.latest_write.remove(student);
        }
        self.records = remote;
        MergeOutcome::Applied(diff)
    }

    /// A confirming re-fetch may pass the window only if it reflects every
    /// manual write still in flight, not just its own.
    fn confirms_all(&self, mode: &MergeMode, remote: &AttendanceMap) -> bool {
        let MergeMode::Confirm { student, present } = mode else {
            return false;
        };
        remote.get(student) == Some(present)
            && self
                .unsettled
                .iter()
                .all(|(student, present)| remote.get(student) == Some(present))
    }

    /// Opens a confirmation for flipping `student`.
    pub fn request_toggle(&mut self, student: StudentId) -> Result<PendingToggle, SessionError> {
        if let Some(open) = &self.pending {
            return Err(SessionError::ConfirmationOpen(open.student.clone()));
        }
        let current = self.records.get(&student).copied().unwrap_or(false);
        let pending = PendingToggle {
            student,
            current,
            proposed: !current,
        };
        self.pending = Some(pending.clone());
        Ok(pending)
    }

    pub fn pending(&self) -> Option<&PendingToggle> {
        self.pending.as_ref()
    }

    /// An open confirmation pauses polling.
    pub fn is_blocked(&self) -> bool {
        self.pending.is_some()
    }

    /// Closes the confirmation without writing.
    pub fn cancel_toggle(&mut self) -> Result<PendingToggle, SessionError> {
        self.pending.take().ok_or(SessionError::NoPendingConfirmation)
    }

    /// Applies the pending toggle locally and starts the suppression
    /// window. The caller persists the returned write.
    pub fn confirm_toggle(&mut self, now_ms: i64) -> Result<OptimisticWrite, SessionError> {
        let pending = self.pending.take().ok_or(SessionError::NoPendingConfirmation)?;
        let previous = self.records.insert(pending.student.clone(), pending.proposed);
        self.last_manual_write_ms = Some(now_ms);
        self.unsettled.insert(pending.student.clone(), pending.proposed);
        self.write_seq += 1;
        self.latest_write.insert(pending.student.clone(), self.write_seq);

        Ok(OptimisticWrite {
            student: pending.student,
            previous,
            present: pending.proposed,
            written_at_ms: now_ms,
            seq: self.write_seq,
        })
    }

    /// Undoes a write the backend did not persist.
    ///
    /// Returns `false` without touching the record when something newer
    /// (a later toggle, or an applied merge) already replaced the
    /// optimistic value, even if it happens to hold the same value.
    pub fn rollback(&mut self, write: &OptimisticWrite) -> bool {
        if self.latest_write.get(&write.student) != Some(&write.seq) {
            return false;
        }
        self.latest_write.remove(&write.student);
        if self.unsettled.get(&write.student) == Some(&write.present) {
            self.unsettled.remove(&write.student);
        }
        if self.records.get(&write.student) != Some(&write.present) {
            return false;
        }
        match write.previous {
            Some(previous) => {
                self.records.insert(write.student.clone(), previous);
            }
            None => {
                self.records.remove(&write.student);
            }
        }
        true
    }
}

fn window_closed(last_write_ms: Option<i64>, now_ms: i64) -> bool {
    last_write_ms.is_none_or(|at| now_ms - at >= SUPPRESS_WINDOW_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, bool)]) -> AttendanceMap {
        entries
            .iter()
            .map(|(id, present)| (StudentId::from(*id), *present))
            .collect()
    }

    fn loaded(entries: &[(&str, bool)]) -> Reconciler {
        let mut r = Reconciler::new();
        r.merge(map(entries), MergeMode::Initial, 0);
        r
    }

    fn confirm(r: &mut Reconciler, student: &str, now: i64) -> OptimisticWrite {
        r.request_toggle(student.into()).unwrap();
        r.confirm_toggle(now).unwrap()
    }

    #[test]
    fn test_diff_between_reports_each_kind() {
        let local = map(&[("a", true), ("b", false), ("c", true)]);
        let remote = map(&[("a", true), ("b", true), ("d", false)]);
        let diff = AttendanceDiff::between(&local, &remote);

        assert_eq!(diff.added, vec![StudentId::from("d")]);
        assert_eq!(diff.changed, vec![StudentId::from("b")]);
        assert_eq!(diff.removed, vec![StudentId::from("c")]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn test_diff_between_equal_values_is_empty() {
        // Built in different orders, same values.
        let local = map(&[("b", false), ("a", true)]);
        let remote = map(&[("a", true), ("b", false)]);
        assert!(AttendanceDiff::between(&local, &remote).is_empty());
    }

    #[test]
    fn test_merge_initial_applies() {
        let mut r = Reconciler::new();
        assert!(!r.is_loaded());
        let outcome = r.merge(map(&[("a", false)]), MergeMode::Initial, 0);
        assert!(matches!(outcome, MergeOutcome::Applied(_)));
        assert!(r.is_loaded());
    }

    #[test]
    fn test_merge_poll_without_changes_is_unchanged() {
        let mut r = loaded(&[("a", true)]);
        assert_eq!(r.merge(map(&[("a", true)]), MergeMode::Poll, 10_000), MergeOutcome::Unchanged);
    }

    #[test]
    fn test_merge_poll_applies_remote_scan() {
        let mut r = loaded(&[("a", false)]);
        let outcome = r.merge(map(&[("a", true)]), MergeMode::Poll, 2_000);
        assert_eq!(
            outcome,
            MergeOutcome::Applied(AttendanceDiff {
                changed: vec!["a".into()],
                ..AttendanceDiff::default()
            })
        );
        assert_eq!(r.records().get(&StudentId::from("a")), Some(&true));
    }

    #[test]
    fn test_merge_suppressed_shortly_after_manual_write() {
        let t = 100_000;
        let mut r = loaded(&[("s", false)]);
        confirm(&mut r, "s", t);

        // The backend has not seen the write yet.
        let outcome = r.merge(map(&[("s", false)]), MergeMode::Poll, t + 1000);
        assert_eq!(outcome, MergeOutcome::Suppressed { remaining_ms: 2000 });
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&true));

        let outcome = r.merge(map(&[("s", false)]), MergeMode::Poll, t + 3500);
        assert!(matches!(outcome, MergeOutcome::Applied(_)));
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&false));
    }

    #[test]
    fn test_merge_suppresses_whole_record_set() {
        let t = 50_000;
        let mut r = loaded(&[("s", false), ("other", false)]);
        confirm(&mut r, "s", t);

        // A genuine scan for someone else still waits for the window.
        let remote = map(&[("s", true), ("other", true)]);
        assert!(matches!(
            r.merge(remote.clone(), MergeMode::Poll, t + 2000),
            MergeOutcome::Suppressed { .. }
        ));
        assert!(matches!(
            r.merge(remote, MergeMode::Poll, t + 3000),
            MergeOutcome::Applied(_)
        ));
    }

    #[test]
    fn test_merge_confirm_passes_window_when_write_landed() {
        let t = 10_000;
        let mut r = loaded(&[("s", false), ("other", false)]);
        confirm(&mut r, "s", t);

        let remote = map(&[("s", true), ("other", true)]);
        let mode = MergeMode::Confirm {
            student: "s".into(),
            present: true,
        };
        assert!(matches!(r.merge(remote, mode, t + 500), MergeOutcome::Applied(_)));
        assert_eq!(r.records().get(&StudentId::from("other")), Some(&true));
        // The window is not shortened.
        assert!(r.is_suppressed(t + 500));
    }

    #[test]
    fn test_merge_confirm_suppressed_when_write_missing() {
        let t = 10_000;
        let mut r = loaded(&[("s", false)]);
        confirm(&mut r, "s", t);

        let mode = MergeMode::Confirm {
            student: "s".into(),
            present: true,
        };
        assert!(matches!(
            r.merge(map(&[("s", false)]), mode, t + 500),
            MergeOutcome::Suppressed { .. }
        ));
    }

    #[test]
    fn test_merge_confirm_waits_for_other_unsettled_writes() {
        let t = 10_000;
        let mut r = loaded(&[("a", false), ("b", false)]);
        confirm(&mut r, "a", t);
        confirm(&mut r, "b", t + 300);

        // A's confirmation sees A's write but not yet B's.
        let mode = MergeMode::Confirm {
            student: "a".into(),
            present: true,
        };
        assert!(matches!(
            r.merge(map(&[("a", true), ("b", false)]), mode, t + 500),
            MergeOutcome::Suppressed { .. }
        ));
        assert_eq!(r.records().get(&StudentId::from("b")), Some(&true));
    }

    #[test]
    fn test_toggle_round_trip_leaves_empty_diff() {
        let mut r = loaded(&[("s", true)]);
        confirm(&mut r, "s", 1_000);
        confirm(&mut r, "s", 2_000);

        assert_eq!(r.records(), &map(&[("s", true)]));
        assert_eq!(
            r.merge(map(&[("s", true)]), MergeMode::Poll, 2_500),
            MergeOutcome::Unchanged
        );
    }

    #[test]
    fn test_request_toggle_proposes_flip() {
        let mut r = loaded(&[("s", true)]);
        let pending = r.request_toggle("s".into()).unwrap();
        assert!(pending.current);
        assert!(!pending.proposed);
        assert!(r.is_blocked());
    }

    #[test]
    fn test_request_toggle_while_open_rejected() {
        let mut r = loaded(&[("a", true), ("b", true)]);
        r.request_toggle("a".into()).unwrap();
        assert_eq!(
            r.request_toggle("b".into()),
            Err(SessionError::ConfirmationOpen("a".into()))
        );
    }

    #[test]
    fn test_cancel_toggle_writes_nothing() {
        let mut r = loaded(&[("s", false)]);
        r.request_toggle("s".into()).unwrap();
        r.cancel_toggle().unwrap();

        assert!(!r.is_blocked());
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&false));
        assert_eq!(r.last_manual_write_ms(), None);
        assert_eq!(r.cancel_toggle(), Err(SessionError::NoPendingConfirmation));
    }

    #[test]
    fn test_confirm_toggle_without_request_fails() {
        let mut r = Reconciler::new();
        assert_eq!(r.confirm_toggle(0), Err(SessionError::NoPendingConfirmation));
    }

    #[test]
    fn test_rollback_restores_previous() {
        let mut r = loaded(&[("s", false)]);
        let write = confirm(&mut r, "s", 1_000);
        assert!(r.rollback(&write));
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&false));
    }

    #[test]
    fn test_rollback_of_new_record_removes_it() {
        let mut r = loaded(&[]);
        let write = confirm(&mut r, "new", 1_000);
        assert_eq!(write.previous, None);
        assert!(r.rollback(&write));
        assert!(r.records().is_empty());
    }

    #[test]
    fn test_rollback_skipped_when_newer_value_present() {
        let mut r = loaded(&[("s", false)]);
        let first = confirm(&mut r, "s", 1_000);
        confirm(&mut r, "s", 1_200);

        // The second toggle put `false` back; the first write's failure
        // must not clobber it.
        assert!(!r.rollback(&first));
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&false));
    }

    #[test]
    fn test_rollback_skipped_when_newer_write_restored_same_value() {
        let mut r = loaded(&[("s", false)]);
        let first = confirm(&mut r, "s", 1_000);
        confirm(&mut r, "s", 1_200);
        let third = confirm(&mut r, "s", 1_400);
        assert!(third.present);
        assert!(third.seq > first.seq);

        // `s` reads `true` again, but it is the third write's `true`.
        assert!(!r.rollback(&first));
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&true));

        assert!(r.rollback(&third));
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&false));
    }

    #[test]
    fn test_rollback_skipped_after_merge_replaced_write() {
        let mut r = loaded(&[("s", false)]);
        let write = confirm(&mut r, "s", 1_000);

        // Window over: another device flips `s` off, then back on.
        r.merge(map(&[("s", false)]), MergeMode::Poll, 5_000);
        r.merge(map(&[("s", true)]), MergeMode::Poll, 7_000);

        assert!(!r.rollback(&write));
        assert_eq!(r.records().get(&StudentId::from("s")), Some(&true));
    }
}
